//! Decoding and validating the agent's final result.
//!
//! Agents report a `{"testcases": [...]}` document. Validation happens once at
//! this boundary; everything after it works with typed `TestOutcome`s.
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One verdict reported by the agent. Field order is the report column order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestOutcome {
    pub scenario_name: String,
    pub scenario_desc: String,
    pub success: bool,
    pub comments: String,
}

#[derive(Deserialize)]
struct OutcomeEnvelope {
    testcases: Vec<TestOutcome>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResultError {
    #[error("result does not match the outcome schema: {detail}")]
    SchemaInvalid { detail: String },
}

/// A decoded result: the outcome kept for the report and how many extra
/// outcomes the agent reported alongside it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedResult {
    pub outcome: TestOutcome,
    pub discarded: usize,
}

/// Decode raw agent output. `Ok(None)` means the document was valid but held
/// no outcomes.
pub fn parse_result(raw: &str) -> Result<Option<DecodedResult>, ResultError> {
    let json = strip_code_fence(raw);
    let envelope: OutcomeEnvelope =
        serde_json::from_str(json).map_err(|err| ResultError::SchemaInvalid {
            detail: format!("{err} (line {}, column {})", err.line(), err.column()),
        })?;
    let total = envelope.testcases.len();
    Ok(envelope
        .testcases
        .into_iter()
        .next()
        .map(|outcome| DecodedResult {
            outcome,
            discarded: total - 1,
        }))
}

/// Body of the first markdown code fence in `text`, or `text` itself.
///
/// The opening fence's info string (`json`, `JSON`, ...) is dropped. An
/// unterminated fence leaves the text untouched so the decoder reports it.
fn strip_code_fence(text: &str) -> &str {
    let text = text.trim();
    let Some((_, after_open)) = text.split_once("```") else {
        return text;
    };
    let body = match after_open.split_once('\n') {
        Some((info, rest)) if !info.contains('{') => rest,
        _ => after_open.trim_start_matches(|ch: char| ch.is_ascii_alphabetic()),
    };
    match body.split_once("```") {
        Some((inner, _)) => inner.trim(),
        None => text,
    }
}
