//! Batch execution: one agent run per scenario, then the report.
//!
//! Each scenario moves `Pending -> Running -> Parsed | Skipped`. States live in
//! a vector indexed by catalog position, so the report order is the catalog
//! order no matter which worker finishes first. Nothing is retried; a scenario
//! that yields no usable outcome is skipped once and the batch moves on.
use crate::agent::{output_schema, Agent, AgentTask};
use crate::catalog::ScenarioDescriptor;
use crate::credentials::Credentials;
use crate::outcome::{parse_result, TestOutcome};
use crate::report::{render_report, write_report};
use crate::run_log::{RunLog, RunLogEntry};
use crate::workspace::RunWorkspace;
use anyhow::{anyhow, Result};
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::thread;
use std::time::Instant;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// The agent finished without a final result.
    NoResult,
    /// The result was valid but listed no outcomes.
    EmptyOutcomes,
    ResultSchemaInvalid(String),
    AgentFailed(String),
    WorkspaceFailed(String),
}

impl SkipReason {
    pub fn code(&self) -> &'static str {
        match self {
            Self::NoResult => "no_result",
            Self::EmptyOutcomes => "empty_outcomes",
            Self::ResultSchemaInvalid(_) => "result_schema_invalid",
            Self::AgentFailed(_) => "agent_failed",
            Self::WorkspaceFailed(_) => "workspace_failed",
        }
    }

    /// Mask secrets in the detail text, which may quote agent output.
    pub fn redacted(self, credentials: &Credentials) -> Self {
        match self {
            Self::ResultSchemaInvalid(detail) => {
                Self::ResultSchemaInvalid(credentials.redact(&detail))
            }
            Self::AgentFailed(detail) => Self::AgentFailed(credentials.redact(&detail)),
            Self::WorkspaceFailed(detail) => Self::WorkspaceFailed(credentials.redact(&detail)),
            reason @ (Self::NoResult | Self::EmptyOutcomes) => reason,
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoResult | Self::EmptyOutcomes => write!(f, "{}", self.code()),
            Self::ResultSchemaInvalid(detail)
            | Self::AgentFailed(detail)
            | Self::WorkspaceFailed(detail) => write!(f, "{}: {detail}", self.code()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScenarioState {
    Pending,
    Running,
    Parsed(TestOutcome),
    Skipped(SkipReason),
}

/// Static settings shared by every scenario in a batch.
#[derive(Debug, Clone, Copy)]
pub struct BatchOptions<'a> {
    pub model: &'a str,
    pub allowed_domains: &'a [String],
    pub jobs: usize,
    /// Log the secret-bearing task text instead of the template.
    pub log_resolved_tasks: bool,
}

#[derive(Debug)]
pub struct BatchSummary {
    pub run_dir: PathBuf,
    pub total: usize,
    pub parsed: usize,
    pub skipped: usize,
    /// `None` when there were no outcomes to save.
    pub report: Option<PathBuf>,
    /// Final state of every scenario, in catalog order.
    pub states: Vec<ScenarioState>,
}

struct Batch<'a> {
    scenarios: &'a [ScenarioDescriptor],
    run: &'a RunWorkspace,
    agent: &'a dyn Agent,
    credentials: &'a Credentials,
    options: BatchOptions<'a>,
    run_log: RunLog,
}

/// Run every scenario and write `test_results.csv` into the run directory.
///
/// Per-scenario failures never escape; the only error is a report that could
/// not be written, after its rows have been logged.
pub fn run_batch(
    scenarios: &[ScenarioDescriptor],
    run: &RunWorkspace,
    agent: &dyn Agent,
    credentials: &Credentials,
    options: BatchOptions<'_>,
) -> Result<BatchSummary> {
    let missing = credentials.missing();
    if !missing.is_empty() {
        tracing::warn!(
            missing = %missing.join(", "),
            "test credentials not set; placeholders will be replaced with empty strings"
        );
    }
    tracing::info!(
        run_id = %run.run_id,
        scenarios = scenarios.len(),
        jobs = options.jobs,
        model = %options.model,
        "starting batch"
    );

    let batch = Batch {
        scenarios,
        run,
        agent,
        credentials,
        options,
        run_log: RunLog::new(run.run_log_path()),
    };
    let states = batch.execute();
    finish(run, states, credentials)
}

fn finish(
    run: &RunWorkspace,
    states: Vec<ScenarioState>,
    credentials: &Credentials,
) -> Result<BatchSummary> {
    let outcomes = collect_outcomes(&states);
    let total = states.len();
    let parsed = outcomes.len();
    let path = run.report_path();

    let report = match write_report(&outcomes, &path) {
        Ok(true) => {
            tracing::info!(report = %path.display(), "saved {parsed} test results");
            Some(path)
        }
        Ok(false) => {
            tracing::warn!("no results to save");
            None
        }
        Err(err) => {
            tracing::error!("{err}");
            match render_report(&outcomes) {
                Ok(text) => tracing::error!("unsaved results:\n{}", credentials.redact(&text)),
                Err(render_err) => {
                    for outcome in &outcomes {
                        tracing::error!(?outcome, "unsaved result ({render_err})");
                    }
                }
            }
            return Err(anyhow!(err));
        }
    };

    Ok(BatchSummary {
        run_dir: run.root_dir.clone(),
        total,
        parsed,
        skipped: total - parsed,
        report,
        states,
    })
}

/// Parsed outcomes in catalog order.
pub fn collect_outcomes(states: &[ScenarioState]) -> Vec<TestOutcome> {
    states
        .iter()
        .filter_map(|state| match state {
            ScenarioState::Parsed(outcome) => Some(outcome.clone()),
            _ => None,
        })
        .collect()
}

impl Batch<'_> {
    fn execute(&self) -> Vec<ScenarioState> {
        let total = self.scenarios.len();
        let states = Mutex::new(vec![ScenarioState::Pending; total]);
        let workers = self.options.jobs.clamp(1, total.max(1));

        if workers == 1 {
            for index in 0..total {
                self.step(index, &states);
            }
        } else {
            let next = AtomicUsize::new(0);
            thread::scope(|scope| {
                for _ in 0..workers {
                    scope.spawn(|| loop {
                        let index = next.fetch_add(1, Ordering::SeqCst);
                        if index >= total {
                            break;
                        }
                        self.step(index, &states);
                    });
                }
            });
        }

        states
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn step(&self, index: usize, states: &Mutex<Vec<ScenarioState>>) {
        set_state(states, index, ScenarioState::Running);
        let state = self.run_scenario(index);
        set_state(states, index, state);
    }

    fn run_scenario(&self, index: usize) -> ScenarioState {
        let scenario = &self.scenarios[index];
        let name = scenario.name.as_str();
        let start = Instant::now();
        tracing::info!(
            scenario = %name,
            "running scenario {}/{}",
            index + 1,
            self.scenarios.len()
        );

        let resolved = self.credentials.resolve(&scenario.raw_description);
        if self.options.log_resolved_tasks {
            tracing::info!(scenario = %name, task = %resolved, "resolved task");
        } else {
            tracing::debug!(scenario = %name, task = %scenario.raw_description, "task template");
        }

        let state = match self.run.open_task(name) {
            Err(err) => ScenarioState::Skipped(SkipReason::WorkspaceFailed(format!("{err:#}"))),
            Ok(workspace) => {
                tracing::debug!(
                    scenario = %name,
                    gif = %workspace.gif_path.display(),
                    recording = %workspace.recording_path.display(),
                    conversation = %workspace.conversation_path.display(),
                    "artifact paths"
                );
                let task = AgentTask {
                    scenario_name: name,
                    description: &resolved,
                    model: self.options.model,
                    allowed_domains: self.options.allowed_domains,
                    output_schema: output_schema(),
                    workspace: &workspace,
                };
                match self.agent.run(&task) {
                    Err(err) => ScenarioState::Skipped(SkipReason::AgentFailed(format!("{err:#}"))),
                    Ok(None) => ScenarioState::Skipped(SkipReason::NoResult),
                    Ok(Some(raw)) => decode(name, &raw),
                }
            }
        };

        let state = match state {
            ScenarioState::Skipped(reason) => {
                ScenarioState::Skipped(reason.redacted(self.credentials))
            }
            state => state,
        };

        let duration_ms = start.elapsed().as_millis() as u64;
        let entry = match &state {
            ScenarioState::Parsed(outcome) => {
                tracing::info!(
                    scenario = %name,
                    success = outcome.success,
                    comments = %self.credentials.redact(&outcome.comments),
                    elapsed_ms = duration_ms,
                    "scenario finished"
                );
                RunLogEntry::parsed(index, name, outcome.success, duration_ms)
            }
            ScenarioState::Skipped(reason) => {
                tracing::warn!(
                    scenario = %name,
                    reason = %reason,
                    elapsed_ms = duration_ms,
                    "scenario skipped"
                );
                RunLogEntry::skipped(index, name, reason.to_string(), duration_ms)
            }
            ScenarioState::Pending | ScenarioState::Running => return state,
        };
        if let Err(err) = self.run_log.append(&entry) {
            tracing::warn!(
                run_log = %self.run_log.path().display(),
                "failed to append run log: {err:#}"
            );
        }
        state
    }
}

/// Validate the agent's result and pin the outcome to the catalog name.
fn decode(name: &str, raw: &str) -> ScenarioState {
    match parse_result(raw) {
        Err(err) => ScenarioState::Skipped(SkipReason::ResultSchemaInvalid(err.to_string())),
        Ok(None) => ScenarioState::Skipped(SkipReason::EmptyOutcomes),
        Ok(Some(decoded)) => {
            if decoded.discarded > 0 {
                tracing::warn!(
                    scenario = %name,
                    discarded = decoded.discarded,
                    "agent reported several outcomes; keeping the first"
                );
            }
            let mut outcome = decoded.outcome;
            if outcome.scenario_name != name {
                tracing::warn!(
                    scenario = %name,
                    reported = %outcome.scenario_name,
                    "agent reported a different scenario name"
                );
                outcome.scenario_name = name.to_string();
            }
            ScenarioState::Parsed(outcome)
        }
    }
}

fn set_state(states: &Mutex<Vec<ScenarioState>>, index: usize, state: ScenarioState) {
    let mut states = states
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    states[index] = state;
}

#[cfg(test)]
#[path = "batch_tests.rs"]
mod tests;
