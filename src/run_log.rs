//! Append-only record of scenario results for one run.
//!
//! Entries are appended to `<run_dir>/run_log.jsonl` as each scenario reaches
//! a terminal state:
//!
//! ```jsonl
//! {"schema_version":1,"ts":1741940813000,"index":0,"scenario_name":"Login Success","state":"parsed","success":true,"duration_ms":41200}
//! {"schema_version":1,"ts":1741940860000,"index":1,"scenario_name":"Login Failure","state":"skipped","reason":"no_result","duration_ms":39800}
//! ```
//!
//! The log holds scenario names and verdicts only, never task text.
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

pub const RUN_LOG_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoggedState {
    Parsed,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunLogEntry {
    pub schema_version: u32,

    /// Unix timestamp in milliseconds when the entry was written.
    pub ts: u64,

    /// Position of the scenario in the catalog (0-based).
    pub index: usize,

    pub scenario_name: String,

    pub state: LoggedState,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub success: Option<bool>,

    /// Skip reason code, with detail after a colon when there is any.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub reason: Option<String>,

    pub duration_ms: u64,
}

impl RunLogEntry {
    pub fn parsed(index: usize, scenario_name: &str, success: bool, duration_ms: u64) -> Self {
        Self::new(
            index,
            scenario_name,
            LoggedState::Parsed,
            Some(success),
            None,
            duration_ms,
        )
    }

    pub fn skipped(index: usize, scenario_name: &str, reason: String, duration_ms: u64) -> Self {
        Self::new(
            index,
            scenario_name,
            LoggedState::Skipped,
            None,
            Some(reason),
            duration_ms,
        )
    }

    fn new(
        index: usize,
        scenario_name: &str,
        state: LoggedState,
        success: Option<bool>,
        reason: Option<String>,
        duration_ms: u64,
    ) -> Self {
        Self {
            schema_version: RUN_LOG_SCHEMA_VERSION,
            ts: now_epoch_ms(),
            index,
            scenario_name: scenario_name.to_string(),
            state,
            success,
            reason,
            duration_ms,
        }
    }
}

/// Serializes appends from concurrent scenario workers.
pub struct RunLog {
    path: PathBuf,
    lock: Mutex<()>,
}

impl RunLog {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, entry: &RunLogEntry) -> Result<()> {
        let line = serde_json::to_string(entry).context("serialize run_log entry")?;
        let _guard = self
            .lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).context("create run directory for run_log")?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("open run_log for append: {}", self.path.display()))?;
        writeln!(file, "{line}").context("write run_log entry")?;
        Ok(())
    }
}

fn now_epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_millis() as u64)
        .unwrap_or(0)
}
