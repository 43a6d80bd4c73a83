//! Run and per-scenario artifact directories.
//!
//! Layout for one batch:
//!
//! ```text
//! <output_base_dir>/run_<YYYYmmdd_HHMMSS>/
//!     conversations/<Scenario>_conversation.json
//!     <Scenario>/<Scenario>.gif
//!     <Scenario>/<Scenario>_recording.webm
//!     run_log.jsonl
//!     test_results.csv
//! ```
//!
//! Directory names come from the scenario name only, never from task text.
use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use std::fs;
use std::path::{Path, PathBuf};

pub const RUN_DIR_PREFIX: &str = "run_";
const RUN_ID_FORMAT: &str = "%Y%m%d_%H%M%S";
pub const REPORT_FILE_NAME: &str = "test_results.csv";
pub const RUN_LOG_FILE_NAME: &str = "run_log.jsonl";

const HOSTILE_CHARS: [char; 5] = [' ', ':', '/', '\\', '.'];

#[derive(Debug, Clone)]
pub struct RunWorkspace {
    pub run_id: String,
    pub root_dir: PathBuf,
    pub conversation_dir: PathBuf,
}

#[derive(Debug, Clone)]
pub struct TaskWorkspace {
    pub task_dir: PathBuf,
    pub gif_path: PathBuf,
    pub recording_path: PathBuf,
    pub conversation_path: PathBuf,
}

/// Replace filesystem-hostile characters with `_`.
///
/// Distinct names can map to the same directory ("a.b" and "a b"); the later
/// scenario then writes into the earlier one's workspace.
pub fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|ch| if HOSTILE_CHARS.contains(&ch) { '_' } else { ch })
        .collect()
}

pub fn run_id_at(ts: DateTime<Local>) -> String {
    format!("{RUN_DIR_PREFIX}{}", ts.format(RUN_ID_FORMAT))
}

/// Create the run directory for a batch starting now.
pub fn open_run(base_dir: &Path, conversations_subdir: &str) -> Result<RunWorkspace> {
    open_run_at(base_dir, conversations_subdir, Local::now())
}

/// Create `<base>/run_<ts>/` and its conversation subdirectory.
///
/// Existing directories are reused; two batches started in the same second
/// share a run directory.
pub fn open_run_at(
    base_dir: &Path,
    conversations_subdir: &str,
    ts: DateTime<Local>,
) -> Result<RunWorkspace> {
    let run_id = run_id_at(ts);
    let root_dir = base_dir.join(&run_id);
    let conversation_dir = root_dir.join(conversations_subdir);
    fs::create_dir_all(&conversation_dir)
        .with_context(|| format!("create run directory {}", conversation_dir.display()))?;
    Ok(RunWorkspace {
        run_id,
        root_dir,
        conversation_dir,
    })
}

impl RunWorkspace {
    /// Create the scenario's directory and compute its artifact paths.
    pub fn open_task(&self, scenario_name: &str) -> Result<TaskWorkspace> {
        let workspace = self.task_paths(scenario_name);
        fs::create_dir_all(&workspace.task_dir).with_context(|| {
            format!("create scenario directory {}", workspace.task_dir.display())
        })?;
        Ok(workspace)
    }

    /// Artifact paths for a scenario without touching the filesystem.
    pub fn task_paths(&self, scenario_name: &str) -> TaskWorkspace {
        let dir_name = sanitize_name(scenario_name);
        let task_dir = self.root_dir.join(&dir_name);
        TaskWorkspace {
            gif_path: task_dir.join(format!("{dir_name}.gif")),
            recording_path: task_dir.join(format!("{dir_name}_recording.webm")),
            conversation_path: self
                .conversation_dir
                .join(format!("{dir_name}_conversation.json")),
            task_dir,
        }
    }

    pub fn report_path(&self) -> PathBuf {
        self.root_dir.join(REPORT_FILE_NAME)
    }

    pub fn run_log_path(&self) -> PathBuf {
        self.root_dir.join(RUN_LOG_FILE_NAME)
    }
}
