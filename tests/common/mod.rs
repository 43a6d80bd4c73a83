//! Shared test infrastructure for integration tests.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

/// Agent that answers every scenario with a passing verdict, except
/// `Broken` (malformed JSON) and `Silent` (no output). It saves the prompt it
/// received next to the GIF path so tests can inspect substitution.
pub const VERDICT_AGENT: &str = r#"cat > "$(dirname "$AQA_GIF_PATH")/prompt.txt"
case "$AQA_SCENARIO_NAME" in
  Broken) printf '{not json' ;;
  Silent) ;;
  *) printf '{"testcases":[{"scenario_name":"%s","scenario_desc":"checked","success":true,"comments":"model=%s"}]}' "$AQA_SCENARIO_NAME" "$AQA_MODEL" ;;
esac"#;

/// Working directory with its own catalog, env file, and agent scripts.
pub struct Sandbox {
    pub dir: TempDir,
}

impl Sandbox {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("create sandbox"),
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn write(&self, rel: &str, contents: &str) -> PathBuf {
        let path = self.path().join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent directory");
        }
        fs::write(&path, contents).expect("write file");
        path
    }

    pub fn agent_script(&self, name: &str, body: &str) -> PathBuf {
        let path = self.write(name, &format!("#!/bin/sh\n{body}\n"));
        let mut perms = fs::metadata(&path).expect("metadata").permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&path, perms).expect("chmod agent");
        path
    }

    /// Run `aqa` inside the sandbox with a scrubbed environment.
    pub fn aqa(&self, args: &[&str]) -> Output {
        Command::new(env!("CARGO_BIN_EXE_aqa"))
            .args(args)
            .current_dir(self.path())
            .env_remove("TEST_USERNAME")
            .env_remove("TEST_PASSWORD")
            .env_remove("AQA_AGENT_COMMAND")
            .env_remove("RUST_LOG")
            .env("XDG_CONFIG_HOME", self.path().join("xdg"))
            .output()
            .expect("run aqa")
    }

    pub fn artifacts_dir(&self) -> PathBuf {
        self.path().join("test_artifacts")
    }

    /// Run directories created so far.
    pub fn run_dirs(&self) -> Vec<PathBuf> {
        let Ok(entries) = fs::read_dir(self.artifacts_dir()) else {
            return Vec::new();
        };
        let mut dirs: Vec<PathBuf> = entries
            .map(|entry| entry.expect("dir entry").path())
            .filter(|path| path.is_dir())
            .collect();
        dirs.sort();
        dirs
    }

    pub fn single_run_dir(&self) -> PathBuf {
        let dirs = self.run_dirs();
        assert_eq!(dirs.len(), 1, "expected exactly one run dir: {dirs:?}");
        dirs.into_iter().next().expect("run dir")
    }
}

pub fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

pub fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

/// Report rows as (scenario_name, success) pairs.
pub fn report_rows(path: &Path) -> Vec<(String, String)> {
    let mut reader = csv::Reader::from_path(path).expect("open report");
    let headers = reader.headers().expect("headers").clone();
    assert_eq!(
        headers.iter().collect::<Vec<_>>(),
        vec!["scenario_name", "scenario_desc", "success", "comments"]
    );
    reader
        .records()
        .map(|record| {
            let record = record.expect("record");
            (record[0].to_string(), record[2].to_string())
        })
        .collect()
}
