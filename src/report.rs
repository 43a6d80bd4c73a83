//! CSV report of parsed outcomes.
use crate::outcome::TestOutcome;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const REPORT_COLUMNS: [&str; 4] = ["scenario_name", "scenario_desc", "success", "comments"];

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("write report {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
}

/// Write one row per outcome, header first, replacing `path` atomically.
///
/// Returns `Ok(false)` without creating a file when `outcomes` is empty.
pub fn write_report(outcomes: &[TestOutcome], path: &Path) -> Result<bool, ReportError> {
    if outcomes.is_empty() {
        return Ok(false);
    }
    let write_err = |source: csv::Error| ReportError::Write {
        path: path.to_path_buf(),
        source,
    };
    let dir = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|err| write_err(err.into()))?;
    {
        let mut writer = csv::Writer::from_writer(tmp.as_file_mut());
        writer.write_record(REPORT_COLUMNS).map_err(write_err)?;
        for outcome in outcomes {
            writer
                .write_record([
                    outcome.scenario_name.as_str(),
                    outcome.scenario_desc.as_str(),
                    if outcome.success { "true" } else { "false" },
                    outcome.comments.as_str(),
                ])
                .map_err(write_err)?;
        }
        writer.flush().map_err(|err| write_err(err.into()))?;
    }
    tmp.as_file_mut()
        .sync_all()
        .map_err(|err| write_err(err.into()))?;
    tmp.persist(path)
        .map_err(|err| write_err(io::Error::from(err).into()))?;
    Ok(true)
}

/// Render outcomes as CSV text, used when the report file cannot be written.
pub fn render_report(outcomes: &[TestOutcome]) -> Result<String, csv::Error> {
    let mut buffer = Vec::new();
    {
        // Serializing a struct writes the header row from its field names.
        let mut writer = csv::Writer::from_writer(&mut buffer);
        for outcome in outcomes {
            writer.serialize(outcome)?;
        }
        writer.flush()?;
    }
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}
