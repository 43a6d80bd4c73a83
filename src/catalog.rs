//! Scenario catalog loading.
//!
//! The catalog is a CSV file with a header row. Only `scenario_name` and
//! `task_description` are read; any other columns are ignored so teams can keep
//! notes or ownership columns alongside the scenarios.
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const NAME_COLUMN: &str = "scenario_name";
pub const DESCRIPTION_COLUMN: &str = "task_description";
const REQUIRED_COLUMNS: [&str; 2] = [NAME_COLUMN, DESCRIPTION_COLUMN];

/// One row of the catalog, in file order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScenarioDescriptor {
    pub name: String,
    pub raw_description: String,
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("catalog {} not found or not a readable file", path.display())]
    Missing { path: PathBuf },

    #[error(
        "catalog {} is missing required column(s): {}",
        path.display(),
        missing.join(", ")
    )]
    SchemaInvalid { path: PathBuf, missing: Vec<String> },

    #[error("read catalog {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
}

/// Load every scenario in the catalog, preserving row order.
///
/// Rows with a blank `scenario_name` are named `Unnamed_Task_<row>` (1-based)
/// so they still get a workspace of their own.
pub fn load_catalog(path: &Path) -> Result<Vec<ScenarioDescriptor>, CatalogError> {
    if !path.is_file() {
        return Err(CatalogError::Missing {
            path: path.to_path_buf(),
        });
    }
    let file = File::open(path).map_err(|err| match err.kind() {
        io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied => CatalogError::Missing {
            path: path.to_path_buf(),
        },
        _ => CatalogError::Read {
            path: path.to_path_buf(),
            source: csv::Error::from(err),
        },
    })?;
    read_catalog(file, path)
}

fn read_catalog<R: io::Read>(
    reader: R,
    path: &Path,
) -> Result<Vec<ScenarioDescriptor>, CatalogError> {
    let read_err = |source: csv::Error| CatalogError::Read {
        path: path.to_path_buf(),
        source,
    };
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(reader);

    let headers = reader.headers().map_err(read_err)?.clone();
    let column = |name: &str| headers.iter().position(|header| header.trim() == name);
    let missing: Vec<String> = REQUIRED_COLUMNS
        .into_iter()
        .filter(|&name| column(name).is_none())
        .map(|name| name.to_string())
        .collect();
    let (Some(name_idx), Some(desc_idx)) = (column(NAME_COLUMN), column(DESCRIPTION_COLUMN))
    else {
        return Err(CatalogError::SchemaInvalid {
            path: path.to_path_buf(),
            missing,
        });
    };

    let mut scenarios = Vec::new();
    for (idx, record) in reader.records().enumerate() {
        let record = record.map_err(read_err)?;
        let name = record.get(name_idx).unwrap_or("").trim();
        let name = if name.is_empty() {
            format!("Unnamed_Task_{}", idx + 1)
        } else {
            name.to_string()
        };
        scenarios.push(ScenarioDescriptor {
            name,
            raw_description: record.get(desc_idx).unwrap_or("").to_string(),
        });
    }
    Ok(scenarios)
}

/// Load the catalog for a batch, logging failures instead of returning them.
///
/// An empty result means there is nothing to run, whatever the cause.
pub fn load_scenarios(path: &Path) -> Vec<ScenarioDescriptor> {
    tracing::info!(catalog = %path.display(), "loading scenarios");
    match load_catalog(path) {
        Ok(scenarios) => {
            tracing::info!(count = scenarios.len(), "loaded scenarios");
            scenarios
        }
        Err(err) => {
            tracing::error!("{err}");
            Vec::new()
        }
    }
}
