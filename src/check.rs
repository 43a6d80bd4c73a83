//! Dry-run validation of config, catalog, agent command, and secrets.
//!
//! Nothing here invokes the agent or creates directories.
use crate::agent::CommandAgent;
use crate::catalog::{CatalogError, ScenarioDescriptor};
use crate::config::{ConfigSource, RunnerConfig};
use crate::credentials::{placeholders_in, unknown_placeholders, Credentials};
use crate::workspace::sanitize_name;
use anyhow::Result;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Write as _;

#[derive(Debug, Serialize)]
pub struct CheckReport {
    pub config_source: String,
    pub catalog: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub catalog_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_program: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_error: Option<String>,
    pub model: String,
    pub allowed_domains: Vec<String>,
    pub missing_secrets: Vec<String>,
    pub scenarios: Vec<ScenarioCheck>,
    pub collisions: Vec<Collision>,
}

#[derive(Debug, Serialize)]
pub struct ScenarioCheck {
    pub index: usize,
    pub name: String,
    pub dir_name: String,
    pub placeholders: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub unknown_placeholders: Vec<String>,
}

/// Scenario names that sanitize to the same directory.
#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct Collision {
    pub dir_name: String,
    pub scenarios: Vec<String>,
}

impl CheckReport {
    /// True when `run` would invoke the agent at least once.
    pub fn is_runnable(&self) -> bool {
        self.catalog_error.is_none() && self.agent_error.is_none() && !self.scenarios.is_empty()
    }
}

pub fn build_check_report(
    config: &RunnerConfig,
    source: &ConfigSource,
    catalog: Result<Vec<ScenarioDescriptor>, CatalogError>,
    agent: Result<CommandAgent>,
    credentials: &Credentials,
) -> CheckReport {
    let (scenarios, catalog_error) = match catalog {
        Ok(scenarios) => (scenarios, None),
        Err(err) => (Vec::new(), Some(err.to_string())),
    };
    let (agent_program, agent_error) = match agent {
        Ok(agent) => (Some(agent.program().display().to_string()), None),
        Err(err) => (None, Some(format!("{err:#}"))),
    };
    let checks = scenarios
        .iter()
        .enumerate()
        .map(|(index, scenario)| ScenarioCheck {
            index,
            name: scenario.name.clone(),
            dir_name: sanitize_name(&scenario.name),
            placeholders: placeholders_in(&scenario.raw_description)
                .into_iter()
                .map(str::to_string)
                .collect(),
            unknown_placeholders: unknown_placeholders(&scenario.raw_description),
        })
        .collect();

    CheckReport {
        config_source: source.to_string(),
        catalog: config.input_catalog_path.display().to_string(),
        catalog_error,
        agent_program,
        agent_error,
        model: config.model.clone(),
        allowed_domains: config.allowed_domains.clone(),
        missing_secrets: credentials
            .missing()
            .into_iter()
            .map(str::to_string)
            .collect(),
        scenarios: checks,
        collisions: find_collisions(&scenarios),
    }
}

pub fn find_collisions(scenarios: &[ScenarioDescriptor]) -> Vec<Collision> {
    let mut by_dir: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for scenario in scenarios {
        by_dir
            .entry(sanitize_name(&scenario.name))
            .or_default()
            .push(scenario.name.clone());
    }
    by_dir
        .into_iter()
        .filter(|(_, names)| names.len() > 1)
        .map(|(dir_name, scenarios)| Collision {
            dir_name,
            scenarios,
        })
        .collect()
}

pub fn render_text(report: &CheckReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "config: {}", report.config_source);
    let _ = writeln!(out, "model: {}", report.model);
    let _ = writeln!(out, "allowed domains: {}", report.allowed_domains.join(", "));
    match (&report.agent_program, &report.agent_error) {
        (Some(program), _) => {
            let _ = writeln!(out, "agent: {program}");
        }
        (None, Some(err)) => {
            let _ = writeln!(out, "agent: ERROR {err}");
        }
        (None, None) => {}
    }
    let _ = writeln!(out, "catalog: {}", report.catalog);
    if let Some(err) = &report.catalog_error {
        let _ = writeln!(out, "  ERROR {err}");
    }
    let _ = writeln!(out, "scenarios: {}", report.scenarios.len());
    for scenario in &report.scenarios {
        let _ = write!(out, "  {:>3}. {} -> {}/", scenario.index + 1, scenario.name, scenario.dir_name);
        if !scenario.placeholders.is_empty() {
            let _ = write!(out, " uses {}", scenario.placeholders.join(" "));
        }
        if !scenario.unknown_placeholders.is_empty() {
            let _ = write!(
                out,
                " (unknown: {})",
                scenario.unknown_placeholders.join(" ")
            );
        }
        out.push('\n');
    }
    for collision in &report.collisions {
        let _ = writeln!(
            out,
            "warning: {} share directory {}/",
            collision.scenarios.join(" | "),
            collision.dir_name
        );
    }
    if !report.missing_secrets.is_empty() {
        let _ = writeln!(
            out,
            "warning: {} not set; placeholders resolve to empty strings",
            report.missing_secrets.join(", ")
        );
    }
    if report.scenarios.is_empty() && report.catalog_error.is_none() {
        let _ = writeln!(out, "no tasks to run");
    }
    out
}
