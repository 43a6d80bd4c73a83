//! Runner configuration.
//!
//! Resolution order, first match wins for the file:
//! 1. `--config <PATH>`
//! 2. `./agent-qa.json`
//! 3. `<user config dir>/agent-qa/config.json`
//! 4. built-in defaults
//!
//! CLI flags then override individual fields, and `AQA_AGENT_COMMAND` supplies
//! the agent command when `--agent` is not given. Relative paths are resolved
//! against the working directory.
use crate::cli::ConfigArgs;
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::fs;
use std::path::{Component, Path, PathBuf};

pub const CONFIG_FILE_NAME: &str = "agent-qa.json";
pub const USER_CONFIG_DIR: &str = "agent-qa";
pub const AGENT_COMMAND_ENV: &str = "AQA_AGENT_COMMAND";
pub const ENV_FILE_NAME: &str = ".env";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunnerConfig {
    pub input_catalog_path: PathBuf,
    pub output_base_dir: PathBuf,
    pub conversations_subdir: String,
    pub model: String,
    /// Navigation allow-list enforced by the agent.
    pub allowed_domains: Vec<String>,
    pub agent_command: String,
    pub jobs: usize,
    pub log_resolved_tasks: bool,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            input_catalog_path: PathBuf::from("testcases.csv"),
            output_base_dir: PathBuf::from("test_artifacts"),
            conversations_subdir: "conversations".to_string(),
            model: "gemini-2.5-flash".to_string(),
            allowed_domains: vec![
                "http://localhost:8501".to_string(),
                "http://localhost:8501/*".to_string(),
            ],
            agent_command: "browser-agent --model {model} --allowed-domains {allowed_domains}"
                .to_string(),
            jobs: 1,
            log_resolved_tasks: false,
        }
    }
}

/// Where the effective config file came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    Explicit(PathBuf),
    Local(PathBuf),
    User(PathBuf),
    Defaults,
}

impl ConfigSource {
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::Explicit(path) | Self::Local(path) | Self::User(path) => Some(path),
            Self::Defaults => None,
        }
    }
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.path() {
            Some(path) => write!(f, "{}", path.display()),
            None => write!(f, "built-in defaults"),
        }
    }
}

/// Pick the config file to load. An explicit path must exist.
pub fn locate_config(
    explicit: Option<&Path>,
    cwd: &Path,
    user_config_dir: Option<&Path>,
) -> Result<ConfigSource> {
    if let Some(path) = explicit {
        if !path.is_file() {
            return Err(anyhow!("config file {} not found", path.display()));
        }
        return Ok(ConfigSource::Explicit(path.to_path_buf()));
    }
    let local = cwd.join(CONFIG_FILE_NAME);
    if local.is_file() {
        return Ok(ConfigSource::Local(local));
    }
    if let Some(dir) = user_config_dir {
        let user = dir.join(USER_CONFIG_DIR).join("config.json");
        if user.is_file() {
            return Ok(ConfigSource::User(user));
        }
    }
    Ok(ConfigSource::Defaults)
}

pub fn load_config_file(path: &Path) -> Result<RunnerConfig> {
    let bytes = fs::read(path).with_context(|| format!("read config {}", path.display()))?;
    serde_json::from_slice(&bytes).with_context(|| format!("parse config {}", path.display()))
}

impl RunnerConfig {
    /// Apply CLI flags, then the agent command from the environment.
    pub fn apply_overrides(&mut self, args: &ConfigArgs, env_agent_command: Option<String>) {
        if let Some(catalog) = &args.catalog {
            self.input_catalog_path = catalog.clone();
        }
        if let Some(output_dir) = &args.output_dir {
            self.output_base_dir = output_dir.clone();
        }
        if let Some(model) = &args.model {
            self.model = model.clone();
        }
        if !args.allowed_domains.is_empty() {
            self.allowed_domains = args.allowed_domains.clone();
        }
        match (&args.agent, env_agent_command) {
            (Some(agent), _) => self.agent_command = agent.clone(),
            (None, Some(agent)) if !agent.trim().is_empty() => self.agent_command = agent,
            _ => {}
        }
        if let Some(jobs) = args.jobs {
            self.jobs = jobs;
        }
        if args.log_resolved_tasks {
            self.log_resolved_tasks = true;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.model.trim().is_empty() {
            return Err(anyhow!("model must be non-empty"));
        }
        if self.allowed_domains.is_empty() {
            return Err(anyhow!(
                "allowed_domains must list at least one URL pattern the agent may visit"
            ));
        }
        if let Some(blank) = self
            .allowed_domains
            .iter()
            .position(|domain| domain.trim().is_empty())
        {
            return Err(anyhow!("allowed_domains[{blank}] is empty"));
        }
        let argv = shell_words::split(&self.agent_command)
            .with_context(|| format!("parse agent_command: {}", self.agent_command))?;
        if argv.is_empty() {
            return Err(anyhow!("agent_command must be non-empty"));
        }
        if self.jobs == 0 {
            return Err(anyhow!("jobs must be at least 1"));
        }
        validate_subdir(&self.conversations_subdir)?;
        Ok(())
    }
}

fn validate_subdir(name: &str) -> Result<()> {
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        _ => Err(anyhow!(
            "conversations_subdir must be a single directory name (got {name:?})"
        )),
    }
}

/// Load, override, and validate the config for this invocation.
pub fn resolve_config(args: &ConfigArgs) -> Result<(RunnerConfig, ConfigSource)> {
    let cwd = env::current_dir().context("resolve cwd for config")?;
    let user_dir = dirs::config_dir();
    let source = locate_config(args.config.as_deref(), &cwd, user_dir.as_deref())?;
    let mut config = match source.path() {
        Some(path) => load_config_file(path)?,
        None => RunnerConfig::default(),
    };
    config.apply_overrides(args, env::var(AGENT_COMMAND_ENV).ok());
    config
        .validate()
        .with_context(|| format!("invalid config ({source})"))?;
    Ok((config, source))
}

/// Load secrets from a dotenv file, overriding variables already set.
///
/// Returns the file that was loaded, if any. An explicit file must exist.
pub fn load_env_file(explicit: Option<&Path>, cwd: &Path) -> Result<Option<PathBuf>> {
    let path = match explicit {
        Some(path) => {
            if !path.is_file() {
                return Err(anyhow!("env file {} not found", path.display()));
            }
            path.to_path_buf()
        }
        None => {
            let local = cwd.join(ENV_FILE_NAME);
            if !local.is_file() {
                return Ok(None);
            }
            local
        }
    };
    dotenvy::from_path_override(&path)
        .with_context(|| format!("load env file {}", path.display()))?;
    Ok(Some(path))
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
