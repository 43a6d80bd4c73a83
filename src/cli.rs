//! CLI argument parsing for the scenario runner.
//!
//! `run` and `check` share one set of config overrides so a dry run sees
//! exactly the configuration a real run would use.
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "aqa",
    version,
    about = "Run natural-language test scenarios through a browser agent",
    after_help = "Commands:\n  run      Execute every scenario in the catalog and write test_results.csv\n  check    Validate config and catalog without invoking the agent\n  schema   Print the outcome JSON schema handed to the agent\n\nExamples:\n  aqa run\n  aqa run --catalog testcases.csv --agent 'browser-agent --model {model}'  (task on stdin)\n  aqa check --json\n  aqa schema > outcome.schema.json",
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct RootArgs {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    Run(RunArgs),
    Check(CheckArgs),
    /// Print the outcome JSON schema handed to the agent
    Schema,
}

/// Config file selection and per-invocation overrides.
#[derive(Args, Debug, Default, Clone)]
pub struct ConfigArgs {
    /// Config file (default: ./agent-qa.json, then the user config dir)
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Scenario catalog CSV
    #[arg(long, value_name = "PATH")]
    pub catalog: Option<PathBuf>,

    /// Root directory for run artifacts
    #[arg(long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Model identifier passed to the agent
    #[arg(long, value_name = "ID")]
    pub model: Option<String>,

    /// URL pattern the agent may navigate to (repeatable; replaces the config list)
    #[arg(long = "allowed-domain", value_name = "PATTERN")]
    pub allowed_domains: Vec<String>,

    /// Agent command line; supports {model}, {schema}, {allowed_domains}, ... (prompt goes on stdin unless {task} is used)
    #[arg(long, value_name = "CMD")]
    pub agent: Option<String>,

    /// Number of scenarios to run at once
    #[arg(long, value_name = "N")]
    pub jobs: Option<usize>,

    /// Log task text after secret substitution (leaks secrets into logs)
    #[arg(long)]
    pub log_resolved_tasks: bool,

    /// Dotenv file to load before reading secrets (default: ./.env if present)
    #[arg(long, value_name = "PATH")]
    pub env_file: Option<PathBuf>,
}

#[derive(Parser, Debug)]
#[command(about = "Execute every scenario in the catalog")]
pub struct RunArgs {
    #[command(flatten)]
    pub config: ConfigArgs,

    /// Emit debug-level progress
    #[arg(long)]
    pub verbose: bool,
}

#[derive(Parser, Debug)]
#[command(about = "Validate config and catalog without invoking the agent")]
pub struct CheckArgs {
    #[command(flatten)]
    pub config: ConfigArgs,

    /// Emit machine-readable JSON output
    #[arg(long)]
    pub json: bool,

    /// Emit debug-level progress
    #[arg(long)]
    pub verbose: bool,
}

impl Command {
    pub fn verbose(&self) -> bool {
        match self {
            Self::Run(args) => args.verbose,
            Self::Check(args) => args.verbose,
            Self::Schema => false,
        }
    }
}
