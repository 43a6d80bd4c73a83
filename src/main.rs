use anyhow::{Context, Result};
use clap::Parser;
use std::env;
use std::io::IsTerminal;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

mod agent;
mod batch;
mod catalog;
mod check;
mod cli;
mod config;
mod credentials;
mod outcome;
mod report;
mod run_log;
mod templates;
mod util;
mod workspace;

use agent::CommandAgent;
use batch::{BatchOptions, ScenarioState};
use cli::{CheckArgs, Command, ConfigArgs, RootArgs, RunArgs};
use config::{ConfigSource, RunnerConfig};
use credentials::Credentials;

/// Exit status when the catalog yields nothing to run.
const EXIT_NO_TASKS: u8 = 2;

fn main() -> ExitCode {
    let args = RootArgs::parse();
    init_tracing(args.command.verbose());

    let result = match args.command {
        Command::Run(args) => cmd_run(args),
        Command::Check(args) => cmd_check(args),
        Command::Schema => cmd_schema(),
    };
    match result {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "aqa=debug"
    } else {
        "aqa=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .with_target(false)
        .init();
}

/// Load the env file, resolve config, and read secrets once per invocation.
fn prepare(args: &ConfigArgs) -> Result<(RunnerConfig, ConfigSource, Credentials)> {
    let cwd = env::current_dir().context("resolve cwd for env file")?;
    if let Some(path) = config::load_env_file(args.env_file.as_deref(), &cwd)? {
        tracing::debug!(env_file = %path.display(), "loaded env file");
    }
    let (config, source) = config::resolve_config(args)?;
    tracing::debug!(config = %source, "resolved config");
    Ok((config, source, Credentials::from_env()))
}

fn cmd_run(args: RunArgs) -> Result<ExitCode> {
    let (config, _source, credentials) = prepare(&args.config)?;

    let scenarios = catalog::load_scenarios(&config.input_catalog_path);
    if scenarios.is_empty() {
        tracing::error!("no tasks found or loaded; nothing to run");
        return Ok(ExitCode::from(EXIT_NO_TASKS));
    }

    let agent = CommandAgent::from_command_line(&config.agent_command)?;
    if agent.passes_task_in_argv() {
        tracing::warn!(
            "agent command passes {{task}} as an argument; secrets in the prompt are visible \
             to other local users through the process list. Omit {{task}} to send it on stdin"
        );
    }
    let run = workspace::open_run(&config.output_base_dir, &config.conversations_subdir)?;
    let run_dir = run
        .root_dir
        .canonicalize()
        .unwrap_or_else(|_| run.root_dir.clone());
    tracing::info!(run_dir = %run_dir.display(), "artifacts for this run");

    let summary = batch::run_batch(
        &scenarios,
        &run,
        &agent,
        &credentials,
        BatchOptions {
            model: &config.model,
            allowed_domains: &config.allowed_domains,
            jobs: config.jobs,
            log_resolved_tasks: config.log_resolved_tasks,
        },
    )?;

    for (scenario, state) in scenarios.iter().zip(&summary.states) {
        if let ScenarioState::Skipped(reason) = state {
            println!("skipped: {} ({})", scenario.name, reason.code());
        }
    }
    println!("run: {}", summary.run_dir.display());
    println!(
        "scenarios: {} parsed, {} skipped, {} total",
        summary.parsed, summary.skipped, summary.total
    );
    match &summary.report {
        Some(path) => println!("report: {}", path.display()),
        None => println!("report: none (no results to save)"),
    }
    Ok(ExitCode::SUCCESS)
}

fn cmd_check(args: CheckArgs) -> Result<ExitCode> {
    let (config, source, credentials) = prepare(&args.config)?;
    let report = check::build_check_report(
        &config,
        &source,
        catalog::load_catalog(&config.input_catalog_path),
        CommandAgent::from_command_line(&config.agent_command),
        &credentials,
    );

    if args.json {
        let text = serde_json::to_string_pretty(&report).context("serialize check report")?;
        println!("{text}");
    } else {
        print!("{}", check::render_text(&report));
    }

    if report.is_runnable() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::from(EXIT_NO_TASKS))
    }
}

fn cmd_schema() -> Result<ExitCode> {
    print!("{}", agent::output_schema());
    Ok(ExitCode::SUCCESS)
}
