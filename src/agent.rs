//! Browser agent invocation.
//!
//! The agent is an external command that drives a browser through one
//! scenario and prints its final result on stdout. Its reasoning loop, step
//! limits, and artifact writing are its own business; this module only hands
//! it the task and reads back whatever it reports.
//!
//! # Command Protocol
//!
//! The configured command line is split with shell rules. These placeholders
//! are substituted inside any argument:
//!
//! | placeholder           | value                                   |
//! |-----------------------|-----------------------------------------|
//! | `{task}`              | full prompt; visible in argv, see below |
//! | `{model}`             | model identifier                        |
//! | `{allowed_domains}`   | comma-joined navigation allow-list      |
//! | `{schema}`            | outcome JSON schema                     |
//! | `{gif_path}`          | animated replay path                    |
//! | `{recording_path}`    | session recording path                  |
//! | `{conversation_path}` | conversation transcript path            |
//!
//! Without `{task}` the prompt is written to stdin. The same values are also
//! exported as `AQA_*` environment variables.
//!
//! The prompt carries the resolved secrets. Passed through `{task}` it lands
//! in the child's argv, which other local users can read through `ps` or
//! `/proc`; prefer stdin.
//!
//! Empty stdout means the agent finished without a result. A non-zero exit
//! status is an agent failure.
use crate::templates::{SCENARIO_TASK_PROMPT_MD, TEST_OUTCOME_SCHEMA_JSON};
use crate::util::truncate_string;
use crate::workspace::TaskWorkspace;
use anyhow::{anyhow, Context, Result};
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::time::Instant;

const STDERR_EXCERPT_BYTES: usize = 2000;

/// Everything the agent needs for one scenario.
pub struct AgentTask<'a> {
    pub scenario_name: &'a str,
    /// Resolved description; may contain live secrets.
    pub description: &'a str,
    pub model: &'a str,
    pub allowed_domains: &'a [String],
    pub output_schema: &'a str,
    pub workspace: &'a TaskWorkspace,
}

impl AgentTask<'_> {
    /// Task text followed by the response-format instructions.
    pub fn prompt(&self) -> String {
        let format = SCENARIO_TASK_PROMPT_MD
            .replace("{scenario_name}", self.scenario_name)
            .replace("{schema}", self.output_schema.trim());
        format!("{}\n\n{}", self.description.trim_end(), format)
    }
}

/// Runs one scenario to completion.
///
/// `Ok(None)` means the agent finished without a final result; `Err` means it
/// could not be run or failed.
pub trait Agent: Send + Sync {
    fn run(&self, task: &AgentTask<'_>) -> Result<Option<String>>;
}

pub fn output_schema() -> &'static str {
    TEST_OUTCOME_SCHEMA_JSON
}

/// Agent backed by an external command.
#[derive(Debug, Clone)]
pub struct CommandAgent {
    program: PathBuf,
    args: Vec<String>,
}

impl CommandAgent {
    /// Split the command line and resolve its program on `PATH`.
    pub fn from_command_line(command: &str) -> Result<Self> {
        let mut argv = shell_words::split(command)
            .with_context(|| format!("parse agent command: {command}"))?;
        if argv.is_empty() {
            return Err(anyhow!("agent command is empty"));
        }
        let name = argv.remove(0);
        let program =
            which::which(&name).with_context(|| format!("resolve agent program {name:?}"))?;
        Ok(Self {
            program,
            args: argv,
        })
    }

    pub fn program(&self) -> &PathBuf {
        &self.program
    }

    /// True when the prompt, secrets included, is passed on the command line.
    pub fn passes_task_in_argv(&self) -> bool {
        self.args.iter().any(|arg| arg.contains("{task}"))
    }

    fn render_args(&self, task: &AgentTask<'_>, prompt: &str) -> (Vec<String>, bool) {
        let domains = task.allowed_domains.join(",");
        let gif = task.workspace.gif_path.display().to_string();
        let recording = task.workspace.recording_path.display().to_string();
        let conversation = task.workspace.conversation_path.display().to_string();
        let mut uses_task = false;
        let args: Vec<String> = self
            .args
            .iter()
            .map(|arg| {
                uses_task |= arg.contains("{task}");
                // {task} last so prompt text is never rescanned.
                arg.replace("{model}", task.model)
                    .replace("{allowed_domains}", &domains)
                    .replace("{gif_path}", &gif)
                    .replace("{recording_path}", &recording)
                    .replace("{conversation_path}", &conversation)
                    .replace("{schema}", task.output_schema)
                    .replace("{task}", prompt)
            })
            .collect();
        (args, uses_task)
    }
}

impl Agent for CommandAgent {
    fn run(&self, task: &AgentTask<'_>) -> Result<Option<String>> {
        let prompt = task.prompt();
        let (args, uses_task) = self.render_args(task, &prompt);

        let mut command = Command::new(&self.program);
        command
            .args(&args)
            .env("AQA_SCENARIO_NAME", task.scenario_name)
            .env("AQA_MODEL", task.model)
            .env("AQA_ALLOWED_DOMAINS", task.allowed_domains.join(","))
            .env("AQA_OUTPUT_SCHEMA", task.output_schema)
            .env("AQA_GIF_PATH", &task.workspace.gif_path)
            .env("AQA_RECORDING_PATH", &task.workspace.recording_path)
            .env("AQA_CONVERSATION_PATH", &task.workspace.conversation_path)
            .stdin(if uses_task {
                Stdio::null()
            } else {
                Stdio::piped()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let start = Instant::now();
        let mut child = command
            .spawn()
            .with_context(|| format!("spawn agent {}", self.program.display()))?;
        if let Some(mut stdin) = child.stdin.take() {
            // Agents that take the task as an argument may never read stdin.
            if let Err(err) = stdin.write_all(prompt.as_bytes()) {
                if err.kind() != io::ErrorKind::BrokenPipe {
                    return Err(err).context("write prompt to agent stdin");
                }
            }
        }
        let output = child.wait_with_output().context("wait for agent")?;

        tracing::debug!(
            scenario = %task.scenario_name,
            elapsed_ms = start.elapsed().as_millis() as u64,
            response_bytes = output.stdout.len(),
            "agent exited"
        );

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!(
                "agent exited with {}: {}",
                output.status,
                truncate_string(stderr.trim(), STDERR_EXCERPT_BYTES)
            ));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let result = stdout.trim();
        if result.is_empty() {
            return Ok(None);
        }
        Ok(Some(result.to_string()))
    }
}
