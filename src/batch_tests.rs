use super::*;
use crate::workspace::open_run_at;
use chrono::{Local, TimeZone};
use std::collections::HashMap;
use std::fs;
use std::io;
use std::sync::Arc;
use std::time::Duration;

/// Log sink shared with a scoped subscriber.
#[derive(Clone, Default)]
struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0
            .lock()
            .expect("log buffer")
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl CapturedLogs {
    fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().expect("log buffer")).into_owned()
    }
}

/// Run `f` with tracing output captured; the batch must run on this thread.
fn with_captured_logs<T>(f: impl FnOnce() -> T) -> (T, String) {
    let logs = CapturedLogs::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_ansi(false)
        .with_max_level(tracing::Level::DEBUG)
        .finish();
    let result = tracing::subscriber::with_default(subscriber, f);
    (result, logs.text())
}

/// Agent double that answers per scenario name and records what it was sent.
#[derive(Default)]
struct ScriptedAgent {
    responses: HashMap<String, Result<Option<String>, String>>,
    delays_ms: HashMap<String, u64>,
    seen: Mutex<Vec<(String, String)>>,
}

impl ScriptedAgent {
    fn respond(mut self, name: &str, response: Result<Option<&str>, &str>) -> Self {
        self.responses.insert(
            name.to_string(),
            response
                .map(|raw| raw.map(str::to_string))
                .map_err(str::to_string),
        );
        self
    }

    fn delay(mut self, name: &str, ms: u64) -> Self {
        self.delays_ms.insert(name.to_string(), ms);
        self
    }

    fn seen(&self) -> Vec<(String, String)> {
        self.seen.lock().expect("seen lock").clone()
    }
}

impl Agent for ScriptedAgent {
    fn run(&self, task: &AgentTask<'_>) -> Result<Option<String>> {
        self.seen
            .lock()
            .expect("seen lock")
            .push((task.scenario_name.to_string(), task.description.to_string()));
        if let Some(ms) = self.delays_ms.get(task.scenario_name) {
            thread::sleep(Duration::from_millis(*ms));
        }
        match self.responses.get(task.scenario_name) {
            Some(Ok(raw)) => Ok(raw.clone()),
            Some(Err(message)) => Err(anyhow!("{message}")),
            None => Ok(None),
        }
    }
}

fn verdict(name: &str, success: bool) -> String {
    format!(
        r#"{{"testcases": [{{"scenario_name": "{name}", "scenario_desc": "checked {name}", "success": {success}, "comments": "observed"}}]}}"#
    )
}

fn scenario(name: &str, description: &str) -> ScenarioDescriptor {
    ScenarioDescriptor {
        name: name.to_string(),
        raw_description: description.to_string(),
    }
}

fn open_run(base: &std::path::Path) -> RunWorkspace {
    let ts = Local
        .with_ymd_and_hms(2025, 3, 14, 9, 26, 53)
        .single()
        .expect("unambiguous local time");
    open_run_at(base, "conversations", ts).expect("open run")
}

fn credentials() -> Credentials {
    Credentials::new(
        Some("alice@example.com".to_string()),
        Some("Secret123".to_string()),
    )
}

fn options(domains: &[String], jobs: usize) -> BatchOptions<'_> {
    BatchOptions {
        model: "test-model",
        allowed_domains: domains,
        jobs,
        log_resolved_tasks: false,
    }
}

fn report_names(path: &std::path::Path) -> Vec<String> {
    let mut reader = csv::Reader::from_path(path).expect("report reader");
    reader
        .deserialize::<TestOutcome>()
        .map(|row| row.expect("row").scenario_name)
        .collect()
}

#[test]
fn login_scenarios_end_to_end() {
    let base = tempfile::tempdir().expect("tempdir");
    let run = open_run(base.path());
    let scenarios = vec![
        scenario("Login Success", "Log in as $TEST_USERNAME"),
        scenario("Login Failure", "Log in with wrong password"),
    ];
    let agent = ScriptedAgent::default()
        .respond("Login Success", Ok(Some(verdict("Login Success", true).as_str())))
        .respond("Login Failure", Ok(Some(verdict("Login Failure", false).as_str())));
    let domains = vec!["http://localhost:8501".to_string()];

    let summary =
        run_batch(&scenarios, &run, &agent, &credentials(), options(&domains, 1)).expect("batch");

    assert!(run.root_dir.join("Login_Success").is_dir());
    assert!(run.root_dir.join("Login_Failure").is_dir());
    let seen = agent.seen();
    assert_eq!(seen[0].1, "Log in as alice@example.com");
    assert_eq!(seen[1].1, "Log in with wrong password");

    assert_eq!(summary.total, 2);
    assert_eq!(summary.parsed, 2);
    assert_eq!(summary.skipped, 0);
    let report = summary.report.expect("report written");
    assert_eq!(report, run.root_dir.join("test_results.csv"));
    assert_eq!(report_names(&report), vec!["Login Success", "Login Failure"]);
}

#[test]
fn unusable_results_are_absent_from_report() {
    let base = tempfile::tempdir().expect("tempdir");
    let run = open_run(base.path());
    let scenarios = vec![
        scenario("Broken JSON", "a"),
        scenario("Silent", "b"),
        scenario("Empty", "c"),
        scenario("Crashed", "d"),
        scenario("Good", "e"),
    ];
    let agent = ScriptedAgent::default()
        .respond("Broken JSON", Ok(Some("{not json")))
        .respond("Silent", Ok(None))
        .respond("Empty", Ok(Some(r#"{"testcases": []}"#)))
        .respond("Crashed", Err("browser crashed"))
        .respond("Good", Ok(Some(verdict("Good", false).as_str())));
    let domains = vec!["http://localhost:8501".to_string()];

    let summary =
        run_batch(&scenarios, &run, &agent, &credentials(), options(&domains, 1)).expect("batch");

    assert_eq!(agent.seen().len(), 5, "batch must continue past failures");
    assert_eq!(summary.parsed, 1);
    assert_eq!(summary.skipped, 4);
    assert!(matches!(
        summary.states[0],
        ScenarioState::Skipped(SkipReason::ResultSchemaInvalid(_))
    ));
    assert_eq!(summary.states[1], ScenarioState::Skipped(SkipReason::NoResult));
    assert_eq!(
        summary.states[2],
        ScenarioState::Skipped(SkipReason::EmptyOutcomes)
    );
    assert!(matches!(
        &summary.states[3],
        ScenarioState::Skipped(SkipReason::AgentFailed(detail)) if detail.contains("browser crashed")
    ));

    let report = summary.report.expect("report written");
    assert_eq!(report_names(&report), vec!["Good"]);
    let text = fs::read_to_string(&report).expect("read report");
    assert_eq!(text.lines().count(), 2);
    assert!(text.contains(",false,"));
}

#[test]
fn no_outcomes_means_no_report_file() {
    let base = tempfile::tempdir().expect("tempdir");
    let run = open_run(base.path());
    let scenarios = vec![scenario("Only", "a")];
    let agent = ScriptedAgent::default().respond("Only", Ok(Some("{not json")));
    let domains = vec!["http://localhost:8501".to_string()];

    let summary =
        run_batch(&scenarios, &run, &agent, &credentials(), options(&domains, 1)).expect("batch");

    assert_eq!(summary.parsed, 0);
    assert!(summary.report.is_none());
    assert!(!run.report_path().exists());
}

#[test]
fn run_log_records_every_terminal_state_without_task_text() {
    let base = tempfile::tempdir().expect("tempdir");
    let run = open_run(base.path());
    let scenarios = vec![
        scenario("Login Success", "Log in as $TEST_USERNAME with $TEST_PASSWORD"),
        scenario("Silent", "b"),
    ];
    let agent = ScriptedAgent::default()
        .respond("Login Success", Ok(Some(verdict("Login Success", true).as_str())));
    let domains = vec!["http://localhost:8501".to_string()];

    run_batch(&scenarios, &run, &agent, &credentials(), options(&domains, 1)).expect("batch");

    let log = fs::read_to_string(run.run_log_path()).expect("read run log");
    let lines: Vec<serde_json::Value> = log
        .lines()
        .map(|line| serde_json::from_str(line).expect("json line"))
        .collect();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0]["state"], "parsed");
    assert_eq!(lines[0]["success"], true);
    assert_eq!(lines[1]["state"], "skipped");
    assert_eq!(lines[1]["reason"], "no_result");
    assert!(!log.contains("alice@example.com"));
    assert!(!log.contains("Secret123"));
    assert!(!log.contains("Log in as"));
}

#[test]
fn parallel_jobs_keep_catalog_order() {
    let base = tempfile::tempdir().expect("tempdir");
    let run = open_run(base.path());
    let names = ["first", "second", "third", "fourth"];
    let scenarios: Vec<ScenarioDescriptor> =
        names.iter().map(|name| scenario(name, "task")).collect();
    let mut agent = ScriptedAgent::default();
    for (idx, name) in names.iter().enumerate() {
        // Earlier scenarios finish last.
        agent = agent
            .respond(name, Ok(Some(verdict(name, true).as_str())))
            .delay(name, 40 * (names.len() - idx) as u64);
    }
    let domains = vec!["http://localhost:8501".to_string()];

    let summary =
        run_batch(&scenarios, &run, &agent, &credentials(), options(&domains, 4)).expect("batch");

    assert_eq!(summary.parsed, 4);
    assert_eq!(
        report_names(&summary.report.expect("report written")),
        names.to_vec()
    );
    assert_eq!(agent.seen().len(), 4);
}

#[test]
fn outcome_is_pinned_to_catalog_name() {
    let base = tempfile::tempdir().expect("tempdir");
    let run = open_run(base.path());
    let scenarios = vec![scenario("Inventory Add", "a")];
    let agent = ScriptedAgent::default()
        .respond("Inventory Add", Ok(Some(verdict("Add inventory item", true).as_str())));
    let domains = vec!["http://localhost:8501".to_string()];

    let summary =
        run_batch(&scenarios, &run, &agent, &credentials(), options(&domains, 1)).expect("batch");

    match &summary.states[0] {
        ScenarioState::Parsed(outcome) => {
            assert_eq!(outcome.scenario_name, "Inventory Add");
            assert_eq!(outcome.scenario_desc, "checked Add inventory item");
        }
        other => panic!("expected parsed outcome, got {other:?}"),
    }
}

#[test]
fn workspace_failure_skips_scenario() {
    let base = tempfile::tempdir().expect("tempdir");
    let run = open_run(base.path());
    // A regular file where the scenario directory should go.
    fs::write(run.root_dir.join("Blocked"), "not a directory").expect("write blocker");
    let scenarios = vec![scenario("Blocked", "a"), scenario("Open", "b")];
    let agent = ScriptedAgent::default().respond("Open", Ok(Some(verdict("Open", true).as_str())));
    let domains = vec!["http://localhost:8501".to_string()];

    let summary =
        run_batch(&scenarios, &run, &agent, &credentials(), options(&domains, 1)).expect("batch");

    assert!(matches!(
        summary.states[0],
        ScenarioState::Skipped(SkipReason::WorkspaceFailed(_))
    ));
    assert_eq!(agent.seen().len(), 1);
    assert_eq!(summary.parsed, 1);
}

#[test]
fn skip_reasons_render_code_and_detail() {
    assert_eq!(SkipReason::NoResult.to_string(), "no_result");
    assert_eq!(
        SkipReason::AgentFailed("exit 3".to_string()).to_string(),
        "agent_failed: exit 3"
    );
}

#[test]
fn echoed_secrets_are_masked_in_logs_and_run_log() {
    let base = tempfile::tempdir().expect("tempdir");
    let run = open_run(base.path());
    let scenarios = vec![
        scenario("Login Success", "Log in as $TEST_USERNAME with $TEST_PASSWORD"),
        scenario("Login Failure", "Log in with wrong password"),
    ];
    let agent = ScriptedAgent::default()
        .respond(
            "Login Success",
            Err("agent exited with exit status: 1: Log in as alice@example.com with Secret123"),
        )
        .respond(
            "Login Failure",
            Ok(Some(
                r#"{"testcases": [{"scenario_name": "Login Failure", "scenario_desc": "x", "success": "Secret123", "comments": ""}]}"#,
            )),
        );
    let domains = vec!["http://localhost:8501".to_string()];

    let (summary, logs) = with_captured_logs(|| {
        run_batch(&scenarios, &run, &agent, &credentials(), options(&domains, 1)).expect("batch")
    });

    assert_eq!(agent.seen()[0].1, "Log in as alice@example.com with Secret123");
    assert_eq!(
        summary.states[0],
        ScenarioState::Skipped(SkipReason::AgentFailed(
            "agent exited with exit status: 1: Log in as [REDACTED] with [REDACTED]".to_string()
        ))
    );
    assert!(matches!(
        summary.states[1],
        ScenarioState::Skipped(SkipReason::ResultSchemaInvalid(_))
    ));
    let run_log = fs::read_to_string(run.run_log_path()).expect("read run log");
    for text in [&run_log, &logs] {
        assert!(!text.contains("alice@example.com"), "{text}");
        assert!(!text.contains("Secret123"), "{text}");
    }
    assert!(run_log.contains("[REDACTED]"));
}

#[test]
fn report_write_failure_logs_rows_and_keeps_run_log() {
    let base = tempfile::tempdir().expect("tempdir");
    let run = open_run(base.path());
    // A directory where the report file should go.
    fs::create_dir_all(run.report_path()).expect("block report path");
    let scenarios = vec![scenario("Login Success", "a"), scenario("Silent", "b")];
    let agent = ScriptedAgent::default()
        .respond("Login Success", Ok(Some(verdict("Login Success", true).as_str())));
    let domains = vec!["http://localhost:8501".to_string()];

    let (result, logs) = with_captured_logs(|| {
        run_batch(&scenarios, &run, &agent, &credentials(), options(&domains, 1))
    });

    let err = result.expect_err("report write must fail");
    assert!(format!("{err:#}").contains("test_results.csv"), "{err:#}");
    assert!(logs.contains("unsaved results"), "{logs}");
    assert!(
        logs.contains("Login Success,checked Login Success,true,observed"),
        "{logs}"
    );

    let run_log = fs::read_to_string(run.run_log_path()).expect("read run log");
    let states: Vec<serde_json::Value> = run_log
        .lines()
        .map(|line| serde_json::from_str(line).expect("json line"))
        .collect();
    assert_eq!(states.len(), 2);
    assert_eq!(states[0]["scenario_name"], "Login Success");
    assert_eq!(states[0]["state"], "parsed");
}
