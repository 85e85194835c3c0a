//! End-to-end tests of the repair loop with scripted oracle and harness.

use std::collections::{HashMap, VecDeque};
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use patchloop_core::{
    Controller, PatchloopConfig, PhaseMachine, ProjectContext, UsageLog, summarize,
};
use patchloop_proto::{
    ErrorCategory, Oracle, OracleError, OracleRequest, OracleResponse, Phase, TestHarness,
    TestRun, TokenUsage,
};
use tempfile::TempDir;

/// Oracle answering from per-phase queues. Empty queues answer "".
#[derive(Default)]
struct ScriptedOracle {
    script: Mutex<HashMap<Phase, VecDeque<Result<OracleResponse, OracleError>>>>,
    requests: Mutex<Vec<OracleRequest>>,
}

impl ScriptedOracle {
    fn reply(self, phase: Phase, text: &str) -> Self {
        self.push(phase, Ok(OracleResponse::text(text)))
    }

    fn fail(self, phase: Phase, error: OracleError) -> Self {
        self.push(phase, Err(error))
    }

    fn push(self, phase: Phase, entry: Result<OracleResponse, OracleError>) -> Self {
        self.script
            .lock()
            .unwrap()
            .entry(phase)
            .or_default()
            .push_back(entry);
        self
    }

    fn requests_for(&self, phase: Phase) -> Vec<OracleRequest> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.phase == phase)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl Oracle for ScriptedOracle {
    async fn complete(&self, request: &OracleRequest) -> Result<OracleResponse, OracleError> {
        self.requests.lock().unwrap().push(request.clone());
        self.script
            .lock()
            .unwrap()
            .get_mut(&request.phase)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| Ok(OracleResponse::text("")))
    }

    fn model(&self) -> &str {
        "scripted"
    }
}

/// Harness returning queued runs, then failing forever.
#[derive(Default)]
struct ScriptedHarness {
    runs: Mutex<VecDeque<TestRun>>,
    calls: Mutex<u32>,
}

impl ScriptedHarness {
    fn then(self, run: TestRun) -> Self {
        self.runs.lock().unwrap().push_back(run);
        self
    }

    fn calls(&self) -> u32 {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl TestHarness for ScriptedHarness {
    async fn run(&self, _project_root: &Path) -> TestRun {
        *self.calls.lock().unwrap() += 1;
        self.runs.lock().unwrap().pop_front().unwrap_or_else(|| {
            TestRun::failed(
                "FAILED tests/test_app.py::test_add - AssertionError: 2 != 3\n1 failed",
                Duration::from_millis(5),
            )
        })
    }
}

fn passed() -> TestRun {
    TestRun::passed("1 passed", Duration::from_millis(5))
}

fn project(parent: &Path, name: &str) -> std::path::PathBuf {
    let root = parent.join(name);
    fs::create_dir_all(root.join("tests")).unwrap();
    fs::write(root.join("README.md"), "# Adder\nImplement add(a, b).\n").unwrap();
    fs::write(root.join("app.py"), "def add(a, b):\n    return a - b\n").unwrap();
    fs::write(
        root.join("tests/test_app.py"),
        "from app import add\n\ndef test_add():\n    assert add(1, 2) == 3\n",
    )
    .unwrap();
    root
}

const FIX: &str = "```diff\n--- a/app.py\n+++ b/app.py\n@@ -1,2 +1,2 @@\n def add(a, b):\n-    return a - b\n+    return a + b\n```";

fn config(max_iterations: u32) -> PatchloopConfig {
    let mut config = PatchloopConfig::default();
    config.repair_loop.max_iterations = max_iterations;
    config
}

fn count(trail: &[Phase], phase: Phase) -> usize {
    trail.iter().filter(|p| **p == phase).count()
}

#[tokio::test]
async fn test_passing_first_validation_completes_without_retries() {
    let dir = TempDir::new().unwrap();
    let root = project(dir.path(), "adder");
    let oracle = ScriptedOracle::default()
        .reply(Phase::Understand, "add must sum")
        .reply(Phase::Plan, "1. fix app.py")
        .reply(Phase::Code, FIX);
    let harness = ScriptedHarness::default().then(passed());
    let config = config(4);

    let machine = PhaseMachine::new(&config, &oracle, &harness);
    let mut ctx = ProjectContext::new(&root, 4);
    let phase = machine.drive(&mut ctx).await;

    assert_eq!(phase, Phase::Completed);
    assert_eq!(ctx.iteration(), 0);
    assert_eq!(
        ctx.trail(),
        &[
            Phase::Understand,
            Phase::Plan,
            Phase::Code,
            Phase::Validate,
            Phase::Completed
        ]
    );
    assert!(ctx.history().is_empty());
    assert_eq!(
        fs::read_to_string(root.join("app.py")).unwrap(),
        "def add(a, b):\n    return a + b\n"
    );

    // Each phase sees what the previous one produced.
    let code = &oracle.requests_for(Phase::Code)[0];
    assert!(code.context.contains("add must sum"));
    assert!(code.context.contains("1. fix app.py"));
    assert!(code.system.contains("unified diff"));
}

#[tokio::test]
async fn test_persistent_failure_stops_after_max_iterations() {
    let dir = TempDir::new().unwrap();
    let root = project(dir.path(), "adder");
    let oracle = ScriptedOracle::default();
    let harness = ScriptedHarness::default();
    let config = config(3);

    let machine = PhaseMachine::new(&config, &oracle, &harness);
    let mut ctx = ProjectContext::new(&root, 4);
    let phase = machine.drive(&mut ctx).await;

    assert_eq!(phase, Phase::Failed);
    assert_eq!(ctx.iteration(), 3);
    assert_eq!(harness.calls(), 3);
    assert_eq!(count(ctx.trail(), Phase::Validate), 3);
    assert_eq!(count(ctx.trail(), Phase::IdentifyErrors), 2);
    assert_eq!(ctx.trail().last(), Some(&Phase::Failed));

    // Empty patch responses are recorded and take precedence over the test failure.
    let categories: Vec<ErrorCategory> = ctx.history().records().map(|r| r.category()).collect();
    assert_eq!(categories, vec![ErrorCategory::PatchApplyFailure; 3]);
}

#[tokio::test]
async fn test_failure_feedback_reaches_next_oracle_call() {
    let dir = TempDir::new().unwrap();
    let root = project(dir.path(), "adder");
    let no_op = "--- a/README.md\n+++ b/README.md\n@@ -1 +1 @@\n # Adder\n";
    let oracle = ScriptedOracle::default()
        .reply(Phase::Code, no_op)
        .reply(Phase::IdentifyErrors, "add subtracts")
        .reply(Phase::FixErrors, FIX);
    let harness = ScriptedHarness::default()
        .then(TestRun::failed(
            "FAILED tests/test_app.py::test_add - AssertionError: -1 != 3\n1 failed",
            Duration::from_millis(5),
        ))
        .then(passed());
    let config = config(4);

    let machine = PhaseMachine::new(&config, &oracle, &harness);
    let mut ctx = ProjectContext::new(&root, 4);
    let phase = machine.drive(&mut ctx).await;

    assert_eq!(phase, Phase::Completed);
    assert_eq!(ctx.iteration(), 1);

    let records: Vec<_> = ctx.history().records().collect();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].iteration(), 0);
    assert_eq!(records[0].category(), ErrorCategory::TestFailure);
    assert_eq!(
        records[0].message(),
        "FAILED tests/test_app.py::test_add - AssertionError: -1 != 3"
    );

    let identify = &oracle.requests_for(Phase::IdentifyErrors)[0];
    assert!(identify.context.contains("PREVIOUS ITERATION ERRORS"));
    assert!(identify.context.contains("Iteration 1: TestFailure"));
    assert!(identify.context.contains("AssertionError: -1 != 3\n1 failed"));

    let fix = &oracle.requests_for(Phase::FixErrors)[0];
    assert!(fix.context.contains("add subtracts"));
}

#[tokio::test]
async fn test_patch_failure_takes_precedence_over_test_failure() {
    let dir = TempDir::new().unwrap();
    let root = project(dir.path(), "adder");
    let stale = "--- a/app.py\n+++ b/app.py\n@@ -1,2 +1,2 @@\n def sub(a, b):\n-    return a - b\n+    return a + b\n";
    let oracle = ScriptedOracle::default()
        .reply(Phase::Code, stale)
        .reply(Phase::FixErrors, FIX);
    let harness = ScriptedHarness::default()
        .then(TestRun::failed("1 failed", Duration::from_millis(5)))
        .then(passed());
    let config = config(4);

    let machine = PhaseMachine::new(&config, &oracle, &harness);
    let mut ctx = ProjectContext::new(&root, 4);
    machine.drive(&mut ctx).await;

    assert_eq!(ctx.phase(), Phase::Completed);
    let records: Vec<_> = ctx.history().records().collect();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].category(), ErrorCategory::PatchApplyFailure);
    assert!(records[0].message().contains("app.py"));
    assert!(!ctx.history().has(0, ErrorCategory::TestFailure));
    // The rejected diff left the file untouched until the fix applied.
    assert!(fs::read_to_string(root.join("app.py"))
        .unwrap()
        .contains("a + b"));
}

#[tokio::test]
async fn test_oracle_failures_are_recovered() {
    let dir = TempDir::new().unwrap();
    let root = project(dir.path(), "adder");
    let oracle = ScriptedOracle::default()
        .fail(Phase::Understand, OracleError::Timeout(300))
        .fail(
            Phase::Code,
            OracleError::Status {
                status: 503,
                body: "overloaded".into(),
            },
        )
        .reply(Phase::FixErrors, FIX);
    let harness = ScriptedHarness::default()
        .then(TestRun::failed("1 failed", Duration::from_millis(5)))
        .then(passed());
    let config = config(4);

    let machine = PhaseMachine::new(&config, &oracle, &harness);
    let mut ctx = ProjectContext::new(&root, 4);
    let phase = machine.drive(&mut ctx).await;

    assert_eq!(phase, Phase::Completed);
    assert_eq!(ctx.iteration(), 1);
    let records: Vec<_> = ctx.history().records().collect();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].category(), ErrorCategory::OracleFailure);
    assert!(records[0].message().contains("503"));
}

#[tokio::test]
async fn test_timeout_consumes_exactly_one_iteration() {
    let dir = TempDir::new().unwrap();
    let root = project(dir.path(), "adder");
    let oracle = ScriptedOracle::default()
        .reply(Phase::Code, FIX)
        .reply(Phase::FixErrors, FIX);
    let harness = ScriptedHarness::default()
        .then(TestRun::timed_out(Duration::from_secs(1)))
        .then(passed());
    let config = config(4);

    let machine = PhaseMachine::new(&config, &oracle, &harness);
    let mut ctx = ProjectContext::new(&root, 4);
    machine.drive(&mut ctx).await;

    assert_eq!(ctx.phase(), Phase::Completed);
    assert_eq!(ctx.iteration(), 1);
    let records: Vec<_> = ctx.history().records().collect();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].category(), ErrorCategory::TestFailure);
    assert_eq!(records[0].message(), "tests timed out after 1s");
}

#[tokio::test]
async fn test_history_is_bounded() {
    let dir = TempDir::new().unwrap();
    let root = project(dir.path(), "adder");
    let oracle = ScriptedOracle::default();
    let harness = ScriptedHarness::default();
    let config = config(5);

    let machine = PhaseMachine::new(&config, &oracle, &harness);
    let mut ctx = ProjectContext::new(&root, 2);
    machine.drive(&mut ctx).await;

    assert_eq!(ctx.iteration(), 5);
    let iterations: Vec<u32> = ctx.history().records().map(|r| r.iteration()).collect();
    assert_eq!(iterations, vec![3, 4]);
}

#[tokio::test]
async fn test_controller_runs_projects_in_order_and_reports() {
    let dir = TempDir::new().unwrap();
    let good = project(dir.path(), "a-good");
    let bad = project(dir.path(), "b-bad");
    let missing = dir.path().join("c-missing");

    let oracle = Arc::new(
        ScriptedOracle::default()
            .push(
                Phase::Code,
                Ok(OracleResponse {
                    text: FIX.to_string(),
                    usage: Some(TokenUsage {
                        prompt_tokens: 100,
                        completion_tokens: 20,
                        total_tokens: 120,
                    }),
                    model: None,
                }),
            ),
    );
    // First project passes at once; the second never does.
    let harness = Arc::new(ScriptedHarness::default().then(passed()));
    let log = UsageLog::open(&dir.path().join("runs")).unwrap();

    let controller = Controller::new(config(2), oracle.clone(), harness.clone())
        .with_usage_log(log.clone())
        .with_run_id("run_test");
    let report = controller.run(vec![good, bad, missing]).await;

    assert_eq!(report.run_id, "run_test");
    let summary: Vec<(&str, Phase, u32)> = report
        .outcomes
        .iter()
        .map(|o| (o.name.as_str(), o.phase, o.iterations))
        .collect();
    assert_eq!(
        summary,
        vec![
            ("a-good", Phase::Completed, 0),
            ("b-bad", Phase::Failed, 2),
            ("c-missing", Phase::Failed, 0),
        ]
    );
    assert!(report.outcomes[2].error.is_some());
    assert!(!report.all_completed());
    assert_eq!(report.completed(), 1);

    let records = log.read_all().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].project, "a-good");
    assert_eq!(records[0].model, "scripted");
    assert_eq!(
        summarize(&records, Some("run_test"))[&("a-good".to_string(), Phase::Code)].total_tokens,
        120
    );
}
