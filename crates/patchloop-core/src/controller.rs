//! Sequential batch driver.

use std::path::PathBuf;
use std::sync::Arc;

use patchloop_proto::{ErrorRecord, Oracle, Phase, TestHarness};
use tracing::{error, info};

use crate::config::PatchloopConfig;
use crate::machine::PhaseMachine;
use crate::project::ProjectContext;
use crate::registry::project_name;
use crate::telemetry::{UsageLog, new_run_id};

/// How one project ended.
#[derive(Debug, Clone)]
pub struct ProjectOutcome {
    pub name: String,
    pub root: PathBuf,
    /// `Completed` or `Failed`.
    pub phase: Phase,
    /// Failed validations consumed.
    pub iterations: u32,
    /// Failure records still held in the project's history.
    pub errors: Vec<ErrorRecord>,
    /// Set when the project could not be attempted at all.
    pub error: Option<String>,
}

impl ProjectOutcome {
    pub fn is_completed(&self) -> bool {
        self.phase == Phase::Completed
    }
}

/// Outcome of one batch.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: String,
    pub outcomes: Vec<ProjectOutcome>,
}

impl RunReport {
    pub fn completed(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_completed()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.completed()
    }

    /// True if every project completed. An empty batch counts as success.
    pub fn all_completed(&self) -> bool {
        self.failed() == 0
    }
}

/// Runs projects one after another, each to a terminal phase.
pub struct Controller {
    config: PatchloopConfig,
    oracle: Arc<dyn Oracle>,
    harness: Arc<dyn TestHarness>,
    usage_log: Option<UsageLog>,
    run_id: String,
}

impl Controller {
    pub fn new(
        config: PatchloopConfig,
        oracle: Arc<dyn Oracle>,
        harness: Arc<dyn TestHarness>,
    ) -> Self {
        Self {
            config,
            oracle,
            harness,
            usage_log: None,
            run_id: new_run_id(),
        }
    }

    #[must_use]
    pub fn with_usage_log(mut self, log: UsageLog) -> Self {
        self.usage_log = Some(log);
        self
    }

    #[must_use]
    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = run_id.into();
        self
    }

    /// Drives every project in `roots`, in order.
    pub async fn run(&self, roots: Vec<PathBuf>) -> RunReport {
        let mut machine = PhaseMachine::new(&self.config, self.oracle.as_ref(), self.harness.as_ref());
        if let Some(log) = &self.usage_log {
            machine = machine.with_usage_log(log, &self.run_id);
        }

        info!(run_id = %self.run_id, projects = roots.len(), "Starting run");

        let mut outcomes = Vec::with_capacity(roots.len());
        for root in roots {
            let outcome = if root.is_dir() {
                let mut project =
                    ProjectContext::new(root, self.config.repair_loop.error_history_iterations);
                info!(project = %project.name(), "Processing project");
                let phase = machine.drive(&mut project).await;
                info!(project = %project.name(), phase = %phase, iterations = project.iteration(), "Project finished");
                ProjectOutcome {
                    name: project.name().to_string(),
                    phase,
                    iterations: project.iteration(),
                    errors: project.history().records().cloned().collect(),
                    error: None,
                    root: project.root().to_path_buf(),
                }
            } else {
                let message = format!("{} is not a directory", root.display());
                error!(project = %project_name(&root), "{message}");
                ProjectOutcome {
                    name: project_name(&root).to_string(),
                    root,
                    phase: Phase::Failed,
                    iterations: 0,
                    errors: Vec::new(),
                    error: Some(message),
                }
            };
            outcomes.push(outcome);
        }

        let report = RunReport {
            run_id: self.run_id.clone(),
            outcomes,
        };
        info!(
            run_id = %report.run_id,
            completed = report.completed(),
            failed = report.failed(),
            "Run finished"
        );
        report
    }
}
