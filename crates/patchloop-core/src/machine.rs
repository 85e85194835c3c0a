//! The per-project phase state machine.
//!
//! Each state carries only the data its handler needs. [`PhaseMachine::step`]
//! takes the current state out of the project, dispatches it to exactly one
//! handler and stores whatever state that handler returns.

use patchloop_proto::{
    ErrorCategory, Oracle, OracleError, OracleRequest, OracleResponse, Phase, TestHarness,
    TestStatus,
};
use tracing::{debug, error, info, warn};

use crate::config::PatchloopConfig;
use crate::context::{ContextBuilder, PhaseNotes};
use crate::diff::{self, ApplyError, PatchError};
use crate::history::summarize_test_output;
use crate::project::ProjectContext;
use crate::telemetry::{UsageLog, UsageRecord};

/// A phase together with its live payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhaseState {
    Understand,
    Plan { understanding: String },
    Code { understanding: String, plan: String },
    Validate { plan: String },
    IdentifyErrors { plan: String },
    FixErrors { plan: String, analysis: String },
    Completed,
    Failed,
}

impl PhaseState {
    pub fn phase(&self) -> Phase {
        match self {
            PhaseState::Understand => Phase::Understand,
            PhaseState::Plan { .. } => Phase::Plan,
            PhaseState::Code { .. } => Phase::Code,
            PhaseState::Validate { .. } => Phase::Validate,
            PhaseState::IdentifyErrors { .. } => Phase::IdentifyErrors,
            PhaseState::FixErrors { .. } => Phase::FixErrors,
            PhaseState::Completed => Phase::Completed,
            PhaseState::Failed => Phase::Failed,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.phase().is_terminal()
    }
}

/// Drives projects through the repair workflow.
pub struct PhaseMachine<'a> {
    oracle: &'a dyn Oracle,
    harness: &'a dyn TestHarness,
    context: ContextBuilder<'a>,
    max_iterations: u32,
    usage: Option<(&'a UsageLog, &'a str)>,
}

impl<'a> PhaseMachine<'a> {
    pub fn new(
        config: &'a PatchloopConfig,
        oracle: &'a dyn Oracle,
        harness: &'a dyn TestHarness,
    ) -> Self {
        Self {
            oracle,
            harness,
            context: ContextBuilder::new(&config.context, &config.projects.spec_file),
            max_iterations: config.repair_loop.max_iterations,
            usage: None,
        }
    }

    /// Records token usage of every oracle call under `run_id`.
    #[must_use]
    pub fn with_usage_log(mut self, log: &'a UsageLog, run_id: &'a str) -> Self {
        self.usage = Some((log, run_id));
        self
    }

    /// Steps `project` until it reaches `Completed` or `Failed`.
    pub async fn drive(&self, project: &mut ProjectContext) -> Phase {
        while !project.state.is_terminal() {
            self.step(project).await;
        }
        project.phase()
    }

    /// Executes the current phase once. Terminal states are left as they are.
    pub async fn step(&self, project: &mut ProjectContext) {
        if project.state.is_terminal() {
            return;
        }

        let state = std::mem::replace(&mut project.state, PhaseState::Failed);
        let next = match state {
            PhaseState::Understand => self.understand(project).await,
            PhaseState::Plan { understanding } => self.plan(project, understanding).await,
            PhaseState::Code {
                understanding,
                plan,
            } => self.code(project, &understanding, plan).await,
            PhaseState::Validate { plan } => self.validate(project, plan).await,
            PhaseState::IdentifyErrors { plan } => self.identify_errors(project, plan).await,
            PhaseState::FixErrors { plan, analysis } => {
                self.fix_errors(project, plan, &analysis).await
            }
            terminal @ (PhaseState::Completed | PhaseState::Failed) => terminal,
        };
        project.transition(next);
    }

    async fn understand(&self, project: &mut ProjectContext) -> PhaseState {
        let understanding = self
            .analyze(project, Phase::Understand, PhaseNotes::default())
            .await;
        PhaseState::Plan { understanding }
    }

    async fn plan(&self, project: &mut ProjectContext, understanding: String) -> PhaseState {
        let notes = PhaseNotes {
            understanding: Some(&understanding),
            ..PhaseNotes::default()
        };
        let plan = self.analyze(project, Phase::Plan, notes).await;
        PhaseState::Code {
            understanding,
            plan,
        }
    }

    async fn code(
        &self,
        project: &mut ProjectContext,
        understanding: &str,
        plan: String,
    ) -> PhaseState {
        let notes = PhaseNotes {
            understanding: Some(understanding),
            plan: Some(&plan),
            analysis: None,
        };
        self.patch(project, Phase::Code, notes).await;
        PhaseState::Validate { plan }
    }

    async fn validate(&self, project: &mut ProjectContext, plan: String) -> PhaseState {
        let run = self.harness.run(project.root()).await;
        info!(
            project = %project.name(),
            status = ?run.status,
            duration_ms = run.duration.as_millis(),
            "Test run finished"
        );

        let message = match run.status {
            TestStatus::Passed => None,
            TestStatus::Failed => Some(summarize_test_output(&run.output)),
            TestStatus::TimedOut => Some(run.output.clone()),
        };
        project.last_test_output = Some(run.output);

        let Some(message) = message else {
            return PhaseState::Completed;
        };

        if !project.history.has_superseding_record(project.iteration) {
            project.record(ErrorCategory::TestFailure, message);
        }
        project.iteration += 1;

        if project.iteration >= self.max_iterations {
            warn!(
                project = %project.name(),
                iterations = project.iteration,
                "Iteration budget exhausted"
            );
            PhaseState::Failed
        } else {
            PhaseState::IdentifyErrors { plan }
        }
    }

    async fn identify_errors(&self, project: &mut ProjectContext, plan: String) -> PhaseState {
        let notes = PhaseNotes {
            plan: Some(&plan),
            ..PhaseNotes::default()
        };
        let analysis = self.analyze(project, Phase::IdentifyErrors, notes).await;
        PhaseState::FixErrors { plan, analysis }
    }

    async fn fix_errors(
        &self,
        project: &mut ProjectContext,
        plan: String,
        analysis: &str,
    ) -> PhaseState {
        let notes = PhaseNotes {
            understanding: None,
            plan: Some(&plan),
            analysis: Some(analysis),
        };
        self.patch(project, Phase::FixErrors, notes).await;
        PhaseState::Validate { plan }
    }

    /// Analysis phases: the response text is carried to the next phase.
    /// Oracle failures yield an empty analysis.
    async fn analyze(
        &self,
        project: &ProjectContext,
        phase: Phase,
        notes: PhaseNotes<'_>,
    ) -> String {
        match self.ask(project, phase, notes).await {
            Ok(text) => text,
            Err(e) => {
                warn!(project = %project.name(), phase = %phase, error = %e, "Oracle call failed; continuing without analysis");
                String::new()
            }
        }
    }

    /// Patch phases: the response is applied as a diff. Failures are recorded
    /// against the current iteration and never stop the workflow.
    async fn patch(&self, project: &mut ProjectContext, phase: Phase, notes: PhaseNotes<'_>) {
        let text = match self.ask(project, phase, notes).await {
            Ok(text) => text,
            Err(e) => {
                warn!(project = %project.name(), phase = %phase, error = %e, "Oracle call failed");
                project.record(ErrorCategory::OracleFailure, e.to_string());
                return;
            }
        };

        match diff::apply_text(project.root(), &text) {
            Ok(applied) => {
                info!(
                    project = %project.name(),
                    files = applied.changed_paths.len(),
                    "Applied diff"
                );
            }
            Err(e) => {
                if let PatchError::Apply(ApplyError::Io { .. }) = &e {
                    error!(project = %project.name(), error = %e, "Filesystem failure while applying diff");
                } else {
                    warn!(project = %project.name(), error = %e, "Diff was not applied");
                }
                project.record(ErrorCategory::PatchApplyFailure, e.to_string());
            }
        }
    }

    async fn ask(
        &self,
        project: &ProjectContext,
        phase: Phase,
        notes: PhaseNotes<'_>,
    ) -> Result<String, OracleError> {
        let request = OracleRequest {
            phase,
            system: ContextBuilder::system_prompt(phase),
            context: self.context.build(
                project.root(),
                notes,
                project.last_test_output(),
                project.history(),
            ),
        };
        debug!(
            project = %project.name(),
            phase = %phase,
            context_chars = request.context.len(),
            "Calling oracle"
        );

        let response = self.oracle.complete(&request).await?;
        self.record_usage(project, phase, &response);
        Ok(response.text)
    }

    fn record_usage(&self, project: &ProjectContext, phase: Phase, response: &OracleResponse) {
        let (Some((log, run_id)), Some(usage)) = (self.usage, response.usage) else {
            return;
        };
        let model = response
            .model
            .as_deref()
            .unwrap_or_else(|| self.oracle.model());
        let record = UsageRecord::new(run_id, project.name(), phase, model, usage);
        if let Err(e) = log.append(&record) {
            warn!(error = %e, "Failed to record token usage");
        }
    }
}
