//! Per-project loop state.

use std::path::{Path, PathBuf};

use patchloop_proto::{ErrorCategory, ErrorRecord, Phase};
use tracing::info;

use crate::history::ErrorHistory;
use crate::machine::PhaseState;
use crate::registry::project_name;

/// Everything the loop tracks for one project.
///
/// Owned exclusively by the controller while the project is being driven.
#[derive(Debug)]
pub struct ProjectContext {
    name: String,
    root: PathBuf,
    pub(crate) state: PhaseState,
    pub(crate) iteration: u32,
    pub(crate) history: ErrorHistory,
    pub(crate) last_test_output: Option<String>,
    trail: Vec<Phase>,
}

impl ProjectContext {
    /// A fresh context in `Understand` with iteration 0.
    pub fn new(root: impl Into<PathBuf>, history_iterations: usize) -> Self {
        let root = root.into();
        Self {
            name: project_name(&root).to_string(),
            root,
            state: PhaseState::Understand,
            iteration: 0,
            history: ErrorHistory::new(history_iterations),
            last_test_output: None,
            trail: vec![Phase::Understand],
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn phase(&self) -> Phase {
        self.state.phase()
    }

    /// Number of failed validations so far.
    pub fn iteration(&self) -> u32 {
        self.iteration
    }

    pub fn history(&self) -> &ErrorHistory {
        &self.history
    }

    pub fn last_test_output(&self) -> Option<&str> {
        self.last_test_output.as_deref()
    }

    /// Every phase entered, in order, starting with `Understand`.
    pub fn trail(&self) -> &[Phase] {
        &self.trail
    }

    /// Records a failure against the current iteration.
    pub(crate) fn record(&mut self, category: ErrorCategory, message: impl Into<String>) {
        self.history
            .push(ErrorRecord::new(self.iteration, category, message));
    }

    pub(crate) fn transition(&mut self, next: PhaseState) {
        let from = self.trail.last().copied().unwrap_or(Phase::Understand);
        let to = next.phase();
        info!(project = %self.name, iteration = self.iteration, "{from} -> {to}");
        self.state = next;
        self.trail.push(to);
    }
}
