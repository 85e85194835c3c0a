//! Workflow phase tags.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A named step in a project's repair workflow.
///
/// This is the payload-free tag used for logging, telemetry and reports.
/// The state machine in `patchloop-core` carries each phase's live data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Understand,
    Plan,
    Code,
    Validate,
    IdentifyErrors,
    FixErrors,
    Completed,
    Failed,
}

impl Phase {
    /// Returns the snake_case name used in telemetry records.
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Understand => "understand",
            Phase::Plan => "plan",
            Phase::Code => "code",
            Phase::Validate => "validate",
            Phase::IdentifyErrors => "identify_errors",
            Phase::FixErrors => "fix_errors",
            Phase::Completed => "completed",
            Phase::Failed => "failed",
        }
    }

    /// Returns true for `Completed` and `Failed`.
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Completed | Phase::Failed)
    }

    /// Returns true if the phase expects diff-formatted oracle output.
    pub fn expects_patch(self) -> bool {
        matches!(self, Phase::Code | Phase::FixErrors)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Understand => "Understand",
            Phase::Plan => "Plan",
            Phase::Code => "Code",
            Phase::Validate => "Validate",
            Phase::IdentifyErrors => "IdentifyErrors",
            Phase::FixErrors => "FixErrors",
            Phase::Completed => "Completed",
            Phase::Failed => "Failed",
        };
        f.write_str(name)
    }
}
