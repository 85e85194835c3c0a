//! Failure records fed back into later oracle requests.

use serde::{Deserialize, Serialize};
use std::fmt;

/// What kind of failure an [`ErrorRecord`] describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCategory {
    /// The oracle's diff could not be parsed or applied.
    PatchApplyFailure,
    /// The test suite failed or timed out.
    TestFailure,
    /// The oracle call itself failed while a patch was expected.
    OracleFailure,
}

impl ErrorCategory {
    /// Patch and oracle failures explain a red test run better than the
    /// test output does, so they win when both happen in one iteration.
    pub fn supersedes_test_failure(self) -> bool {
        !matches!(self, ErrorCategory::TestFailure)
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::PatchApplyFailure => write!(f, "PatchApplyFailure"),
            ErrorCategory::TestFailure => write!(f, "TestFailure"),
            ErrorCategory::OracleFailure => write!(f, "OracleFailure"),
        }
    }
}

/// One failure summary. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    iteration: u32,
    category: ErrorCategory,
    message: String,
}

impl ErrorRecord {
    pub fn new(iteration: u32, category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            iteration,
            category,
            message: message.into(),
        }
    }

    /// Zero-based iteration the failure belongs to.
    pub fn iteration(&self) -> u32 {
        self.iteration
    }

    pub fn category(&self) -> ErrorCategory {
        self.category
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}
