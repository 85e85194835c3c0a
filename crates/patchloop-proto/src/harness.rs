//! The test harness boundary.

use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;

/// Outcome classification of one test run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestStatus {
    Passed,
    Failed,
    TimedOut,
}

/// Result of running a project's test command.
#[derive(Debug, Clone)]
pub struct TestRun {
    pub status: TestStatus,
    /// Combined stdout/stderr, or a harness message on timeout/spawn failure.
    pub output: String,
    pub duration: Duration,
}

impl TestRun {
    pub fn passed(output: impl Into<String>, duration: Duration) -> Self {
        Self {
            status: TestStatus::Passed,
            output: output.into(),
            duration,
        }
    }

    pub fn failed(output: impl Into<String>, duration: Duration) -> Self {
        Self {
            status: TestStatus::Failed,
            output: output.into(),
            duration,
        }
    }

    /// A run killed at `timeout`.
    pub fn timed_out(timeout: Duration) -> Self {
        Self {
            status: TestStatus::TimedOut,
            output: format!("tests timed out after {}s", timeout.as_secs()),
            duration: timeout,
        }
    }

    pub fn is_passed(&self) -> bool {
        self.status == TestStatus::Passed
    }
}

/// Executes a project's test command.
///
/// Implementations never fail: spawn errors and timeouts are reported as a
/// non-passing [`TestRun`] so the loop can feed them back to the oracle.
#[async_trait]
pub trait TestHarness: Send + Sync {
    async fn run(&self, project_root: &Path) -> TestRun;
}
