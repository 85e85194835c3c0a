//! Shell-command test harness.

use std::path::Path;
use std::process::Stdio;
use std::time::Instant;

use async_trait::async_trait;
use patchloop_core::HarnessConfig;
use patchloop_core::registry::project_name;
use patchloop_proto::{TestHarness, TestRun};
use tokio::process::Command;
use tracing::{debug, warn};

/// Runs the configured test command with `sh -c` in the project root.
///
/// The command for a project is its entry in `harness.overrides` if present,
/// else `harness.command`. A run exceeding `harness.timeout_secs` is killed
/// together with every process it started.
#[derive(Debug, Clone)]
pub struct CommandHarness {
    config: HarnessConfig,
}

impl CommandHarness {
    pub fn new(config: HarnessConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl TestHarness for CommandHarness {
    async fn run(&self, project_root: &Path) -> TestRun {
        let command = self.config.command_for(project_name(project_root));
        let timeout = self.config.timeout();
        debug!(root = %project_root.display(), command = %command, "Running tests");

        let started = Instant::now();
        let mut cmd = Command::new("sh");
        // stderr joins stdout so tracebacks stay next to the test that failed
        cmd.arg("-c")
            .arg(format!("exec 2>&1\n{command}"))
            .current_dir(project_root)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        let child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!(command = %command, error = %e, "Failed to start test command");
                return TestRun::failed(
                    format!("failed to start test command `{command}`: {e}"),
                    started.elapsed(),
                );
            }
        };
        let pid = child.id();

        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return TestRun::failed(
                    format!("failed to collect test output: {e}"),
                    started.elapsed(),
                );
            }
            Err(_) => {
                warn!(root = %project_root.display(), timeout_secs = timeout.as_secs(), "Tests timed out");
                if let Some(pid) = pid {
                    kill_process_group(pid);
                }
                return TestRun::timed_out(timeout);
            }
        };

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        if output.status.success() {
            TestRun::passed(combined, started.elapsed())
        } else {
            TestRun::failed(combined, started.elapsed())
        }
    }
}

/// Kills the test command and everything it started.
#[cfg(unix)]
fn kill_process_group(pid: u32) {
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    if let Err(e) = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
        debug!(pid, error = %e, "Test process group already gone");
    }
}

/// No process groups here; `kill_on_drop` stops the shell itself.
#[cfg(not(unix))]
fn kill_process_group(_pid: u32) {}
