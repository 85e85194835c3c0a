//! Oracle backed by an external command.
//!
//! The command receives the system prompt and context document on stdin and
//! answers on stdout. `PATCHLOOP_PHASE` carries the phase name.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use patchloop_core::OracleConfig;
use patchloop_proto::{Oracle, OracleError, OracleRequest, OracleResponse};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

#[derive(Debug)]
pub struct CommandOracle {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandOracle {
    pub fn from_config(config: &OracleConfig) -> Result<Self, OracleError> {
        let (program, args) = config
            .command
            .split_first()
            .ok_or_else(|| OracleError::NotConfigured("oracle.command is empty".to_string()))?;
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
            timeout: config.request_timeout(),
        })
    }
}

/// stdin payload: system prompt, a separator line, then the context.
fn stdin_payload(request: &OracleRequest) -> String {
    format!("{}\n\n---\n\n{}", request.system, request.context)
}

#[async_trait]
impl Oracle for CommandOracle {
    async fn complete(&self, request: &OracleRequest) -> Result<OracleResponse, OracleError> {
        debug!(program = %self.program, phase = %request.phase, "Invoking oracle command");

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .env("PATCHLOOP_PHASE", request.phase.as_str())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| OracleError::Request(format!("failed to start {}: {e}", self.program)))?;

        // stdin is fed alongside draining stdout, on this task.
        let stdin = child.stdin.take();
        let payload = stdin_payload(request);
        let feed = async move {
            if let Some(mut stdin) = stdin
                && let Err(e) = stdin.write_all(payload.as_bytes()).await
            {
                warn!(error = %e, "Oracle command closed stdin early");
            }
        };
        let run = async move {
            let ((), output) = tokio::join!(feed, child.wait_with_output());
            output
        };

        let output = tokio::time::timeout(self.timeout, run)
            .await
            .map_err(|_| OracleError::Timeout(self.timeout.as_secs()))?
            .map_err(|e| OracleError::Request(e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(OracleError::Request(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }

        let text = String::from_utf8(output.stdout)
            .map_err(|_| OracleError::Malformed("command output is not UTF-8".to_string()))?;
        Ok(OracleResponse::text(text))
    }

    fn model(&self) -> &str {
        &self.program
    }
}
