//! The generation oracle boundary.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Phase;

/// A request sent to the oracle for one phase.
#[derive(Debug, Clone)]
pub struct OracleRequest {
    /// Phase that issued the request.
    pub phase: Phase,
    /// Role/task instructions for the phase.
    pub system: String,
    /// The context document describing the project's current state.
    pub context: String,
}

/// Token counters reported by the backend, when available.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

/// Raw oracle output. Interpretation (analysis vs. diff) is up to the caller.
#[derive(Debug, Clone, Default)]
pub struct OracleResponse {
    pub text: String,
    pub usage: Option<TokenUsage>,
    /// Model identifier the backend reports, if any.
    pub model: Option<String>,
}

impl OracleResponse {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }
}

/// Errors from an oracle backend.
///
/// Every variant is recoverable from the loop's point of view: the
/// iteration is marked failed and the project carries on.
#[derive(Debug, thiserror::Error)]
pub enum OracleError {
    #[error("oracle request failed: {0}")]
    Request(String),

    #[error("oracle returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("oracle response was unusable: {0}")]
    Malformed(String),

    #[error("oracle did not answer within {0}s")]
    Timeout(u64),

    #[error("oracle is not configured: {0}")]
    NotConfigured(String),
}

/// A text/diff generating service consulted at each oracle phase.
#[async_trait]
pub trait Oracle: Send + Sync {
    /// Returns the backend's response to `request`.
    async fn complete(&self, request: &OracleRequest) -> Result<OracleResponse, OracleError>;

    /// Model name recorded in telemetry when the response does not carry one.
    fn model(&self) -> &str;
}
