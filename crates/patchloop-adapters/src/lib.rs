//! # patchloop-adapters
//!
//! Oracle and test harness implementations for patchloop.
//!
//! This crate provides:
//! - `OpenAiOracle`, for any OpenAI-compatible chat completions endpoint
//! - `CommandOracle`, which pipes the context through an external command
//! - `CommandHarness`, which runs a project's test command under a timeout
//!
//! `oracle_from_config` picks the oracle for `oracle.backend`.

mod command;
mod harness;
mod openai;

use std::sync::Arc;

use patchloop_core::{OracleBackend, OracleConfig};
use patchloop_proto::{Oracle, OracleError};

pub use command::CommandOracle;
pub use harness::CommandHarness;
pub use openai::OpenAiOracle;

/// Builds the oracle selected by `config.backend`.
pub fn oracle_from_config(config: &OracleConfig) -> Result<Arc<dyn Oracle>, OracleError> {
    let oracle: Arc<dyn Oracle> = match config.backend {
        OracleBackend::OpenAi => Arc::new(OpenAiOracle::from_config(config)?),
        OracleBackend::Command => Arc::new(CommandOracle::from_config(config)?),
    };
    Ok(oracle)
}
