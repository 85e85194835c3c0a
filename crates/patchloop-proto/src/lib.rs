//! # patchloop-proto
//!
//! Shared types, error definitions, and traits for patchloop.
//!
//! This crate provides:
//! - The `Phase` tags of the repair workflow
//! - `ErrorRecord`, the unit of failure feedback between iterations
//! - The `Oracle` trait for text/diff generation backends
//! - The `TestHarness` trait for running a project's test suite

mod error_record;
mod harness;
mod oracle;
mod phase;

pub use error_record::{ErrorCategory, ErrorRecord};
pub use harness::{TestHarness, TestRun, TestStatus};
pub use oracle::{Oracle, OracleError, OracleRequest, OracleResponse, TokenUsage};
pub use phase::Phase;
