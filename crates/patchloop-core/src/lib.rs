//! # patchloop-core
//!
//! Core repair loop for patchloop.
//!
//! This crate provides:
//! - The unified diff engine (clean, parse, apply)
//! - The per-project phase state machine and its bounded error history
//! - The sequential controller that drives a batch of projects
//! - Configuration loading and project discovery
//! - Token usage telemetry

mod config;
mod context;
mod controller;
pub mod diff;
mod history;
mod machine;
mod project;
pub mod registry;
mod telemetry;

pub use config::{
    ConfigError, ContextConfig, HarnessConfig, LoopConfig, OracleBackend, OracleConfig,
    PatchloopConfig, ProjectsConfig, TelemetryConfig,
};
pub use context::{ContextBuilder, PhaseNotes};
pub use controller::{Controller, ProjectOutcome, RunReport};
pub use history::{ErrorHistory, summarize_test_output};
pub use machine::{PhaseMachine, PhaseState};
pub use project::ProjectContext;
pub use registry::RegistryError;
pub use telemetry::{
    TelemetryError, USAGE_FILE, UsageLog, UsageRecord, UsageTotals, new_run_id, summarize,
};
