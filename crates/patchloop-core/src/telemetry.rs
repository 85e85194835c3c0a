//! Token usage telemetry.
//!
//! One JSON object per oracle call, appended to `<run_dir>/usage.jsonl`.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use patchloop_proto::{Phase, TokenUsage};
use serde::{Deserialize, Serialize};
use tracing::warn;

pub const USAGE_FILE: &str = "usage.jsonl";

#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("telemetry I/O on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to encode usage record: {0}")]
    Encode(#[from] serde_json::Error),
}

/// One oracle call's token accounting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub ts: DateTime<Utc>,
    pub run_id: String,
    pub project: String,
    pub phase: Phase,
    pub model: String,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl UsageRecord {
    pub fn new(
        run_id: impl Into<String>,
        project: impl Into<String>,
        phase: Phase,
        model: impl Into<String>,
        usage: TokenUsage,
    ) -> Self {
        Self {
            ts: Utc::now(),
            run_id: run_id.into(),
            project: project.into(),
            phase,
            model: model.into(),
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
            total_tokens: usage.total_tokens,
        }
    }
}

/// Append-only JSONL usage log.
#[derive(Debug, Clone)]
pub struct UsageLog {
    path: PathBuf,
}

impl UsageLog {
    /// The log under `run_dir`. Nothing is created until [`UsageLog::open`].
    pub fn new(run_dir: &Path) -> Self {
        Self {
            path: run_dir.join(USAGE_FILE),
        }
    }

    /// Opens the log under `run_dir`, creating the directory if needed.
    pub fn open(run_dir: &Path) -> Result<Self, TelemetryError> {
        std::fs::create_dir_all(run_dir).map_err(|source| TelemetryError::Io {
            path: run_dir.to_path_buf(),
            source,
        })?;
        Ok(Self::new(run_dir))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one record as a single line.
    pub fn append(&self, record: &UsageRecord) -> Result<(), TelemetryError> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let io_err = |source| TelemetryError::Io {
            path: self.path.clone(),
            source,
        };
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(io_err)?;
        file.write_all(line.as_bytes()).map_err(io_err)
    }

    /// Reads every well-formed record. Malformed lines are skipped.
    pub fn read_all(&self) -> Result<Vec<UsageRecord>, TelemetryError> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(TelemetryError::Io {
                    path: self.path.clone(),
                    source,
                });
            }
        };

        let mut records = Vec::new();
        for (number, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|source| TelemetryError::Io {
                path: self.path.clone(),
                source,
            })?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(&line) {
                Ok(record) => records.push(record),
                Err(e) => warn!(line = number + 1, error = %e, "Skipping malformed usage record"),
            }
        }
        Ok(records)
    }
}

/// Aggregated usage for one project and phase.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UsageTotals {
    pub calls: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

/// Sums records by `(project, phase)`, optionally limited to one run.
pub fn summarize(
    records: &[UsageRecord],
    run_id: Option<&str>,
) -> BTreeMap<(String, Phase), UsageTotals> {
    let mut totals: BTreeMap<(String, Phase), UsageTotals> = BTreeMap::new();
    for record in records
        .iter()
        .filter(|r| run_id.is_none_or(|id| r.run_id == id))
    {
        let entry = totals
            .entry((record.project.clone(), record.phase))
            .or_default();
        entry.calls += 1;
        entry.prompt_tokens += record.prompt_tokens;
        entry.completion_tokens += record.completion_tokens;
        entry.total_tokens += record.total_tokens;
    }
    totals
}

/// A run identifier derived from the current time.
pub fn new_run_id() -> String {
    format!("run_{}", Utc::now().format("%Y%m%dT%H%M%S%3f"))
}
