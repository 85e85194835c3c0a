//! Bounded per-project record of failures across iterations.

use std::collections::VecDeque;

use patchloop_proto::{ErrorCategory, ErrorRecord};

/// Append-only failure history capped to the most recent N iterations.
///
/// Records are grouped by iteration; when a new iteration would exceed the
/// cap, every record of the oldest iteration is dropped.
#[derive(Debug, Clone)]
pub struct ErrorHistory {
    records: VecDeque<ErrorRecord>,
    max_iterations: usize,
}

impl ErrorHistory {
    /// Creates a history keeping `max_iterations` iterations' worth of records.
    pub fn new(max_iterations: usize) -> Self {
        Self {
            records: VecDeque::new(),
            max_iterations: max_iterations.max(1),
        }
    }

    pub fn push(&mut self, record: ErrorRecord) {
        self.records.push_back(record);
        self.evict();
    }

    pub fn records(&self) -> impl Iterator<Item = &ErrorRecord> {
        self.records.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Returns true if `iteration` already has a record of `category`.
    pub fn has(&self, iteration: u32, category: ErrorCategory) -> bool {
        self.records
            .iter()
            .any(|r| r.iteration() == iteration && r.category() == category)
    }

    /// Returns true if `iteration` has a record that outranks a test failure.
    pub fn has_superseding_record(&self, iteration: u32) -> bool {
        self.records
            .iter()
            .any(|r| r.iteration() == iteration && r.category().supersedes_test_failure())
    }

    /// Renders the history as an enumerated list, one record per line.
    ///
    /// Iterations are shown 1-based.
    pub fn render(&self) -> String {
        self.records
            .iter()
            .map(|r| {
                format!(
                    "Iteration {}: {} — {}",
                    r.iteration() + 1,
                    r.category(),
                    r.message()
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn distinct_iterations(&self) -> usize {
        let mut count = 0;
        let mut last = None;
        for record in &self.records {
            if last != Some(record.iteration()) {
                count += 1;
                last = Some(record.iteration());
            }
        }
        count
    }

    fn evict(&mut self) {
        while self.distinct_iterations() > self.max_iterations {
            let oldest = self.records.front().map(ErrorRecord::iteration);
            while self.records.front().map(ErrorRecord::iteration) == oldest {
                self.records.pop_front();
            }
        }
    }
}

/// Condenses test output into a one-line failure summary.
///
/// Picks up to three lines naming failed tests or common Python error
/// types; falls back to the last three non-empty lines.
pub fn summarize_test_output(output: &str) -> String {
    const MARKERS: [&str; 4] = [
        "AssertionError",
        "ImportError",
        "ModuleNotFoundError",
        "SyntaxError",
    ];

    let hits: Vec<&str> = output
        .lines()
        .filter(|line| {
            (line.contains("FAILED") && line.contains("::"))
                || MARKERS.iter().any(|m| line.contains(m))
        })
        .map(str::trim)
        .take(3)
        .collect();

    if !hits.is_empty() {
        return hits.join("; ");
    }

    let tail: Vec<&str> = output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();
    tail[tail.len().saturating_sub(3)..].join("; ")
}
