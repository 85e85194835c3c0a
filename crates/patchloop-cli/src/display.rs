//! Human-readable output for run reports and usage summaries.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::PathBuf;

use colored::Colorize;
use patchloop_core::{RunReport, UsageTotals};
use patchloop_proto::Phase;

/// Formats the end-of-run report.
pub fn format_report(report: &RunReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{} {}", "Run".bold(), report.run_id);

    for outcome in &report.outcomes {
        let mark = if outcome.is_completed() {
            "✓".green()
        } else {
            "✗".red()
        };
        let _ = writeln!(
            out,
            "  {mark} {:<24} {:<10} {} iteration(s)",
            outcome.name,
            outcome.phase.to_string(),
            outcome.iterations
        );
        if let Some(error) = &outcome.error {
            let _ = writeln!(out, "      {}", error.dimmed());
        } else if !outcome.is_completed()
            && let Some(last) = outcome.errors.last()
        {
            let _ = writeln!(
                out,
                "      {}",
                format!("last error: {} — {}", last.category(), last.message()).dimmed()
            );
        }
    }

    let summary = format!(
        "{} completed, {} failed",
        report.completed(),
        report.failed()
    );
    if report.all_completed() {
        let _ = writeln!(out, "{}", summary.green());
    } else {
        let _ = writeln!(out, "{}", summary.red());
    }
    out
}

/// Formats discovered projects, one per line.
pub fn format_projects(projects: &[PathBuf]) -> String {
    if projects.is_empty() {
        return format!("{}\n", "No projects found.".dimmed());
    }
    let mut out = String::new();
    for root in projects {
        let name = root.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
        let _ = writeln!(out, "{:<24} {}", name, root.display().to_string().dimmed());
    }
    out
}

/// Formats aggregated usage as a table with a total row.
pub fn format_usage(totals: &BTreeMap<(String, Phase), UsageTotals>) -> String {
    if totals.is_empty() {
        return format!("{}\n", "No usage recorded.".dimmed());
    }

    let mut out = String::new();
    let header = format!(
        "{:<24} {:<16} {:>6} {:>10} {:>10} {:>10}",
        "PROJECT", "PHASE", "CALLS", "PROMPT", "COMPLETION", "TOTAL"
    );
    let _ = writeln!(out, "{}", header.bold());

    let mut sum = UsageTotals::default();
    for ((project, phase), t) in totals {
        let _ = writeln!(
            out,
            "{:<24} {:<16} {:>6} {:>10} {:>10} {:>10}",
            project,
            phase.as_str(),
            t.calls,
            t.prompt_tokens,
            t.completion_tokens,
            t.total_tokens
        );
        sum.calls += t.calls;
        sum.prompt_tokens += t.prompt_tokens;
        sum.completion_tokens += t.completion_tokens;
        sum.total_tokens += t.total_tokens;
    }

    let total = format!(
        "{:<24} {:<16} {:>6} {:>10} {:>10} {:>10}",
        "TOTAL", "", sum.calls, sum.prompt_tokens, sum.completion_tokens, sum.total_tokens
    );
    let _ = writeln!(out, "{}", total.bold());
    out
}
