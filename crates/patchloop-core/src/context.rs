//! Context builder for oracle requests.
//!
//! Every oracle call gets a system prompt chosen by phase and a context
//! document assembled from the project tree as it is on disk right now.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use patchloop_proto::Phase;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::config::ContextConfig;
use crate::history::ErrorHistory;

const DIFF_RULES: &str = r"Output ONLY a unified diff that can be applied from the project root. No explanations and no markdown fences.
- Use paths relative to the project root with a/ and b/ prefixes.
- Use --- /dev/null for new files and +++ /dev/null for deleted files.
- Context and removed lines must match the current file exactly.
- Keep changes minimal and focused on the requirements and failing tests.";

/// Phase-specific inputs rendered into the context document.
#[derive(Debug, Clone, Copy, Default)]
pub struct PhaseNotes<'a> {
    pub understanding: Option<&'a str>,
    pub plan: Option<&'a str>,
    pub analysis: Option<&'a str>,
}

/// Builds the system prompt and context document for oracle calls.
#[derive(Debug)]
pub struct ContextBuilder<'a> {
    config: &'a ContextConfig,
    spec_file: &'a str,
}

impl<'a> ContextBuilder<'a> {
    pub fn new(config: &'a ContextConfig, spec_file: &'a str) -> Self {
        Self { config, spec_file }
    }

    /// System prompt for `phase`. Patch phases also get the diff format rules.
    pub fn system_prompt(phase: Phase) -> String {
        let task = match phase {
            Phase::Understand => "You are a meticulous software engineer. Read the project specification, \
                the tests and the current code. Summarize the requirements and list what is missing \
                or incorrect. Respond with analysis only, no code.",
            Phase::Plan => "You are a meticulous software engineer. Using the requirements analysis, \
                write a concise numbered implementation plan naming every file to create or modify. \
                Do not write code.",
            Phase::Code => "You are a meticulous software engineer implementing the plan below so the \
                project's tests pass.",
            Phase::IdentifyErrors => "You are a meticulous software engineer. Analyze the failing test \
                output and the previous errors. Identify the root causes and the changes needed to fix \
                them. Do not write code.",
            Phase::FixErrors => "You are a meticulous software engineer fixing the failures identified \
                below so the project's tests pass.",
            Phase::Validate | Phase::Completed | Phase::Failed => return String::new(),
        };
        if phase.expects_patch() {
            format!("{task}\n\n{DIFF_RULES}")
        } else {
            task.to_string()
        }
    }

    /// Builds the context document for one oracle call.
    pub fn build(
        &self,
        root: &Path,
        notes: PhaseNotes<'_>,
        last_test_output: Option<&str>,
        history: &ErrorHistory,
    ) -> String {
        let mut doc = String::new();

        doc.push_str(&format!("PROJECT SPECIFICATION ({}):\n", self.spec_file));
        match std::fs::read_to_string(root.join(self.spec_file)) {
            Ok(spec) => doc.push_str(spec.trim_end()),
            Err(e) => {
                warn!(root = %root.display(), error = %e, "Failed to read project specification");
                doc.push_str("(unavailable)");
            }
        }
        doc.push_str("\n\n");

        let files = self.list_files(root);
        doc.push_str("FILE TREE:\n");
        for file in &files {
            let _ = writeln!(doc, "{}", display_path(file));
        }
        doc.push('\n');

        doc.push_str("KEY FILES:\n");
        self.push_excerpts(&mut doc, root, &files);
        doc.push('\n');

        doc.push_str("LAST TEST OUTPUT:\n");
        match last_test_output {
            Some(output) if !output.trim().is_empty() => {
                doc.push_str(tail(output, self.config.max_test_output_chars));
            }
            _ => doc.push_str("(none yet)"),
        }
        doc.push_str("\n\n");

        if let Some(understanding) = notes.understanding {
            doc.push_str("REQUIREMENTS ANALYSIS:\n");
            doc.push_str(understanding.trim_end());
            doc.push_str("\n\n");
        }
        if let Some(plan) = notes.plan {
            doc.push_str("IMPLEMENTATION PLAN:\n");
            doc.push_str(plan.trim_end());
            doc.push_str("\n\n");
        }
        if let Some(analysis) = notes.analysis {
            doc.push_str("ERROR ANALYSIS:\n");
            doc.push_str(analysis.trim_end());
            doc.push_str("\n\n");
        }

        if !history.is_empty() {
            doc.push_str("PREVIOUS ITERATION ERRORS:\n");
            doc.push_str(
                "The following errors occurred in previous attempts. Learn from them and do not repeat them:\n",
            );
            doc.push_str(&history.render());
            doc.push('\n');
        }

        doc
    }

    /// Project-relative paths of listable files, sorted.
    fn list_files(&self, root: &Path) -> Vec<PathBuf> {
        let skip = &self.config.skip_dirs;
        let mut files: Vec<PathBuf> = WalkDir::new(root)
            .min_depth(1)
            .into_iter()
            .filter_entry(|entry| {
                !(entry.file_type().is_dir()
                    && entry
                        .file_name()
                        .to_str()
                        .is_some_and(|name| skip.iter().any(|s| s == name)))
            })
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    debug!(error = %e, "Skipping unreadable entry");
                    None
                }
            })
            .filter(|entry| entry.file_type().is_file())
            .filter_map(|entry| entry.path().strip_prefix(root).ok().map(Path::to_path_buf))
            .collect();
        files.sort();
        files.truncate(self.config.max_tree_entries);
        files
    }

    fn push_excerpts(&self, doc: &mut String, root: &Path, files: &[PathBuf]) {
        let mut remaining = self.config.max_total_chars;

        for file in files.iter().filter(|f| self.is_excerptable(f)) {
            if remaining == 0 {
                doc.push_str("(further files omitted)\n");
                break;
            }
            let Ok(content) = std::fs::read_to_string(root.join(file)) else {
                continue;
            };
            let excerpt = head(&content, self.config.max_file_chars.min(remaining));
            remaining -= excerpt.chars().count();

            let _ = writeln!(doc, "==> {} <==", display_path(file));
            doc.push_str(excerpt.trim_end());
            if excerpt.len() < content.len() {
                doc.push_str("\n(truncated)");
            }
            doc.push('\n');
        }
    }

    fn is_excerptable(&self, path: &Path) -> bool {
        if path == Path::new(self.spec_file) {
            return false;
        }
        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| self.config.extensions.iter().any(|e| e == ext))
    }
}

fn display_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

/// First `max` characters of `text`.
fn head(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Last `max` characters of `text`.
fn tail(text: &str, max: usize) -> &str {
    let count = text.chars().count();
    if count <= max {
        return text;
    }
    match text.char_indices().nth(count - max) {
        Some((idx, _)) => &text[idx..],
        None => text,
    }
}
