//! Unified diff parsing and application.
//!
//! Oracle output goes through three steps:
//! 1. [`clean`] strips code fences and leading prose,
//! 2. [`parse`] turns the diff body into a [`Patch`],
//! 3. [`apply`] stages every resulting file in memory and commits the whole
//!    patch, or nothing.
//!
//! [`apply_hunks`] is the pure line-level algorithm underneath `apply`.

mod apply;
mod clean;
mod parse;
mod tree;

use std::path::{Path, PathBuf};

pub use apply::apply_hunks;
pub use clean::clean;
pub use parse::parse;
pub use tree::{AppliedResult, apply};

/// A single line of a hunk body, without its line terminator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineOp {
    Context(String),
    Added(String),
    Removed(String),
}

/// One `@@ -a,b +c,d @@` region of a file diff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hunk {
    /// 1-based line in the original file.
    pub source_start: usize,
    pub source_length: usize,
    pub target_start: usize,
    pub target_length: usize,
    pub lines: Vec<LineOp>,
}

impl Hunk {
    /// Number of original lines the body consumes (context + removed).
    pub fn source_consumed(&self) -> usize {
        self.lines
            .iter()
            .filter(|op| !matches!(op, LineOp::Added(_)))
            .count()
    }

    /// Number of result lines the body produces (context + added).
    pub fn target_produced(&self) -> usize {
        self.lines
            .iter()
            .filter(|op| !matches!(op, LineOp::Removed(_)))
            .count()
    }

    /// Lines added by this hunk.
    pub fn added_lines(&self) -> impl Iterator<Item = &str> {
        self.lines.iter().filter_map(|op| match op {
            LineOp::Added(s) => Some(s.as_str()),
            _ => None,
        })
    }
}

/// A change to one file, relative to the project root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileEdit {
    Create { path: PathBuf, lines: Vec<String> },
    Modify { path: PathBuf, hunks: Vec<Hunk> },
    Delete { path: PathBuf },
}

impl FileEdit {
    pub fn path(&self) -> &Path {
        match self {
            FileEdit::Create { path, .. }
            | FileEdit::Modify { path, .. }
            | FileEdit::Delete { path } => path,
        }
    }
}

/// A parsed diff: file edits in application order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Patch {
    pub edits: Vec<FileEdit>,
}

impl Patch {
    pub fn is_empty(&self) -> bool {
        self.edits.is_empty()
    }

    pub fn len(&self) -> usize {
        self.edits.len()
    }
}

/// Malformed diff text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("diff is empty after stripping formatting")]
    Empty,

    #[error("no file header (`--- a/<path>` followed by `+++ b/<path>`) found")]
    MissingFileHeader,

    #[error("file header on line {line} names no path")]
    InvalidFileHeader { line: usize },

    #[error("invalid hunk header on line {line}: {header:?}")]
    InvalidHunkHeader { line: usize, header: String },

    #[error(
        "hunk on line {line} ({header:?}) ends after {consumed} source and {produced} target lines"
    )]
    TruncatedHunk {
        line: usize,
        header: String,
        consumed: usize,
        produced: usize,
    },

    #[error("file section for {path} contains no hunks")]
    MissingHunks { path: String },
}

/// Why a hunk does not fit the current file content.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HunkError {
    #[error("hunk {hunk} starts at line {start}, inside lines already consumed up to {cursor}")]
    Overlap {
        hunk: usize,
        start: usize,
        cursor: usize,
    },

    #[error("hunk {hunk} starts at line {start}, past the end of the file ({len} lines)")]
    StartPastEnd { hunk: usize, start: usize, len: usize },

    #[error("hunk {hunk} expects {expected:?} at line {line}, found {found:?}")]
    Mismatch {
        hunk: usize,
        line: usize,
        expected: String,
        found: String,
    },

    #[error("hunk {hunk} reaches line {line}, past the end of the file")]
    PastEnd { hunk: usize, line: usize },
}

/// Failure to apply a parsed patch. The tree is left untouched.
#[derive(Debug, thiserror::Error)]
pub enum ApplyError {
    /// The file drifted from the base the diff was generated against.
    #[error("context mismatch in {}: {reason}", path.display())]
    ContextMismatch { path: PathBuf, reason: HunkError },

    #[error("I/O failure on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("refusing to touch {} outside the project root", path.display())]
    UnsafePath { path: PathBuf },
}

impl ApplyError {
    /// Path the failure is about.
    pub fn path(&self) -> &Path {
        match self {
            ApplyError::ContextMismatch { path, .. }
            | ApplyError::Io { path, .. }
            | ApplyError::UnsafePath { path } => path,
        }
    }

    pub fn is_context_mismatch(&self) -> bool {
        matches!(self, ApplyError::ContextMismatch { .. })
    }
}

/// Either half of turning oracle text into file changes.
#[derive(Debug, thiserror::Error)]
pub enum PatchError {
    #[error("failed to parse diff: {0}")]
    Parse(#[from] ParseError),

    #[error("failed to apply diff: {0}")]
    Apply(#[from] ApplyError),
}

/// Parses `diff_text` and applies it under `project_root`.
pub fn apply_text(project_root: &Path, diff_text: &str) -> Result<AppliedResult, PatchError> {
    let patch = parse(diff_text)?;
    Ok(apply(project_root, &patch)?)
}
