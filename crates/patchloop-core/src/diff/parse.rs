//! Unified diff text -> [`Patch`].

use regex::Regex;
use std::path::PathBuf;
use std::sync::LazyLock;

use super::{FileEdit, Hunk, LineOp, ParseError, Patch, clean};

static HUNK_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^@@ -(\d+)(?:,(\d+))? \+(\d+)(?:,(\d+))? @@").expect("hunk header pattern compiles")
});

/// Parses oracle output into a [`Patch`].
///
/// The text is passed through [`clean`] first, so fenced or prose-wrapped
/// output is accepted.
pub fn parse(diff_text: &str) -> Result<Patch, ParseError> {
    let cleaned = clean(diff_text);
    if cleaned.is_empty() {
        return Err(ParseError::Empty);
    }

    let lines: Vec<&str> = cleaned.lines().collect();
    let mut edits = Vec::new();
    let mut i = 0;

    while i < lines.len() {
        if !is_file_header(&lines, i) {
            i += 1;
            continue;
        }

        let header_line = i + 1;
        let source = header_path(&lines[i][4..]);
        let target = header_path(&lines[i + 1][4..]);
        i += 2;

        let mut hunks = Vec::new();
        while i < lines.len() && !is_file_header(&lines, i) && !lines[i].starts_with("diff --git ")
        {
            if lines[i].starts_with("@@") {
                let (hunk, next) = parse_hunk(&lines, i)?;
                hunks.push(hunk);
                i = next;
            } else {
                i += 1;
            }
        }

        edits.push(build_edit(source, target, hunks, header_line)?);
    }

    if edits.is_empty() {
        return Err(ParseError::MissingFileHeader);
    }
    Ok(Patch { edits })
}

/// A `--- ` line directly followed by a `+++ ` line.
fn is_file_header(lines: &[&str], i: usize) -> bool {
    lines[i].starts_with("--- ") && lines.get(i + 1).is_some_and(|next| next.starts_with("+++ "))
}

/// Path from a header, or `None` for `/dev/null`.
fn header_path(raw: &str) -> Option<String> {
    let raw = raw.split('\t').next().unwrap_or(raw).trim();
    let raw = raw.trim_matches('"');
    if raw == "/dev/null" || raw.is_empty() {
        return None;
    }
    let stripped = raw
        .strip_prefix("a/")
        .or_else(|| raw.strip_prefix("b/"))
        .unwrap_or(raw);
    Some(stripped.to_string())
}

fn build_edit(
    source: Option<String>,
    target: Option<String>,
    hunks: Vec<Hunk>,
    header_line: usize,
) -> Result<FileEdit, ParseError> {
    match (source, target) {
        (None, Some(path)) => {
            let lines = hunks
                .iter()
                .flat_map(|h| h.added_lines())
                .map(str::to_string)
                .collect();
            Ok(FileEdit::Create {
                path: PathBuf::from(path),
                lines,
            })
        }
        (Some(path), None) => Ok(FileEdit::Delete {
            path: PathBuf::from(path),
        }),
        (Some(_), Some(path)) => {
            if hunks.is_empty() {
                return Err(ParseError::MissingHunks { path });
            }
            Ok(FileEdit::Modify {
                path: PathBuf::from(path),
                hunks,
            })
        }
        (None, None) => Err(ParseError::InvalidFileHeader { line: header_line }),
    }
}

/// Parses the hunk whose header is at `start`; returns it and the index of
/// the first line after its body.
fn parse_hunk(lines: &[&str], start: usize) -> Result<(Hunk, usize), ParseError> {
    let header = lines[start];
    let caps = HUNK_HEADER
        .captures(header)
        .ok_or_else(|| ParseError::InvalidHunkHeader {
            line: start + 1,
            header: header.to_string(),
        })?;

    let number = |idx: usize, default: usize| -> Result<usize, ParseError> {
        caps.get(idx).map_or(Ok(default), |m| {
            m.as_str()
                .parse()
                .map_err(|_| ParseError::InvalidHunkHeader {
                    line: start + 1,
                    header: header.to_string(),
                })
        })
    };

    let mut hunk = Hunk {
        source_start: number(1, 0)?,
        source_length: number(2, 1)?,
        target_start: number(3, 0)?,
        target_length: number(4, 1)?,
        lines: Vec::new(),
    };
    // A non-empty side needs a 1-based start.
    if (hunk.source_length > 0 && hunk.source_start == 0)
        || (hunk.target_length > 0 && hunk.target_start == 0)
    {
        return Err(ParseError::InvalidHunkHeader {
            line: start + 1,
            header: header.to_string(),
        });
    }

    // The header counts bound the body: whatever follows a complete hunk is
    // not part of it, even if it looks like a diff line.
    let mut i = start + 1;
    while i < lines.len() && !is_complete(&hunk) {
        let line = lines[i];
        let op = match line.as_bytes().first() {
            Some(b' ') => LineOp::Context(line[1..].to_string()),
            Some(b'+') => LineOp::Added(line[1..].to_string()),
            Some(b'-') => LineOp::Removed(line[1..].to_string()),
            // "\ No newline at end of file"
            Some(b'\\') => {
                i += 1;
                continue;
            }
            // Oracles often drop the single space of an empty context line.
            None => LineOp::Context(String::new()),
            Some(_) => break,
        };
        if !fits(&hunk, &op) {
            break;
        }
        hunk.lines.push(op);
        i += 1;
    }

    if !is_complete(&hunk) {
        return Err(ParseError::TruncatedHunk {
            line: start + 1,
            header: header.to_string(),
            consumed: hunk.source_consumed(),
            produced: hunk.target_produced(),
        });
    }
    while lines.get(i).is_some_and(|line| line.starts_with('\\')) {
        i += 1;
    }

    Ok((hunk, i))
}

fn is_complete(hunk: &Hunk) -> bool {
    hunk.source_consumed() >= hunk.source_length && hunk.target_produced() >= hunk.target_length
}

/// True if `op` stays within the counts announced by the hunk header.
fn fits(hunk: &Hunk, op: &LineOp) -> bool {
    let source_room = hunk.source_consumed() < hunk.source_length;
    let target_room = hunk.target_produced() < hunk.target_length;
    match op {
        LineOp::Context(_) => source_room && target_room,
        LineOp::Removed(_) => source_room,
        LineOp::Added(_) => target_room,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_modify() {
        let diff = "--- a/src/example.py\n+++ b/src/example.py\n@@ -1,3 +1,4 @@\n def hello():\n-    return 1\n+    x = 2\n+    return x\n \n";
        let patch = parse(diff).unwrap();
        assert_eq!(patch.len(), 1);
        let FileEdit::Modify { path, hunks } = &patch.edits[0] else {
            panic!("expected Modify");
        };
        assert_eq!(path, &PathBuf::from("src/example.py"));
        assert_eq!(hunks[0].source_start, 1);
        assert_eq!(hunks[0].source_length, 3);
        assert_eq!(hunks[0].target_length, 4);
        assert_eq!(
            hunks[0].lines,
            vec![
                LineOp::Context("def hello():".into()),
                LineOp::Removed("    return 1".into()),
                LineOp::Added("    x = 2".into()),
                LineOp::Added("    return x".into()),
                LineOp::Context(String::new()),
            ]
        );
    }

    #[test]
    fn test_missing_counts_default_to_one() {
        let patch = parse("--- a/f\n+++ b/f\n@@ -3 +3 @@\n-L3\n+NEW\n").unwrap();
        let FileEdit::Modify { hunks, .. } = &patch.edits[0] else {
            panic!("expected Modify");
        };
        assert_eq!((hunks[0].source_start, hunks[0].source_length), (3, 1));
        assert_eq!((hunks[0].target_start, hunks[0].target_length), (3, 1));
    }

    #[test]
    fn test_parse_create_and_delete() {
        let diff = "diff --git a/new.txt b/new.txt\nnew file mode 100644\n--- /dev/null\n+++ b/docs/new.txt\n@@ -0,0 +1,2 @@\n+hello\n+world\ndiff --git a/old.txt b/old.txt\ndeleted file mode 100644\n--- a/old.txt\n+++ /dev/null\n@@ -1 +0,0 @@\n-bye\n";
        let patch = parse(diff).unwrap();
        assert_eq!(
            patch.edits,
            vec![
                FileEdit::Create {
                    path: PathBuf::from("docs/new.txt"),
                    lines: vec!["hello".into(), "world".into()],
                },
                FileEdit::Delete {
                    path: PathBuf::from("old.txt"),
                },
            ]
        );
    }

    #[test]
    fn test_prefix_strip_is_not_a_character_set() {
        // "a/" must only be removed as a prefix: "build.py" keeps its "b".
        let patch = parse("--- a/build.py\n+++ b/build.py\n@@ -1 +1 @@\n-x\n+y\n").unwrap();
        assert_eq!(patch.edits[0].path(), PathBuf::from("build.py"));
    }

    #[test]
    fn test_timestamp_suffix_ignored() {
        let diff = "--- a/f.txt\t2024-01-01 00:00:00\n+++ b/f.txt\t2024-01-02 00:00:00\n@@ -1 +1 @@\n-a\n+b\n";
        assert_eq!(parse(diff).unwrap().edits[0].path(), PathBuf::from("f.txt"));
    }

    #[test]
    fn test_multiple_hunks_and_files() {
        let diff = "--- a/a.txt\n+++ b/a.txt\n@@ -1,2 +1,2 @@\n-1\n+one\n 2\n@@ -10,1 +10,1 @@\n-10\n+ten\n--- a/b.txt\n+++ b/b.txt\n@@ -1 +1 @@\n-b\n+B\n";
        let patch = parse(diff).unwrap();
        assert_eq!(patch.len(), 2);
        let FileEdit::Modify { hunks, .. } = &patch.edits[0] else {
            panic!("expected Modify");
        };
        assert_eq!(hunks.len(), 2);
        assert_eq!(hunks[1].source_start, 10);
    }

    #[test]
    fn test_removed_line_starting_with_dashes_is_not_a_header() {
        let diff = "--- a/notes.md\n+++ b/notes.md\n@@ -1,2 +1,1 @@\n--- separator\n keep\n";
        let patch = parse(diff).unwrap();
        let FileEdit::Modify { hunks, .. } = &patch.edits[0] else {
            panic!("expected Modify");
        };
        assert_eq!(hunks[0].lines[0], LineOp::Removed("-- separator".into()));
    }

    #[test]
    fn test_no_newline_marker_skipped() {
        let diff = "--- a/f\n+++ b/f\n@@ -1 +1 @@\n-a\n\\ No newline at end of file\n+b\n\\ No newline at end of file\n";
        let patch = parse(diff).unwrap();
        let FileEdit::Modify { hunks, .. } = &patch.edits[0] else {
            panic!("expected Modify");
        };
        assert_eq!(hunks[0].lines.len(), 2);
    }

    #[test]
    fn test_trailing_blank_line_after_complete_hunk_is_dropped() {
        let diff = "--- a/f\n+++ b/f\n@@ -1 +1 @@\n-a\n+b\n\nThanks!\n";
        let patch = parse(diff).unwrap();
        let FileEdit::Modify { hunks, .. } = &patch.edits[0] else {
            panic!("expected Modify");
        };
        assert_eq!(hunks[0].lines.len(), 2);
    }

    #[test]
    fn test_trailing_bullet_after_complete_hunk_is_not_a_removal() {
        let diff = "--- a/f.py\n+++ b/f.py\n@@ -1,1 +1,1 @@\n-a\n+A\n- renamed a to A\n";
        let patch = parse(diff).unwrap();
        let FileEdit::Modify { hunks, .. } = &patch.edits[0] else {
            panic!("expected Modify");
        };
        assert_eq!(
            hunks[0].lines,
            vec![LineOp::Removed("a".into()), LineOp::Added("A".into())]
        );
    }

    #[test]
    fn test_header_lookalike_inside_hunk_is_body() {
        let diff = "--- a/notes.md\n+++ b/notes.md\n@@ -1,2 +1,2 @@\n--- old title\n+++ new title\n keep\n";
        let patch = parse(diff).unwrap();
        assert_eq!(patch.len(), 1);
        let FileEdit::Modify { hunks, .. } = &patch.edits[0] else {
            panic!("expected Modify");
        };
        assert_eq!(
            hunks[0].lines,
            vec![
                LineOp::Removed("-- old title".into()),
                LineOp::Added("++ new title".into()),
                LineOp::Context("keep".into()),
            ]
        );
    }

    #[test]
    fn test_body_shorter_than_header_is_parse_error() {
        let err = parse("--- a/f\n+++ b/f\n@@ -1,3 +1,3 @@\n a\n-b\n+B\nThat's all.\n").unwrap_err();
        assert_eq!(
            err,
            ParseError::TruncatedHunk {
                line: 3,
                header: "@@ -1,3 +1,3 @@".into(),
                consumed: 2,
                produced: 2,
            }
        );
    }

    #[test]
    fn test_excess_added_lines_are_truncated_hunk() {
        let err = parse("--- a/f\n+++ b/f\n@@ -1,2 +1,2 @@\n-a\n+A\n+extra\n b\n").unwrap_err();
        assert!(matches!(err, ParseError::TruncatedHunk { consumed: 1, produced: 2, .. }));
    }

    #[test]
    fn test_zero_start_with_lines_is_invalid_header() {
        let err = parse("--- a/f\n+++ b/f\n@@ -0,1 +1 @@\n-a\n+b\n").unwrap_err();
        assert!(matches!(err, ParseError::InvalidHunkHeader { line: 3, .. }));
    }

    #[test]
    fn test_no_headers_is_parse_error() {
        assert_eq!(parse("no headers here"), Err(ParseError::MissingFileHeader));
    }

    #[test]
    fn test_empty_is_parse_error() {
        assert_eq!(parse(""), Err(ParseError::Empty));
        assert_eq!(parse("```diff\n```"), Err(ParseError::Empty));
    }

    #[test]
    fn test_bad_hunk_header() {
        let err = parse("--- a/f\n+++ b/f\n@@ -x,1 +1 @@\n-a\n").unwrap_err();
        assert!(matches!(err, ParseError::InvalidHunkHeader { line: 3, .. }));
    }

    #[test]
    fn test_modify_without_hunks() {
        let err = parse("--- a/f\n+++ b/f\n").unwrap_err();
        assert_eq!(err, ParseError::MissingHunks { path: "f".into() });
    }
}
