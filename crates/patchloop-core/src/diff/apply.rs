//! Pure hunk application over an explicit read cursor.

use super::{Hunk, HunkError, LineOp};

/// Applies `hunks` to `original` and returns the new content.
///
/// Original lines keep their terminators. Added lines use the file's
/// line-ending style (`\r\n` if the first line uses it, else `\n`).
/// Context lines must match the original ignoring trailing `\r`/`\n`.
/// Removed lines advance the cursor without being emitted.
///
/// A hunk with `source_length == 0` inserts after line `source_start`,
/// as in `diff -u` output; every other hunk starts at `source_start`.
pub fn apply_hunks(original: &str, hunks: &[Hunk]) -> Result<String, HunkError> {
    let lines: Vec<&str> = original.split_inclusive('\n').collect();
    let eol = if lines.first().is_some_and(|l| l.ends_with("\r\n")) {
        "\r\n"
    } else {
        "\n"
    };

    let mut out = String::with_capacity(original.len());
    let mut cursor = 0;

    for (index, hunk) in hunks.iter().enumerate() {
        let number = index + 1;
        let start = if hunk.source_length == 0 {
            hunk.source_start
        } else {
            hunk.source_start.saturating_sub(1)
        };

        if start < cursor {
            return Err(HunkError::Overlap {
                hunk: number,
                start: start + 1,
                cursor,
            });
        }
        if start > lines.len() {
            return Err(HunkError::StartPastEnd {
                hunk: number,
                start: hunk.source_start,
                len: lines.len(),
            });
        }

        for line in &lines[cursor..start] {
            push_original(&mut out, line, eol);
        }
        cursor = start;

        for op in &hunk.lines {
            match op {
                LineOp::Added(text) => push_added(&mut out, text, eol),
                LineOp::Removed(_) => {
                    if cursor >= lines.len() {
                        return Err(HunkError::PastEnd {
                            hunk: number,
                            line: cursor + 1,
                        });
                    }
                    cursor += 1;
                }
                LineOp::Context(text) => {
                    let Some(current) = lines.get(cursor) else {
                        return Err(HunkError::PastEnd {
                            hunk: number,
                            line: cursor + 1,
                        });
                    };
                    if strip_eol(current) != strip_eol(text) {
                        return Err(HunkError::Mismatch {
                            hunk: number,
                            line: cursor + 1,
                            expected: strip_eol(text).to_string(),
                            found: strip_eol(current).to_string(),
                        });
                    }
                    push_original(&mut out, current, eol);
                    cursor += 1;
                }
            }
        }
    }

    for line in &lines[cursor..] {
        push_original(&mut out, line, eol);
    }
    Ok(out)
}

fn strip_eol(line: &str) -> &str {
    line.trim_end_matches(['\n', '\r'])
}

/// Terminates a previous unterminated last line before appending more.
fn terminate_previous(out: &mut String, eol: &str) {
    if !out.is_empty() && !out.ends_with('\n') {
        out.push_str(eol);
    }
}

fn push_original(out: &mut String, line: &str, eol: &str) {
    terminate_previous(out, eol);
    out.push_str(line);
}

fn push_added(out: &mut String, text: &str, eol: &str) {
    terminate_previous(out, eol);
    out.push_str(strip_eol(text));
    out.push_str(eol);
}
