//! Strips the wrapping that oracles put around diffs.

use regex::Regex;
use std::sync::LazyLock;

static FENCED_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```[A-Za-z0-9_+-]*[ \t]*\r?\n(.*?)```").expect("fence pattern compiles")
});

/// Reduces raw oracle output to the diff body.
///
/// Fenced blocks win over surrounding prose; when several fenced blocks
/// carry file headers they are concatenated in order. Anything before the
/// first file header is dropped.
pub fn clean(raw: &str) -> String {
    let fenced: Vec<&str> = FENCED_BLOCK
        .captures_iter(raw)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str()))
        .collect();

    let body = if fenced.is_empty() {
        raw.to_string()
    } else {
        let with_headers: Vec<&str> = fenced
            .iter()
            .copied()
            .filter(|block| first_header_offset(block).is_some())
            .collect();
        if with_headers.is_empty() {
            fenced[0].to_string()
        } else {
            with_headers.join("\n")
        }
    };

    let start = first_header_offset(&body).unwrap_or(0);
    // Only line breaks are trimmed; trailing spaces can be part of a context line.
    let trimmed = body[start..]
        .trim_start_matches(['\r', '\n'])
        .trim_end_matches(['\r', '\n']);
    if trimmed.trim().is_empty() {
        String::new()
    } else {
        trimmed.to_string()
    }
}

/// Byte offset of the first `diff --git` line or `---`/`+++` header pair.
fn first_header_offset(text: &str) -> Option<usize> {
    let mut offset = 0;
    let mut lines = text.split_inclusive('\n').peekable();
    while let Some(line) = lines.next() {
        if line.starts_with("diff --git ") {
            return Some(offset);
        }
        if line.starts_with("--- ")
            && let Some(next) = lines.peek()
            && next.starts_with("+++ ")
        {
            return Some(offset);
        }
        offset += line.len();
    }
    None
}
