//! Parsers for free-text model output.

use std::sync::LazyLock;

use regex::Regex;

static THINK_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<think>.*?</think>").unwrap());

static CODE_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)^```[A-Za-z0-9_-]*\s*\n?(.*?)\n?```$").unwrap());

/// Delimiter for lists of candidate identifiers.
pub const ID_DELIMITER: char = ',';

/// Delimiter for lists of labels.
pub const LABEL_DELIMITER: char = ';';

/// Split `text` on `delimiter` without breaking URIs that contain it.
///
/// Tokens are trimmed. A token starting with `http://` or `https://` opens a
/// URI value; following tokens are joined back onto it with `delimiter` until
/// another URI starts or the input ends. Exact duplicates are removed, keeping
/// the first occurrence.
pub fn parse_delimited_list(text: &str, delimiter: char) -> Vec<String> {
    let mut parts: Vec<String> = Vec::new();
    let mut buffer = String::new();
    let mut inside_uri = false;

    for part in text.split(delimiter) {
        let part = part.trim();
        if part.starts_with("http://") || part.starts_with("https://") {
            if inside_uri {
                parts.push(buffer.trim().to_string());
            }
            buffer = part.to_string();
            inside_uri = true;
        } else if inside_uri {
            buffer.push(delimiter);
            buffer.push_str(part);
        } else {
            parts.push(part.to_string());
        }
    }
    if !buffer.is_empty() {
        parts.push(buffer.trim().to_string());
    }

    let mut seen = std::collections::HashSet::new();
    parts.retain(|p| seen.insert(p.clone()));
    parts
}

/// Remove `<think>...</think>` reasoning blocks and trim the rest.
pub fn strip_reasoning(text: &str) -> String {
    THINK_BLOCK.replace_all(text, "").trim().to_string()
}

/// Unwrap a Markdown code fence if the whole text is one.
pub fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    CODE_FENCE
        .captures(trimmed)
        .and_then(|c| c.get(1))
        .map_or(trimmed, |m| m.as_str().trim())
}
