//! Text cleanup for the synthesis backend.
//!
//! Turns arbitrary event text (markup, emoji, bullet glyphs, stray
//! symbols) into a short speakable string.

use std::sync::LazyLock;

use regex::Regex;

static TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]*>").unwrap());
static WHITESPACE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// Glyphs the synthesis backend reads out literally or chokes on.
const PROBLEM_GLYPHS: [char; 10] = ['→', '←', '↑', '↓', '•', '◦', '▪', '▫', '★', '☆'];

const KEPT_PUNCTUATION: [char; 8] = ['.', ',', '!', '?', '-', '\'', '"', ':'];

const ELLIPSIS: &str = "...";

/// A sentence terminator must sit past this index to be used as the cut point.
const MIN_SENTENCE_CUT: usize = 50;

fn is_emoji(c: char) -> bool {
    matches!(c as u32, 0x2600..=0x27BF | 0xE000..=0xF8FF | 0x10000..)
}

fn is_kept(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c.is_whitespace() || KEPT_PUNCTUATION.contains(&c)
}

/// Normalize `text` into at most `max_length` characters of plain speech.
///
/// Never fails; empty input yields an empty string.
pub fn clean(text: &str, max_length: usize) -> String {
    if text.is_empty() {
        return String::new();
    }

    let stripped = TAG_RE.replace_all(text, "");
    let filtered: String = stripped
        .chars()
        .filter(|&c| !is_emoji(c) && !PROBLEM_GLYPHS.contains(&c) && is_kept(c))
        .collect();
    let collapsed = WHITESPACE_RE.replace_all(&filtered, " ");
    let cleaned = collapsed.trim();

    if cleaned.chars().count() <= max_length {
        return cleaned.to_string();
    }
    truncate(cleaned, max_length)
}

fn truncate(text: &str, max_length: usize) -> String {
    let head: Vec<char> = text.chars().take(max_length).collect();

    let last_terminator = head.iter().rposition(|c| matches!(c, '.' | '!' | '?'));
    if let Some(idx) = last_terminator.filter(|&i| i > MIN_SENTENCE_CUT) {
        return head[..=idx].iter().collect();
    }

    if max_length <= ELLIPSIS.len() {
        let out: String = head.into_iter().collect();
        return out.trim_end().to_string();
    }

    let keep = max_length - ELLIPSIS.len();
    let mut out: String = head[..keep].iter().collect();
    out.truncate(out.trim_end().len());
    out.push_str(ELLIPSIS);
    out
}

/// Whether cleaned text is worth narrating.
///
/// Rejects blank or very short text and anything shaped like a raw
/// interaction log line (`A -> B: ...`).
pub fn is_valid(text: &str) -> bool {
    if text.trim().is_empty() {
        return false;
    }
    if text.chars().count() < 3 {
        return false;
    }
    !(text.contains("->") && text.contains(':'))
}
