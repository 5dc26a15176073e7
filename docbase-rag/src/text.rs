//! Text normalisation applied to uploaded documents before ingestion.

use std::sync::LazyLock;

use regex::Regex;

static PARAGRAPH_BREAK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\s*\n\s*\n\s*").expect("unreachable error: invalid paragraph pattern")
});
static WHITESPACE_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("unreachable error: invalid whitespace pattern"));
static REPEATED_TERMINATOR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[.!?]{2,}").expect("unreachable error: invalid terminator pattern")
});

fn is_kept(c: char) -> bool {
    c.is_alphanumeric()
        || c.is_whitespace()
        || matches!(
            c,
            '_' | '.'
                | ','
                | '!'
                | '?'
                | ';'
                | ':'
                | '-'
                | '('
                | ')'
                | '['
                | ']'
                | '\''
                | '"'
                | '@'
                | '+'
                | '/'
                | '\\'
                | '='
                | '&'
                | '%'
                | '$'
                | '#'
        )
}

/// Normalise extracted document text.
///
/// - drops symbols outside letters, digits and common punctuation
///   (`@ + / \ = & % $ #` are kept for emails, phone numbers and paths)
/// - keeps paragraph breaks as a single blank line and collapses every other
///   whitespace run to one space
/// - collapses runs of sentence terminators (`?!`, `...`) to their last one
pub fn clean_text(text: &str) -> String {
    let kept: String = text.chars().filter(|&c| is_kept(c)).collect();
    let paragraphs: Vec<String> = PARAGRAPH_BREAK
        .split(&kept)
        .map(|p| WHITESPACE_RUN.replace_all(p.trim(), " ").into_owned())
        .filter(|p| !p.is_empty())
        .collect();
    let joined = paragraphs.join("\n\n");
    REPEATED_TERMINATOR
        .replace_all(&joined, |caps: &regex::Captures<'_>| {
            caps[0].chars().last().map(String::from).unwrap_or_default()
        })
        .into_owned()
}

/// Number of non-whitespace characters in `text`.
pub fn meaningful_chars(text: &str) -> usize {
    text.chars().filter(|c| !c.is_whitespace()).count()
}
