//! Normalization of lookup terms and lyric text.
//!
//! The lyric service indexes loosely, so query terms are reduced to letters,
//! digits, whitespace and hyphens before searching.

use once_cell::sync::Lazy;
use regex::Regex;
use unicode_normalization::UnicodeNormalization;

// ============================================================================
// REGEX PATTERNS
// ============================================================================

/// Anything that is not a letter, digit, whitespace or hyphen.
pub static QUERY_PUNCTUATION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^\p{L}\p{N}\s-]").unwrap());

/// Runs of whitespace, collapsed to one space.
pub static WHITESPACE_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

// ============================================================================
// NORMALIZATION FUNCTIONS
// ============================================================================

/// Reduces an artist/title/album to the characters the lookup service matches on.
///
/// Text is NFC-composed first so that decomposed accents survive as part of
/// their letter instead of being stripped as stray marks.
pub fn clean_query_term(term: &str) -> String {
    let composed: String = term.nfc().collect();
    let stripped = QUERY_PUNCTUATION.replace_all(&composed, "");
    WHITESPACE_RUN.replace_all(stripped.trim(), " ").into_owned()
}

/// Like [`clean_query_term`], but yields `None` when nothing usable is left.
pub fn clean_optional_term(term: Option<&str>) -> Option<String> {
    term.map(clean_query_term).filter(|t| !t.is_empty())
}

/// Converts CRLF/CR line endings to LF and guarantees a trailing newline.
pub fn normalize_line_endings(text: &str) -> String {
    let mut out = text.replace("\r\n", "\n").replace('\r', "\n");
    let trimmed_len = out.trim_end_matches('\n').len();
    out.truncate(trimmed_len);
    out.push('\n');
    out
}

// ============================================================================
// TESTS
// ============================================================================
