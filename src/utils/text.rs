//! Text processing utilities.

use std::sync::LazyLock;

use regex::Regex;
use sha2::{Digest, Sha256};

/// Minimum non-whitespace characters for meaningful content.
pub const MIN_CONTENT_LENGTH: usize = 50;

static RE_NON_SLUG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^a-z0-9]+").unwrap());

/// Check if content has meaningful text (not just whitespace/punctuation).
pub fn has_meaningful_content(content: &str) -> bool {
    non_whitespace_len(content) >= MIN_CONTENT_LENGTH
}

/// Smallest share of the source text a rewrite must keep.
pub const MIN_REWRITE_RATIO: f64 = 0.25;

/// A rewrite of `source` is plausible when it has meaningful content and keeps
/// at least [`MIN_REWRITE_RATIO`] of the source's non-whitespace characters.
pub fn is_plausible_rewrite(source: &str, rewritten: &str) -> bool {
    if !has_meaningful_content(rewritten) {
        return false;
    }
    let kept = non_whitespace_len(rewritten) as f64;
    kept >= non_whitespace_len(source) as f64 * MIN_REWRITE_RATIO
}

fn non_whitespace_len(text: &str) -> usize {
    text.chars().filter(|c| !c.is_whitespace()).count()
}

/// Calculate SHA-256 checksum of content.
pub fn calculate_checksum(content: &str) -> String {
    let hash = Sha256::digest(content.as_bytes());
    hex::encode(hash)
}

/// Lowercase ASCII slug, at most `max_len` characters, never empty.
pub fn slugify(text: &str, max_len: usize) -> String {
    let lower = text.to_lowercase();
    let slug = RE_NON_SLUG.replace_all(&lower, "-");
    let slug: String = slug.trim_matches('-').chars().take(max_len).collect();
    let slug = slug.trim_end_matches('-').to_string();
    if slug.is_empty() {
        "doc".to_string()
    } else {
        slug
    }
}

/// Truncate to at most `max_chars` characters, appending an ellipsis when cut.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars).collect();
    out.push('…');
    out
}
