//! Sentence segmentation for narration.
//!
//! Source text may carry inline `{...}` annotations (pronunciation guides,
//! romanization) that must never be spoken or matched against; those are
//! stripped before splitting. Splitting handles mixed-script text by treating
//! both ASCII and CJK full-width sentence punctuation as boundaries.

use once_cell::sync::Lazy;
use regex::Regex;

static RE_ANNOTATION_BLOCK: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{[^}]*\}").unwrap());
static RE_WHITESPACE_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());
static RE_SENTENCE_BOUNDARY: Lazy<Regex> = Lazy::new(|| Regex::new(r"[。！？.!?\n]+").unwrap());

/// Remove `{...}` annotation spans, then collapse whitespace runs to a single
/// space and trim.
pub fn clean_for_speech(text: &str) -> String {
    let stripped = RE_ANNOTATION_BLOCK.replace_all(text, "");
    collapse_whitespace(&stripped)
}

/// Collapse all whitespace runs (spaces, tabs, newlines) to single spaces.
pub fn collapse_whitespace(text: &str) -> String {
    RE_WHITESPACE_RUN.replace_all(text, " ").trim().to_string()
}

/// Split text into narration sentences.
///
/// Pure and deterministic: annotations are stripped, whitespace is
/// normalized, then the text is split on runs of sentence punctuation.
/// Empty or whitespace-only input yields an empty vector.
pub fn split_sentences(text: &str) -> Vec<String> {
    let cleaned = clean_for_speech(text);
    if cleaned.is_empty() {
        return Vec::new();
    }
    RE_SENTENCE_BOUNDARY
        .split(&cleaned)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
