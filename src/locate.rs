//! Map an on-screen text selection back onto a narration sentence.
//!
//! Selections rarely line up with sentence boundaries, so matching cascades
//! through four heuristics with different tradeoffs. The tier order and
//! thresholds are deliberate; each tier recovers cases the previous one
//! misses (spanning selections, unspaced CJK runs, long selections with a
//! recognizable head, and noisy selections with mostly-overlapping
//! characters).

use crate::segment::collapse_whitespace;
use tracing::debug;

/// Longest prefix fragment used by the third tier.
const PREFIX_FRAGMENT_CHARS: usize = 10;
/// Minimum character-overlap fraction accepted by the fourth tier.
const MIN_OVERLAP_SCORE: f64 = 0.5;

/// Find the sentence best matching `selection`, if any.
///
/// Selections shorter than two characters after whitespace cleanup are
/// rejected outright; a single character would match almost anywhere.
pub fn find_sentence(sentences: &[String], selection: &str) -> Option<usize> {
    if sentences.is_empty() {
        return None;
    }
    let cleaned = collapse_whitespace(selection);
    if cleaned.chars().count() < 2 {
        return None;
    }

    if let Some(idx) = match_containment(sentences, &cleaned) {
        debug!(idx, "Selection matched by substring containment");
        return Some(idx);
    }
    if let Some(idx) = match_stripped_containment(sentences, &cleaned) {
        debug!(idx, "Selection matched after whitespace stripping");
        return Some(idx);
    }
    if let Some(idx) = match_prefix_fragment(sentences, &cleaned) {
        debug!(idx, "Selection matched by prefix fragment");
        return Some(idx);
    }
    if let Some(idx) = match_best_overlap(sentences, &cleaned) {
        debug!(idx, "Selection matched by character overlap");
        return Some(idx);
    }
    debug!("Selection matched no sentence");
    None
}

/// Tier 1: the selection contains the sentence or vice versa, whitespace
/// preserved. Handles selections spanning slightly more or less than one
/// sentence.
fn match_containment(sentences: &[String], cleaned: &str) -> Option<usize> {
    sentences.iter().position(|sentence| {
        let sentence = sentence.trim();
        sentence.contains(cleaned) || cleaned.contains(sentence)
    })
}

/// Tier 2: same containment test with all whitespace removed from both
/// sides. Recovers scripts without word spacing where selection boundaries
/// fall mid-run.
fn match_stripped_containment(sentences: &[String], cleaned: &str) -> Option<usize> {
    let selection_chars = strip_whitespace(cleaned);
    sentences.iter().position(|sentence| {
        let sentence_chars = strip_whitespace(sentence);
        sentence_chars.contains(&selection_chars) || selection_chars.contains(&sentence_chars)
    })
}

/// Tier 3: match on the first few characters of the stripped selection.
fn match_prefix_fragment(sentences: &[String], cleaned: &str) -> Option<usize> {
    let stripped = strip_whitespace(cleaned);
    let fragment: String = stripped.chars().take(PREFIX_FRAGMENT_CHARS).collect();
    if fragment.is_empty() {
        return None;
    }
    sentences
        .iter()
        .position(|sentence| strip_whitespace(sentence).contains(&fragment))
}

/// Tier 4: per-character overlap fraction, duplicates counted, strictly
/// above [`MIN_OVERLAP_SCORE`]. The first sentence with the highest score
/// wins, so ties resolve to the lowest index.
fn match_best_overlap(sentences: &[String], cleaned: &str) -> Option<usize> {
    let selection_chars: Vec<char> = strip_whitespace(cleaned).chars().collect();
    if selection_chars.is_empty() {
        return None;
    }

    let mut best: Option<(usize, f64)> = None;
    for (idx, sentence) in sentences.iter().enumerate() {
        let sentence_chars = strip_whitespace(sentence);
        let matched = selection_chars
            .iter()
            .filter(|c| sentence_chars.contains(**c))
            .count();
        let score = matched as f64 / selection_chars.len() as f64;
        if score > MIN_OVERLAP_SCORE && best.map(|(_, s)| score > s).unwrap_or(true) {
            best = Some((idx, score));
        }
    }
    best.map(|(idx, _)| idx)
}

fn strip_whitespace(text: &str) -> String {
    text.chars().filter(|c| !c.is_whitespace()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sentences(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn exact_sentence_matches_first_tier() {
        let sents = sentences(&["Hello there", "How are you", "Fine thanks"]);
        assert_eq!(find_sentence(&sents, "How are you"), Some(1));
    }

    #[test]
    fn partial_selection_matches_containing_sentence() {
        let sents = sentences(&["The quick brown fox jumps", "over the lazy dog"]);
        assert_eq!(find_sentence(&sents, "quick brown"), Some(0));
    }

    #[test]
    fn selection_spanning_past_a_sentence_still_matches_it() {
        // Selection contains the whole second sentence plus trailing words.
        let sents = sentences(&["alpha beta", "gamma delta"]);
        assert_eq!(find_sentence(&sents, "gamma delta epsilon"), Some(1));
    }

    #[test]
    fn cjk_selection_with_odd_spacing_matches_second_tier() {
        let sents = sentences(&["你好 嗎 早晨", "我很好"]);
        assert_eq!(find_sentence(&sents, "好嗎早"), Some(0));
    }

    #[test]
    fn long_selection_matches_by_prefix_fragment() {
        // Whole selection appears nowhere, but its first ten stripped
        // characters do.
        let sents = sentences(&["abcdefghijklmno", "zzzz"]);
        assert_eq!(find_sentence(&sents, "abcdefghij UNRELATED TAIL"), Some(0));
    }

    #[test]
    fn noisy_selection_matches_by_overlap() {
        let sents = sentences(&["the cat sat on the mat", "xylophones quiver"]);
        // Scrambled but shares most characters with the first sentence.
        assert_eq!(find_sentence(&sents, "tac tas eht--"), Some(0));
    }

    #[test]
    fn overlap_ties_resolve_to_lowest_index() {
        let sents = sentences(&["abcq", "abcz"]);
        // "abc!" scores 0.75 against both; the first wins.
        assert_eq!(find_sentence(&sents, "abc!"), Some(0));
    }

    #[test]
    fn single_character_selection_is_rejected() {
        let sents = sentences(&["a sentence"]);
        assert_eq!(find_sentence(&sents, "a"), None);
        assert_eq!(find_sentence(&sents, "  a  "), None);
    }

    #[test]
    fn disjoint_selection_matches_nothing() {
        let sents = sentences(&["alpha beta gamma"]);
        assert_eq!(find_sentence(&sents, "0123456789"), None);
    }

    #[test]
    fn empty_sentence_list_matches_nothing() {
        assert_eq!(find_sentence(&[], "anything"), None);
    }

    #[test]
    fn whitespace_in_selection_is_collapsed_before_matching() {
        let sents = sentences(&["Hello wide world"]);
        assert_eq!(find_sentence(&sents, "Hello   wide\nworld"), Some(0));
    }
}
