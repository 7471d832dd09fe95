//! Text similarity for near-duplicate detection.
//!
//! Candidate descriptions are short templated sentences, so token overlap
//! captures "same suggestion re-worded" better than character edits would.
//! The metric is token-set Jaccard over lowercased alphanumeric tokens; the
//! threshold that counts as a near match lives in `EngineConfig`.

use std::collections::HashSet;

fn tokens(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

/// Jaccard similarity of the two texts' token sets, in [0, 1].
///
/// Two empty texts are identical (1.0); one empty text matches nothing (0.0).
pub fn token_set_jaccard(a: &str, b: &str) -> f64 {
    let set_a = tokens(a);
    let set_b = tokens(b);

    if set_a.is_empty() && set_b.is_empty() {
        return 1.0;
    }
    if set_a.is_empty() || set_b.is_empty() {
        return 0.0;
    }

    let intersection = set_a.intersection(&set_b).count();
    let union = set_a.len() + set_b.len() - intersection;
    intersection as f64 / union as f64
}
