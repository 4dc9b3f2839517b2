//! Reciprocal Rank Fusion
//!
//! Combines keyword and vector result lists using the RRF formula:
//! score(d) = sum over sources of 1/(k + rank(d)). RRF normalizes across
//! different scoring scales and rewards candidates appearing in both lists;
//! the k constant dampens the effect of top ranks.

use std::collections::HashMap;

/// Fusion constant
pub const RRF_K: f32 = 60.0;

/// Fuse ranked result lists. Input scores are ignored; only ranks matter.
pub fn reciprocal_rank_fusion(
    keyword_results: &[(String, f32)],
    vector_results: &[(String, f32)],
    k: f32,
) -> Vec<(String, f32)> {
    let mut scores: HashMap<String, f32> = HashMap::new();

    for (rank, (fid, _)) in keyword_results.iter().enumerate() {
        *scores.entry(fid.clone()).or_default() += 1.0 / (k + rank as f32);
    }
    for (rank, (fid, _)) in vector_results.iter().enumerate() {
        *scores.entry(fid.clone()).or_default() += 1.0 / (k + rank as f32);
    }

    let mut results: Vec<(String, f32)> = scores.into_iter().collect();
    results.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
    results
}
