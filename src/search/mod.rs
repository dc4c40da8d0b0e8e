pub mod similarity;

use serde::{Deserialize, Serialize};

/// One hit: a movie id and its similarity to the query.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimilarityResult {
    pub id: i64,
    pub score: f32,
}

/// Rank `(id, score)` candidates best-first.
///
/// The sort is stable, so equal scores keep candidate order. Scores below
/// `min_similarity` (and NaN) are dropped, `exclude` is skipped, and at most
/// `top_k` results come back.
pub fn rank<I>(
    candidates: I,
    top_k: usize,
    min_similarity: f32,
    exclude: Option<i64>,
) -> Vec<SimilarityResult>
where
    I: IntoIterator<Item = (i64, f32)>,
{
    if top_k == 0 {
        return Vec::new();
    }
    let mut scored: Vec<SimilarityResult> = candidates
        .into_iter()
        .filter(|&(id, score)| Some(id) != exclude && score >= min_similarity)
        .map(|(id, score)| SimilarityResult { id, score })
        .collect();

    scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(top_k);
    scored
}
