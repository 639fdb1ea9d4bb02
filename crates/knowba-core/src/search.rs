//! Brute-force nearest-neighbour ranking.
//!
//! Stores hold a few thousand vectors per named database, so an exact
//! linear scan with cosine similarity is used instead of an ANN index.

use std::cmp::Ordering;

use crate::embedding::cosine_similarity;

/// Default number of results returned by a search.
pub const DEFAULT_TOP_K: usize = 4;

/// Position of a stored vector plus its similarity to the query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scored {
    pub position: usize,
    pub score: f32,
}

/// Return the `k` vectors most similar to `query`, best first.
///
/// Ties keep insertion order, so results are deterministic.
pub fn top_k<'a, I>(query: &[f32], vectors: I, k: usize) -> Vec<Scored>
where
    I: IntoIterator<Item = &'a [f32]>,
{
    if k == 0 {
        return Vec::new();
    }

    let mut scored: Vec<Scored> = vectors
        .into_iter()
        .enumerate()
        .map(|(position, v)| Scored {
            position,
            score: cosine_similarity(query, v),
        })
        .collect();

    scored.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then(a.position.cmp(&b.position))
    });
    scored.truncate(k);
    scored
}
