//! Rank fusion: merge vector and lexical result lists into one ordered
//! list.
//!
//! Reciprocal Rank Fusion is the default strategy because it works on
//! ranks alone; no score normalization is needed across the
//! heterogeneous cosine and BM25 scales. The weighted strategy min-max
//! normalizes each source to `[0, 1]` before blending.

use std::cmp::Ordering;
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::models::{RetrievalResult, SourceTag};

/// Default RRF smoothing constant. Dampens the advantage of rank-1 items.
pub const DEFAULT_RRF_K: u32 = 60;

/// How to merge the two ranked lists.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "kebab-case")]
pub enum FusionStrategy {
    /// Pass the vector list through unchanged.
    VectorOnly,
    /// Pass the lexical list through unchanged.
    LexicalOnly,
    /// `score = alpha · norm(vector) + (1 − alpha) · norm(lexical)`,
    /// `alpha ∈ [0, 1]`. A document absent from a source contributes 0.
    Weighted { alpha: f64 },
    /// `score = Σ 1 / (k + rank)` over each source where the document
    /// appears.
    ReciprocalRank { k: u32 },
}

impl Default for FusionStrategy {
    fn default() -> Self {
        FusionStrategy::ReciprocalRank { k: DEFAULT_RRF_K }
    }
}

/// Merge two ranked lists into one relevance-ordered list.
///
/// Input ranks are expected to be 1-based and ascending. The output is
/// re-ranked from 1 with `SourceTag::Fused` (pass-through strategies keep
/// their original tag). Ties break by ascending document id.
pub fn fuse(
    vector_results: &[RetrievalResult],
    lexical_results: &[RetrievalResult],
    strategy: FusionStrategy,
) -> Vec<RetrievalResult> {
    match strategy {
        FusionStrategy::VectorOnly => vector_results.to_vec(),
        FusionStrategy::LexicalOnly => lexical_results.to_vec(),
        FusionStrategy::Weighted { alpha } => {
            let alpha = alpha.clamp(0.0, 1.0);
            let vec_norm = normalize(vector_results);
            let lex_norm = normalize(lexical_results);

            let mut scores: HashMap<&str, f64> = HashMap::new();
            for &(id, s) in &vec_norm {
                *scores.entry(id).or_default() += alpha * s;
            }
            for &(id, s) in &lex_norm {
                *scores.entry(id).or_default() += (1.0 - alpha) * s;
            }
            rank(scores)
        }
        FusionStrategy::ReciprocalRank { k } => {
            let mut scores: HashMap<&str, f64> = HashMap::new();
            for r in vector_results.iter().chain(lexical_results.iter()) {
                *scores.entry(r.id.as_str()).or_default() += 1.0 / (k as f64 + r.rank as f64);
            }
            rank(scores)
        }
    }
}

/// Drop everything below the relevance threshold.
///
/// An empty result set means "no relevant context" and is a valid
/// outcome, never an error.
pub fn apply_threshold(results: Vec<RetrievalResult>, min_score: f64) -> Vec<RetrievalResult> {
    let mut kept: Vec<RetrievalResult> = results
        .into_iter()
        .filter(|r| r.score >= min_score)
        .collect();
    for (i, r) in kept.iter_mut().enumerate() {
        r.rank = i + 1;
    }
    kept
}

/// Min-max normalize a source's scores to `[0, 1]`. A single-score or
/// all-equal list normalizes to 1.0.
fn normalize(results: &[RetrievalResult]) -> Vec<(&str, f64)> {
    if results.is_empty() {
        return Vec::new();
    }
    let min = results.iter().map(|r| r.score).fold(f64::INFINITY, f64::min);
    let max = results
        .iter()
        .map(|r| r.score)
        .fold(f64::NEG_INFINITY, f64::max);

    results
        .iter()
        .map(|r| {
            let norm = if (max - min).abs() < f64::EPSILON {
                1.0
            } else {
                (r.score - min) / (max - min)
            };
            (r.id.as_str(), norm)
        })
        .collect()
}

fn rank(scores: HashMap<&str, f64>) -> Vec<RetrievalResult> {
    let mut fused: Vec<(&str, f64)> = scores.into_iter().collect();
    fused.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.0.cmp(b.0))
    });
    fused
        .into_iter()
        .enumerate()
        .map(|(i, (id, score))| RetrievalResult::new(id, score, i + 1, SourceTag::Fused))
        .collect()
}
