//! Vector similarity metrics.
//!
//! Every metric returns "higher is more similar", so the searcher can rank
//! uniformly regardless of which one is configured.
//!
//! | Name | Score |
//! |------|-------|
//! | `cosine` | `a·b / (‖a‖ ‖b‖)`, `0.0` when either norm is zero |
//! | `euclidean` | `−‖a − b‖` |
//! | `dot` | `a·b` |

use std::fmt;

use crate::error::{Error, Result};

/// Scores a pair of equal-length vectors.
pub trait SimilarityMetric: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;
    /// Callers guarantee `a.len() == b.len()`.
    fn score(&self, a: &[f32], b: &[f32]) -> f32;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Cosine;

#[derive(Debug, Clone, Copy, Default)]
pub struct Euclidean;

#[derive(Debug, Clone, Copy, Default)]
pub struct DotProduct;

impl SimilarityMetric for Cosine {
    fn name(&self) -> &str {
        "cosine"
    }

    fn score(&self, a: &[f32], b: &[f32]) -> f32 {
        cosine_similarity(a, b)
    }
}

impl SimilarityMetric for Euclidean {
    fn name(&self) -> &str {
        "euclidean"
    }

    fn score(&self, a: &[f32], b: &[f32]) -> f32 {
        let sum: f32 = a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum();
        -sum.sqrt()
    }
}

impl SimilarityMetric for DotProduct {
    fn name(&self) -> &str {
        "dot"
    }

    fn score(&self, a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`, or `0.0` for empty vectors, vectors
/// of different lengths, or a zero-norm input.
///
/// ```text
///            a · b
/// cos(θ) = ─────────
///          ‖a‖ × ‖b‖
/// ```
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom == 0.0 {
        return 0.0;
    }

    dot / denom
}

/// Look up a metric by its config name.
pub fn metric_from_name(name: &str) -> Result<Box<dyn SimilarityMetric>> {
    match name {
        "cosine" => Ok(Box::new(Cosine)),
        "euclidean" => Ok(Box::new(Euclidean)),
        "dot" | "dot_product" => Ok(Box::new(DotProduct)),
        other => Err(Error::invalid_argument(format!(
            "unknown similarity metric '{}': expected cosine, euclidean, or dot",
            other
        ))),
    }
}
