// EmbeddingWithNorm and the cosine-similarity primitive.
//
// The clustering and validation passes make O(T·C²) similarity comparisons.
// Precomputing each vector's L2 norm once at construction (instead of twice
// per comparison) roughly triples the arithmetic efficiency of those passes,
// so the norm travels with the vector as a single immutable value.

use std::sync::Arc;

use anyhow::Result;
use tracing::{error, warn};

/// A fixed-length embedding vector with its precomputed L2 norm.
///
/// The vector is frozen behind an Arc after construction: centroids and
/// other derived vectors are always freshly allocated, never in-place
/// updates of a source vector. Construction is the single validation
/// boundary — every component must be finite and the norm finite and
/// positive, regardless of which backend produced the raw floats.
#[derive(Debug, Clone)]
pub struct EmbeddingWithNorm {
    vector: Arc<[f64]>,
    norm: f64,
    model_id: Arc<str>,
}

impl EmbeddingWithNorm {
    /// Validate and freeze a raw backend vector.
    ///
    /// Rejects empty vectors, non-finite components, and zero/non-finite
    /// norms. Callers log and skip the affected unit rather than crashing.
    pub fn new(vector: Vec<f64>, model_id: &str) -> Result<Self> {
        if vector.is_empty() {
            anyhow::bail!("embedding vector is empty");
        }
        if let Some(bad) = vector.iter().find(|v| !v.is_finite()) {
            anyhow::bail!("embedding contains a non-finite component: {bad}");
        }
        let norm = vector.iter().map(|v| v * v).sum::<f64>().sqrt();
        if !norm.is_finite() || norm <= 0.0 {
            anyhow::bail!("embedding norm must be finite and positive, got {norm}");
        }
        Ok(Self {
            vector: vector.into(),
            norm,
            model_id: model_id.into(),
        })
    }

    pub fn vector(&self) -> &[f64] {
        &self.vector
    }

    pub fn dims(&self) -> usize {
        self.vector.len()
    }

    pub fn norm(&self) -> f64 {
        self.norm
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }
}

/// Cosine similarity between two embeddings, in [-1, 1].
///
/// Guards rather than panics: a dimension mismatch returns 0 with a
/// warning (themes built from mixed backends should never abort a run),
/// and a non-finite result is replaced with 0 — that only happens when
/// upstream data is corrupted, and score-0 quarantines it.
pub fn cosine(a: &EmbeddingWithNorm, b: &EmbeddingWithNorm) -> f64 {
    if a.dims() != b.dims() {
        warn!(
            a_dims = a.dims(),
            b_dims = b.dims(),
            "cosine similarity on mismatched dimensions, returning 0"
        );
        return 0.0;
    }

    let denom = a.norm * b.norm;
    if denom <= 0.0 {
        return 0.0;
    }

    let dot: f64 = a
        .vector
        .iter()
        .zip(b.vector.iter())
        .map(|(x, y)| x * y)
        .sum();

    let sim = dot / denom;
    if !sim.is_finite() {
        error!(sim, "non-finite cosine similarity, returning 0");
        return 0.0;
    }
    sim
}

/// Component-wise mean of member embeddings — a freshly allocated vector,
/// never a mutation of any member.
///
/// Fails when members is empty, dimensions disagree, or the mean collapses
/// to the zero vector (degenerate cluster); callers treat that as a
/// data-integrity skip.
pub fn centroid(members: &[&EmbeddingWithNorm]) -> Result<EmbeddingWithNorm> {
    let first = members
        .first()
        .ok_or_else(|| anyhow::anyhow!("cannot take the centroid of zero embeddings"))?;
    let dims = first.dims();

    let mut mean = vec![0.0_f64; dims];
    for member in members {
        if member.dims() != dims {
            anyhow::bail!(
                "centroid over mixed dimensions: {} vs {}",
                member.dims(),
                dims
            );
        }
        for (acc, &v) in mean.iter_mut().zip(member.vector.iter()) {
            *acc += v;
        }
    }
    let n = members.len() as f64;
    for v in &mut mean {
        *v /= n;
    }

    EmbeddingWithNorm::new(mean, first.model_id())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emb(v: &[f64]) -> EmbeddingWithNorm {
        EmbeddingWithNorm::new(v.to_vec(), "test").unwrap()
    }

    #[test]
    fn test_construction_rejects_empty() {
        assert!(EmbeddingWithNorm::new(vec![], "test").is_err());
    }

    #[test]
    fn test_construction_rejects_non_finite() {
        assert!(EmbeddingWithNorm::new(vec![1.0, f64::NAN], "test").is_err());
        assert!(EmbeddingWithNorm::new(vec![1.0, f64::INFINITY], "test").is_err());
    }

    #[test]
    fn test_construction_rejects_zero_norm() {
        assert!(EmbeddingWithNorm::new(vec![0.0, 0.0, 0.0], "test").is_err());
    }

    #[test]
    fn test_norm_is_precomputed() {
        let e = emb(&[3.0, 4.0]);
        assert!((e.norm() - 5.0).abs() < 1e-12);
        assert_eq!(e.dims(), 2);
    }

    #[test]
    fn test_cosine_self_is_one() {
        let e = emb(&[1.0, 2.0, 3.0]);
        assert!((cosine(&e, &e) - 1.0).abs() < 1e-10);
    }

    #[test]
    fn test_cosine_orthogonal() {
        let a = emb(&[1.0, 0.0]);
        let b = emb(&[0.0, 1.0]);
        assert!(cosine(&a, &b).abs() < 1e-10);
    }

    #[test]
    fn test_cosine_opposite_is_negative_one() {
        let a = emb(&[1.0, 0.0]);
        let b = emb(&[-1.0, 0.0]);
        assert!((cosine(&a, &b) + 1.0).abs() < 1e-10);
    }

    #[test]
    fn test_cosine_mismatched_dims_is_zero() {
        let a = emb(&[1.0, 2.0]);
        let b = emb(&[1.0, 2.0, 3.0]);
        assert_eq!(cosine(&a, &b), 0.0);
    }

    #[test]
    fn test_cosine_range() {
        let a = emb(&[0.3, -1.2, 0.8, 2.0]);
        let b = emb(&[-0.5, 0.4, 1.1, -0.2]);
        let sim = cosine(&a, &b);
        assert!((-1.0..=1.0).contains(&sim));
    }

    #[test]
    fn test_cosine_is_symmetric() {
        let a = emb(&[1.0, 3.0, -2.0, 0.5]);
        let b = emb(&[2.0, -1.0, 4.0, 0.0]);
        assert!((cosine(&a, &b) - cosine(&b, &a)).abs() < 1e-12);
    }

    #[test]
    fn test_centroid_is_componentwise_mean() {
        let a = emb(&[1.0, 0.0]);
        let b = emb(&[0.0, 1.0]);
        let c = centroid(&[&a, &b]).unwrap();
        assert!((c.vector()[0] - 0.5).abs() < 1e-12);
        assert!((c.vector()[1] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_centroid_of_empty_fails() {
        assert!(centroid(&[]).is_err());
    }

    #[test]
    fn test_centroid_of_mixed_dims_fails() {
        let a = emb(&[1.0, 0.0]);
        let b = emb(&[0.0, 1.0, 2.0]);
        assert!(centroid(&[&a, &b]).is_err());
    }

    #[test]
    fn test_centroid_of_opposite_vectors_fails() {
        // The mean collapses to the zero vector — degenerate cluster.
        let a = emb(&[1.0, 0.0]);
        let b = emb(&[-1.0, 0.0]);
        assert!(centroid(&[&a, &b]).is_err());
    }

    #[test]
    fn test_centroid_does_not_mutate_members() {
        let a = emb(&[2.0, 4.0]);
        let b = emb(&[4.0, 2.0]);
        let _ = centroid(&[&a, &b]).unwrap();
        assert_eq!(a.vector(), &[2.0, 4.0]);
        assert_eq!(b.vector(), &[4.0, 2.0]);
    }
}
