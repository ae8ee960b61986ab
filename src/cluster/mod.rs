// Hierarchical agglomerative clustering over embedded codes — phase 3.
//
// Every code starts as its own cluster. Each round merges the pair of
// clusters whose centroids are most similar, until the target count is
// reached or the best available merge falls below the stop threshold.
// Ties prefer the pair with the larger combined code count, so big
// near-identical groups consolidate before scattered singletons.
//
// The comparison loop is the O(T·C²) hot path: it only ever touches
// precomputed norms via `cosine`, never recomputes a magnitude.

use anyhow::Result;
use tracing::{debug, warn};

use crate::corpus::Code;
use crate::embedding::vector::{centroid, cosine, EmbeddingWithNorm};

/// A candidate theme: a set of codes (by index into the run's code list)
/// and a derived centroid. Created here, mutated only by the refiner.
#[derive(Debug, Clone)]
pub struct CandidateTheme {
    pub id: usize,
    pub label: String,
    pub code_indices: Vec<usize>,
    pub centroid: EmbeddingWithNorm,
}

impl CandidateTheme {
    /// Build a theme over the given member codes, deriving a fresh
    /// centroid. Fails on an empty member set or degenerate centroid.
    pub fn over(id: usize, codes: &[Code], code_indices: Vec<usize>) -> Result<Self> {
        let members: Vec<&EmbeddingWithNorm> = code_indices
            .iter()
            .map(|&i| &codes[i].embedding)
            .collect();
        let centroid = centroid(&members)?;
        Ok(Self {
            id,
            label: String::new(),
            code_indices,
            centroid,
        })
    }
}

/// Pick a target cluster count when the caller didn't fix one: roughly
/// sqrt of the code count, kept within a range that stays reviewable.
pub fn default_target_count(code_count: usize) -> usize {
    ((code_count as f64).sqrt().round() as usize).clamp(2, 12)
}

/// Agglomerate codes into candidate themes.
///
/// Deterministic for a fixed input order: pair scanning is index-ordered
/// and ties break first on combined size, then on position.
pub fn agglomerate(codes: &[Code], target_count: usize, stop_similarity: f64) -> Vec<CandidateTheme> {
    let target_count = target_count.max(1);

    let mut clusters: Vec<CandidateTheme> = Vec::new();
    for (i, code) in codes.iter().enumerate() {
        clusters.push(CandidateTheme {
            id: i,
            label: String::new(),
            code_indices: vec![i],
            centroid: code.embedding.clone(),
        });
    }
    let mut next_id = clusters.len();

    while clusters.len() > target_count {
        let Some((best_i, best_j, best_sim)) = best_merge_pair(&clusters) else {
            break;
        };

        if best_sim < stop_similarity {
            debug!(
                clusters = clusters.len(),
                best_sim, "best merge below stop threshold, halting agglomeration"
            );
            break;
        }

        // Merge j into i: combined membership, freshly derived centroid.
        let absorbed = clusters.remove(best_j);
        let mut merged_indices = clusters[best_i].code_indices.clone();
        merged_indices.extend(absorbed.code_indices.iter().copied());
        merged_indices.sort_unstable();

        match CandidateTheme::over(next_id, codes, merged_indices) {
            Ok(merged) => {
                clusters[best_i] = merged;
                next_id += 1;
            }
            Err(e) => {
                // Degenerate centroid — quarantine by keeping the clusters
                // apart rather than corrupting downstream scores.
                warn!(error = %e, "merge produced an invalid centroid, stopping");
                clusters.insert(best_j, absorbed);
                break;
            }
        }
    }

    debug!(
        codes = codes.len(),
        themes = clusters.len(),
        "agglomeration complete"
    );
    clusters
}

/// Scan all cluster pairs for the most similar centroids.
///
/// Returns (i, j, similarity) with i < j, or None for fewer than two
/// clusters. Equal similarities (within epsilon) prefer the pair with the
/// larger combined code count.
fn best_merge_pair(clusters: &[CandidateTheme]) -> Option<(usize, usize, f64)> {
    const EPSILON: f64 = 1e-12;

    let mut best: Option<(usize, usize, f64, usize)> = None;

    for i in 0..clusters.len() {
        for j in (i + 1)..clusters.len() {
            let sim = cosine(&clusters[i].centroid, &clusters[j].centroid);
            let combined = clusters[i].code_indices.len() + clusters[j].code_indices.len();

            let better = match &best {
                None => true,
                Some((_, _, best_sim, best_combined)) => {
                    sim > best_sim + EPSILON
                        || ((sim - best_sim).abs() <= EPSILON && combined > *best_combined)
                }
            };
            if better {
                best = Some((i, j, sim, combined));
            }
        }
    }

    best.map(|(i, j, sim, _)| (i, j, sim))
}
