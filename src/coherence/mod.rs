// Coherence validation — phase 4 (reviewing themes).
//
// A theme's coherence is the mean pairwise similarity among its codes, a
// proxy for topical consistency. The acceptance bar is adaptive: themes
// fed by full-text sources are held to a strict bar, while abstract-only
// themes get a relaxed one — a fixed global threshold would systematically
// penalize abstract-dominated corpora.

use std::collections::HashMap;

use anyhow::Result;
use tracing::debug;

use crate::cluster::CandidateTheme;
use crate::config::ExtractionParams;
use crate::corpus::{Code, ContentType};
use crate::embedding::vector::{cosine, EmbeddingWithNorm};

/// Coherence assigned when a theme has fewer than two codes and no
/// pairwise computation is possible.
pub const NEUTRAL_COHERENCE: f64 = 0.5;

/// The strict/relaxed acceptance bars, validated so strict >= relaxed.
#[derive(Debug, Clone, Copy)]
pub struct AdaptiveBars {
    strict: f64,
    relaxed: f64,
}

impl AdaptiveBars {
    pub fn new(strict: f64, relaxed: f64) -> Result<Self> {
        if strict < relaxed {
            anyhow::bail!("strict bar ({strict}) must be >= relaxed bar ({relaxed})");
        }
        Ok(Self { strict, relaxed })
    }

    pub fn from_params(params: &ExtractionParams) -> Result<Self> {
        Self::new(params.strict_coherence_bar, params.relaxed_coherence_bar)
    }

    /// The bar a theme must clear, given the content types of its
    /// contributing sources: any rich source raises it to the strict bar.
    pub fn bar_for<I>(&self, contributing: I) -> f64
    where
        I: IntoIterator<Item = ContentType>,
    {
        if contributing.into_iter().any(|ct| ct.is_rich()) {
            self.strict
        } else {
            self.relaxed
        }
    }

    pub fn strict(&self) -> f64 {
        self.strict
    }

    pub fn relaxed(&self) -> f64 {
        self.relaxed
    }
}

/// Mean pairwise similarity among embeddings, clamped into [0, 1].
///
/// Fewer than two members returns the fixed neutral default — never a
/// divide by zero.
pub fn coherence(members: &[&EmbeddingWithNorm]) -> f64 {
    if members.len() < 2 {
        return NEUTRAL_COHERENCE;
    }

    let mut sum = 0.0;
    let mut pairs = 0usize;
    for i in 0..members.len() {
        for j in (i + 1)..members.len() {
            sum += cosine(members[i], members[j]);
            pairs += 1;
        }
    }

    (sum / pairs as f64).clamp(0.0, 1.0)
}

/// Coherence of a candidate theme's member codes.
pub fn theme_coherence(theme: &CandidateTheme, codes: &[Code]) -> f64 {
    let members: Vec<&EmbeddingWithNorm> = theme
        .code_indices
        .iter()
        .map(|&i| &codes[i].embedding)
        .collect();
    coherence(&members)
}

/// A theme annotated with its score and the bar it was held to.
#[derive(Debug, Clone)]
pub struct ScoredTheme {
    pub theme: CandidateTheme,
    pub coherence: f64,
    pub bar: f64,
}

impl ScoredTheme {
    pub fn passes(&self) -> bool {
        self.coherence >= self.bar
    }
}

/// Score every theme against its adaptive bar.
///
/// `source_types` maps source id to content type for the whole run.
/// Below-bar themes are not dropped here — the refiner gets a chance to
/// split them first.
pub fn score_themes(
    themes: Vec<CandidateTheme>,
    codes: &[Code],
    source_types: &HashMap<String, ContentType>,
    bars: &AdaptiveBars,
) -> Vec<ScoredTheme> {
    themes
        .into_iter()
        .map(|theme| {
            let score = theme_coherence(&theme, codes);
            let bar = bars.bar_for(
                theme
                    .code_indices
                    .iter()
                    .filter_map(|&i| source_types.get(&codes[i].source_id).copied()),
            );
            debug!(
                theme_id = theme.id,
                codes = theme.code_indices.len(),
                coherence = score,
                bar,
                "scored theme"
            );
            ScoredTheme {
                theme,
                coherence: score,
                bar,
            }
        })
        .collect()
}
