// Pipeline strategies — domain-specific consumers of the shared
// intermediate state.
//
// Strategies read {codes, themes} after refinement and derive per-theme
// selections. They never recompute embeddings, skip codes whose
// embeddings don't fit the theme's centroid, and return reduced-but-valid
// output instead of erroring when a theme has fewer usable codes than the
// requested item count.

pub mod items;
pub mod statements;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::cluster::CandidateTheme;
use crate::corpus::Code;
use crate::embedding::vector::cosine;
use crate::pipeline::PipelineState;

/// One code selected by a strategy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectedItem {
    pub code_id: String,
    pub text: String,
    pub source_id: String,
}

/// A strategy's selection for one theme.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThemeSelection {
    pub theme_id: usize,
    pub label: String,
    pub items: Vec<SelectedItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyOutput {
    pub strategy: String,
    pub selections: Vec<ThemeSelection>,
}

/// Trait for strategy adapters over the shared pipeline state.
pub trait PipelineStrategy {
    fn name(&self) -> &'static str;

    fn derive(&self, state: &PipelineState) -> Result<StrategyOutput>;
}

/// Indices of a theme's codes whose embeddings are usable against its
/// centroid. Mismatched dimensions (mixed-backend corpora) are skipped,
/// not fatal.
pub(crate) fn usable_member_indices(theme: &CandidateTheme, codes: &[Code]) -> Vec<usize> {
    theme
        .code_indices
        .iter()
        .copied()
        .filter(|&i| codes[i].embedding.dims() == theme.centroid.dims())
        .collect()
}

pub(crate) fn centroid_similarity(theme: &CandidateTheme, codes: &[Code], idx: usize) -> f64 {
    cosine(&codes[idx].embedding, &theme.centroid)
}

pub(crate) fn item_for(codes: &[Code], idx: usize) -> SelectedItem {
    SelectedItem {
        code_id: codes[idx].id.clone(),
        text: codes[idx].text.clone(),
        source_id: codes[idx].source_id.clone(),
    }
}
