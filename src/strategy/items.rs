// Survey scale-item construction — construct-validity optimization.
//
// For each theme, picks the codes most aligned with the theme's centroid
// (they measure the construct), while rejecting any candidate too similar
// to an item already picked (redundant items inflate reliability without
// adding information).

use anyhow::Result;
use tracing::debug;

use super::{
    centroid_similarity, item_for, usable_member_indices, PipelineStrategy, StrategyOutput,
    ThemeSelection,
};
use crate::config::ExtractionParams;
use crate::embedding::vector::cosine;
use crate::pipeline::PipelineState;

pub struct ScaleItemStrategy {
    /// How many items to aim for per theme
    pub items_per_theme: usize,
    /// Pairwise similarity at or above which a candidate is redundant
    pub redundancy_cap: f64,
}

impl ScaleItemStrategy {
    /// The canonical constructor: both knobs come from the run's params.
    pub fn from_params(params: &ExtractionParams) -> Self {
        Self {
            items_per_theme: params.items_per_theme,
            redundancy_cap: params.redundancy_cap,
        }
    }
}

impl Default for ScaleItemStrategy {
    fn default() -> Self {
        Self::from_params(&ExtractionParams::default())
    }
}

impl PipelineStrategy for ScaleItemStrategy {
    fn name(&self) -> &'static str {
        "scale-items"
    }

    fn derive(&self, state: &PipelineState) -> Result<StrategyOutput> {
        let mut selections = Vec::with_capacity(state.themes.len());

        for theme in &state.themes {
            let mut usable = usable_member_indices(theme, &state.codes);
            if usable.len() < theme.code_indices.len() {
                debug!(
                    theme_id = theme.id,
                    skipped = theme.code_indices.len() - usable.len(),
                    "skipping codes with unusable embeddings"
                );
            }

            // Most construct-aligned first; ties resolve to earlier index.
            usable.sort_by(|&a, &b| {
                let sa = centroid_similarity(theme, &state.codes, a);
                let sb = centroid_similarity(theme, &state.codes, b);
                sb.partial_cmp(&sa)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then(a.cmp(&b))
            });

            let mut picked: Vec<usize> = Vec::new();
            for &candidate in &usable {
                if picked.len() >= self.items_per_theme {
                    break;
                }
                let redundant = picked.iter().any(|&p| {
                    cosine(&state.codes[candidate].embedding, &state.codes[p].embedding)
                        >= self.redundancy_cap
                });
                if !redundant {
                    picked.push(candidate);
                }
            }

            // A theme with fewer usable codes than requested yields a
            // reduced-but-valid selection, never an error.
            selections.push(ThemeSelection {
                theme_id: theme.id,
                label: theme.label.clone(),
                items: picked.iter().map(|&i| item_for(&state.codes, i)).collect(),
            });
        }

        Ok(StrategyOutput {
            strategy: self.name().to_string(),
            selections,
        })
    }
}
