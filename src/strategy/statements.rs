// Opinion-statement selection — breadth-of-viewpoint optimization.
//
// For each theme, picks codes that span the theme's semantic spread:
// start from the most central code, then repeatedly add the code farthest
// (in cosine distance) from everything already selected. The result reads
// as "the range of things people say about this theme" rather than the
// same point restated.

use anyhow::Result;
use tracing::debug;

use super::{item_for, usable_member_indices, PipelineStrategy, StrategyOutput, ThemeSelection};
use crate::config::ExtractionParams;
use crate::embedding::vector::cosine;
use crate::pipeline::PipelineState;

pub struct StatementStrategy {
    /// How many statements to aim for per theme
    pub items_per_theme: usize,
}

impl StatementStrategy {
    /// The canonical constructor: item count comes from the run's params.
    pub fn from_params(params: &ExtractionParams) -> Self {
        Self {
            items_per_theme: params.items_per_theme,
        }
    }
}

impl Default for StatementStrategy {
    fn default() -> Self {
        Self::from_params(&ExtractionParams::default())
    }
}

impl PipelineStrategy for StatementStrategy {
    fn name(&self) -> &'static str {
        "opinion-statements"
    }

    fn derive(&self, state: &PipelineState) -> Result<StrategyOutput> {
        let mut selections = Vec::with_capacity(state.themes.len());

        for theme in &state.themes {
            let usable = usable_member_indices(theme, &state.codes);
            if usable.len() < theme.code_indices.len() {
                debug!(
                    theme_id = theme.id,
                    skipped = theme.code_indices.len() - usable.len(),
                    "skipping codes with unusable embeddings"
                );
            }

            let picked = farthest_point_selection(&usable, state, theme, self.items_per_theme);
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

/// Greedy farthest-point traversal: seed with the most central code, then
/// maximize the minimum distance to the selected set. Deterministic:
/// ties resolve to the earlier index.
fn farthest_point_selection(
    usable: &[usize],
    state: &PipelineState,
    theme: &crate::cluster::CandidateTheme,
    limit: usize,
) -> Vec<usize> {
    if usable.is_empty() || limit == 0 {
        return Vec::new();
    }

    let seed = usable
        .iter()
        .copied()
        .max_by(|&a, &b| {
            let sa = cosine(&state.codes[a].embedding, &theme.centroid);
            let sb = cosine(&state.codes[b].embedding, &theme.centroid);
            sa.partial_cmp(&sb)
                .unwrap_or(std::cmp::Ordering::Equal)
                // Prefer the earlier index on ties.
                .then(b.cmp(&a))
        })
        .unwrap_or(usable[0]);

    let mut selected = vec![seed];

    while selected.len() < limit && selected.len() < usable.len() {
        let mut best: Option<(usize, f64)> = None;
        for &candidate in usable {
            if selected.contains(&candidate) {
                continue;
            }
            // Distance to the selected set = 1 - max similarity to it.
            let max_sim = selected
                .iter()
                .map(|&s| cosine(&state.codes[candidate].embedding, &state.codes[s].embedding))
                .fold(f64::NEG_INFINITY, f64::max);
            let dist = 1.0 - max_sim;
            if best.map_or(true, |(_, b)| dist > b) {
                best = Some((candidate, dist));
            }
        }
        match best {
            Some((candidate, _)) => selected.push(candidate),
            None => break,
        }
    }

    selected
}
