// The end-to-end extraction run: familiarize (validate), code, generate
// themes, review, define/name, report.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use tracing::{info, warn};

use super::result_cache::ResultCache;
use super::{CancelToken, ExtractionResult, PipelineState, RunSummary, Theme, ThemeCode};
use crate::cluster::{agglomerate, default_target_count};
use crate::coding;
use crate::coherence::{score_themes, theme_coherence, AdaptiveBars};
use crate::config::ExtractionParams;
use crate::corpus::{ContentType, SkipRecord, Source};
use crate::embedding::provider::EmbeddingProvider;
use crate::refine::labeler::Labeler;
use crate::refine::{RefineStats, RefinedTheme, ThemeRefiner};

/// Run the full pipeline, serving from the result cache when the corpus
/// fingerprint matches a previous run.
pub async fn run(
    sources: &[Source],
    provider: &EmbeddingProvider,
    labeler: &dyn Labeler,
    params: &ExtractionParams,
    result_cache: &ResultCache,
    cancel: &CancelToken,
) -> Result<Arc<ExtractionResult>> {
    let fingerprint = ResultCache::fingerprint(sources, params, provider.model_id());
    if let Some(hit) = result_cache.get(&fingerprint) {
        info!("serving extraction from result cache");
        return Ok(hit);
    }
    let (result, _) = run_uncached(sources, provider, labeler, params, cancel).await?;
    result_cache.insert(fingerprint, Arc::clone(&result));
    Ok(result)
}

/// Like `run`, but always computes and also returns the intermediate
/// state for pipeline strategies. The fresh result is still stored for
/// later cache hits.
pub async fn run_with_state(
    sources: &[Source],
    provider: &EmbeddingProvider,
    labeler: &dyn Labeler,
    params: &ExtractionParams,
    result_cache: &ResultCache,
    cancel: &CancelToken,
) -> Result<(Arc<ExtractionResult>, PipelineState)> {
    let fingerprint = ResultCache::fingerprint(sources, params, provider.model_id());
    let (result, state) = run_uncached(sources, provider, labeler, params, cancel).await?;
    result_cache.insert(fingerprint, Arc::clone(&result));
    Ok((result, state))
}

async fn run_uncached(
    sources: &[Source],
    provider: &EmbeddingProvider,
    labeler: &dyn Labeler,
    params: &ExtractionParams,
    cancel: &CancelToken,
) -> Result<(Arc<ExtractionResult>, PipelineState)> {
    let started_at = Utc::now();

    // Phase 1: familiarize — reject malformed input synchronously.
    params.validate()?;
    let mut seen_ids = HashSet::new();
    for source in sources {
        source.validate()?;
        if !seen_ids.insert(source.id.as_str()) {
            anyhow::bail!("duplicate source id: {}", source.id);
        }
    }
    let source_types: HashMap<String, ContentType> = sources
        .iter()
        .map(|s| (s.id.clone(), s.content_type))
        .collect();
    let source_order: HashMap<&str, usize> = sources
        .iter()
        .enumerate()
        .map(|(i, s)| (s.id.as_str(), i))
        .collect();
    let corpus_chars: usize = sources.iter().map(|s| s.effective_length()).sum();
    info!(
        sources = sources.len(),
        corpus_chars, "corpus validated"
    );

    // Phase 2: open coding.
    cancel.check()?;
    println!("Extracting codes from {} sources...", sources.len());
    let coding = coding::extract_codes(sources, provider, params, cancel).await?;
    let mut skipped = coding.skipped;
    let codes = coding.codes;

    if codes.is_empty() {
        if coding.attempted > 0 {
            // Every embedding call failed: total collaborator outage is
            // one of the few conditions that fails the whole run.
            anyhow::bail!(
                "embedding backend unavailable: all {} embedding calls failed",
                coding.attempted
            );
        }
        info!("corpus yielded no codes, returning empty result");
        let summary = RunSummary {
            sources_total: sources.len(),
            sources_contributing: 0,
            codes_extracted: 0,
            codes_skipped: skipped.len(),
            themes_returned: 0,
            saturation: 0.0,
            coverage: 0.0,
            refine_passes: 0,
            refine_merges: 0,
            refine_splits: 0,
            started_at,
            finished_at: Utc::now(),
        };
        let result = Arc::new(ExtractionResult {
            themes: Vec::new(),
            skipped,
            summary,
        });
        let state = PipelineState {
            codes: Vec::new(),
            themes: Vec::new(),
        };
        return Ok((result, state));
    }

    // Phase 3: generate candidate themes.
    cancel.check()?;
    let target = params
        .target_theme_count
        .unwrap_or_else(|| default_target_count(codes.len()));
    println!(
        "Clustering {} codes toward {} candidate themes...",
        codes.len(),
        target
    );
    let candidates = agglomerate(&codes, target, params.stop_similarity);

    // Phase 4: review against the adaptive bars.
    cancel.check()?;
    let bars = AdaptiveBars::from_params(params)?;
    let scored = score_themes(candidates, &codes, &source_types, &bars);
    let below = scored.iter().filter(|s| !s.passes()).count();
    if below > 0 {
        info!(below, "themes below their coherence bar, routing to refinement");
    }
    let themes: Vec<_> = scored.into_iter().map(|s| s.theme).collect();

    // Phase 5: define and name.
    cancel.check()?;
    println!("Refining {} candidate themes...", themes.len());
    let refiner = ThemeRefiner::new(params, bars, labeler);
    let (refined, stats) = refiner.refine(&codes, themes, &source_types, cancel).await?;

    // Final acceptance: a theme still below its bar after refinement is
    // dropped, with the reason recorded.
    let mut accepted: Vec<RefinedTheme> = Vec::new();
    for refined_theme in refined {
        let score = theme_coherence(&refined_theme.theme, &codes);
        let bar = bars.bar_for(
            refined_theme
                .theme
                .code_indices
                .iter()
                .filter_map(|&i| source_types.get(&codes[i].source_id).copied()),
        );
        if score >= bar {
            accepted.push(refined_theme);
        } else {
            warn!(
                label = refined_theme.theme.label,
                coherence = score,
                bar,
                "dropping theme below coherence bar after refinement"
            );
            let first_source = refined_theme
                .theme
                .code_indices
                .first()
                .map(|&i| codes[i].source_id.as_str())
                .unwrap_or("");
            skipped.push(SkipRecord::source(
                first_source,
                format!(
                    "theme '{}' dropped: coherence {score:.2} below bar {bar:.2}",
                    refined_theme.theme.label
                ),
            ));
        }
    }

    // Phase 6: report.
    cancel.check()?;
    let (themes_out, candidate_themes) = finalize_themes(&accepted, &codes);
    let summary = build_summary(
        sources,
        &codes,
        skipped.len(),
        &themes_out,
        &source_order,
        &stats,
        started_at,
    );

    info!(
        themes = themes_out.len(),
        saturation = summary.saturation,
        coverage = summary.coverage,
        "extraction complete"
    );

    let result = Arc::new(ExtractionResult {
        themes: themes_out,
        skipped,
        summary,
    });
    let state = PipelineState {
        codes,
        themes: candidate_themes,
    };
    Ok((result, state))
}

/// Convert accepted refined themes into the serializable output form,
/// keeping the candidate form for strategies.
fn finalize_themes(
    accepted: &[RefinedTheme],
    codes: &[crate::corpus::Code],
) -> (Vec<Theme>, Vec<crate::cluster::CandidateTheme>) {
    let mut themes_out = Vec::with_capacity(accepted.len());
    let mut candidates = Vec::with_capacity(accepted.len());

    for (n, refined) in accepted.iter().enumerate() {
        let theme = &refined.theme;
        let mut source_ids = Vec::new();
        let mut seen = HashSet::new();
        let mut theme_codes = Vec::with_capacity(theme.code_indices.len());
        for &i in &theme.code_indices {
            let code = &codes[i];
            theme_codes.push(ThemeCode {
                id: code.id.clone(),
                text: code.text.clone(),
                source_id: code.source_id.clone(),
            });
            if seen.insert(code.source_id.as_str()) {
                source_ids.push(code.source_id.clone());
            }
        }

        themes_out.push(Theme {
            id: format!("theme-{}", n + 1),
            label: theme.label.clone(),
            description: refined.description.clone(),
            codes: theme_codes,
            coherence: theme_coherence(theme, codes),
            source_ids,
        });
        candidates.push(theme.clone());
    }

    (themes_out, candidates)
}

fn build_summary(
    sources: &[Source],
    codes: &[crate::corpus::Code],
    codes_skipped: usize,
    themes: &[Theme],
    source_order: &HashMap<&str, usize>,
    stats: &RefineStats,
    started_at: chrono::DateTime<Utc>,
) -> RunSummary {
    let retained: usize = themes.iter().map(|t| t.codes.len()).sum();
    let coverage = if codes.is_empty() {
        0.0
    } else {
        retained as f64 / codes.len() as f64
    };

    // Saturation: a contributing source is "novel" when it is the
    // earliest contributor of some theme; the rest only reinforced
    // themes already introduced by earlier sources.
    let mut contributing: HashSet<&str> = HashSet::new();
    let mut novel: HashSet<&str> = HashSet::new();
    for theme in themes {
        let earliest = theme
            .source_ids
            .iter()
            .min_by_key(|id| source_order.get(id.as_str()).copied().unwrap_or(usize::MAX));
        if let Some(id) = earliest {
            novel.insert(id.as_str());
        }
        for id in &theme.source_ids {
            contributing.insert(id.as_str());
        }
    }
    let saturation = if contributing.is_empty() {
        0.0
    } else {
        1.0 - novel.len() as f64 / contributing.len() as f64
    };

    RunSummary {
        sources_total: sources.len(),
        sources_contributing: contributing.len(),
        codes_extracted: codes.len(),
        codes_skipped,
        themes_returned: themes.len(),
        saturation,
        coverage,
        refine_passes: stats.passes,
        refine_merges: stats.merges,
        refine_splits: stats.splits,
        started_at,
        finished_at: Utc::now(),
    }
}
