// Initial code extraction — open coding, phase 2.
//
// Each source's content is segmented into atomic codes (sentence-level
// fragments) and each code is embedded exactly once. Failure semantics
// favor partial results: one code's embedding failure drops that code
// with a logged warning and a skip record, and the batch continues.

use std::collections::HashSet;
use std::sync::OnceLock;

use anyhow::Result;
use futures::stream::{self, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use regex_lite::Regex;
use tracing::{info, warn};

use crate::config::ExtractionParams;
use crate::corpus::{Code, SkipRecord, Source};
use crate::embedding::provider::EmbeddingProvider;
use crate::pipeline::CancelToken;

/// Everything the coding stage produced: embedded codes, skip records for
/// dropped units, and how many embedding calls were attempted (used by the
/// pipeline to distinguish partial failure from total collaborator outage).
pub struct CodingOutcome {
    pub codes: Vec<Code>,
    pub skipped: Vec<SkipRecord>,
    pub attempted: usize,
}

fn sentence_splitter() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[.!?;\n\r]+").expect("valid segmentation regex"))
}

/// Split one source's content into candidate code texts.
///
/// Sentence-ish boundaries, trimmed, with fragments below the minimum
/// length discarded and exact duplicates within the source collapsed.
pub fn segment_content(content: &str, min_chars: usize) -> Vec<String> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut codes = Vec::new();

    for fragment in sentence_splitter().split(content) {
        let trimmed = fragment.trim();
        if trimmed.chars().count() < min_chars {
            continue;
        }
        let normalized = trimmed.split_whitespace().collect::<Vec<_>>().join(" ");
        if seen.insert(normalized.clone()) {
            codes.push(normalized);
        }
    }

    codes
}

/// Extract and embed codes for a whole batch of sources.
///
/// Embedding calls fan out through buffer_unordered, bounded by the
/// provider's gate. Results are re-sorted into segmentation order so the
/// outcome is deterministic regardless of completion order.
pub async fn extract_codes(
    sources: &[Source],
    provider: &EmbeddingProvider,
    params: &ExtractionParams,
    cancel: &CancelToken,
) -> Result<CodingOutcome> {
    let mut skipped = Vec::new();
    let mut units: Vec<(usize, String, String, String)> = Vec::new(); // (order, code_id, source_id, text)

    for source in sources {
        let texts = segment_content(&source.content, params.min_code_chars);
        if texts.is_empty() {
            info!(source_id = source.id, "source yielded no codes, skipping");
            skipped.push(SkipRecord::source(
                &source.id,
                "no codes: content empty or below minimum fragment length",
            ));
            continue;
        }
        for (k, text) in texts.into_iter().enumerate() {
            let order = units.len();
            units.push((order, format!("{}#{}", source.id, k), source.id.clone(), text));
        }
    }

    let attempted = units.len();
    if attempted == 0 {
        return Ok(CodingOutcome {
            codes: Vec::new(),
            skipped,
            attempted,
        });
    }

    let pb = ProgressBar::new(attempted as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("  Coding [{bar:30}] {pos}/{len} ({eta})")
            .expect("valid template"),
    );

    let results: Vec<_> = stream::iter(units.into_iter().map(
        |(order, code_id, source_id, text)| async move {
            // Checked before every externally-bound call so cancellation
            // stops new work promptly instead of draining the whole batch.
            if cancel.is_cancelled() {
                return (order, code_id, source_id, text, Err(anyhow::anyhow!("cancelled")));
            }
            let embedded = provider.embed(&text).await;
            (order, code_id, source_id, text, embedded)
        },
    ))
    .buffer_unordered(provider.concurrency())
    .map(|r| {
        pb.inc(1);
        r
    })
    .collect()
    .await;
    pb.finish_and_clear();

    cancel.check()?;

    let mut ordered = results;
    ordered.sort_by_key(|(order, ..)| *order);

    let mut codes = Vec::new();
    for (_, code_id, source_id, text, embedded) in ordered {
        match embedded {
            Ok(embedding) => codes.push(Code {
                id: code_id,
                text,
                source_id,
                embedding,
            }),
            Err(e) => {
                warn!(
                    source_id,
                    error = %e,
                    "embedding failed for code, skipping"
                );
                skipped.push(SkipRecord::code(
                    &source_id,
                    &text,
                    format!("embedding failed: {e:#}"),
                ));
            }
        }
    }

    info!(
        codes = codes.len(),
        skipped = skipped.len(),
        "initial coding complete"
    );

    Ok(CodingOutcome {
        codes,
        skipped,
        attempted,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segment_splits_on_sentence_boundaries() {
        let codes = segment_content(
            "Climate adaptation requires local planning. Coastal cities face rising seas! \
             Inland regions face drought risk?",
            10,
        );
        assert_eq!(codes.len(), 3);
        assert_eq!(codes[0], "Climate adaptation requires local planning");
    }

    #[test]
    fn test_segment_drops_short_fragments() {
        let codes = segment_content("Yes. This fragment is long enough to keep around.", 10);
        assert_eq!(codes.len(), 1);
    }

    #[test]
    fn test_segment_whitespace_only_is_empty() {
        assert!(segment_content("   \n\t  ", 10).is_empty());
        assert!(segment_content("", 10).is_empty());
    }

    #[test]
    fn test_segment_collapses_duplicates() {
        let codes = segment_content(
            "Remote work changes team communication. Remote   work changes team communication.",
            10,
        );
        assert_eq!(codes.len(), 1);
    }

    #[test]
    fn test_segment_normalizes_internal_whitespace() {
        let codes = segment_content("Spacing   should not\tmatter for a code", 10);
        assert_eq!(codes, vec!["Spacing should not matter for a code"]);
    }
}
