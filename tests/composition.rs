// End-to-end pipeline runs over a mocked embedding backend and labeler.
//
// The mock backend maps topic keywords onto fixed axes, so sources built
// from the same topic template produce near-identical vectors and cluster
// together, while different topics stay near-orthogonal. Everything is
// deterministic, which is itself one of the properties under test.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use skein::config::ExtractionParams;
use skein::corpus::{ContentType, Source};
use skein::embedding::cache::EmbeddingCache;
use skein::embedding::provider::{EmbeddingProvider, RetryPolicy};
use skein::embedding::traits::EmbeddingBackend;
use skein::pipeline::extract;
use skein::pipeline::result_cache::ResultCache;
use skein::pipeline::CancelToken;
use skein::refine::labeler::{Labeler, NoopLabeler};

const TOPICS: [[&str; 3]; 3] = [
    [
        "Coastal climate adaptation shapes urban planning decisions.",
        "Municipal budgets constrain climate resilience projects.",
        "Community groups drive local climate action initiatives.",
    ],
    [
        "Rural patients depend on telehealth consultations for specialist care.",
        "Insurance reimbursement rules limit telehealth adoption rates.",
        "Clinicians report telehealth visits change rapport building.",
    ],
    [
        "Formative assessment practices reshape classroom feedback loops.",
        "Standardized assessment pressure narrows the taught curriculum.",
        "Teachers balance assessment workload against instruction time.",
    ],
];

/// Deterministic embedder: topic keywords land hard on dedicated axes,
/// every other word adds a small hash-bucketed perturbation. Texts
/// containing "unembeddable" fail, which scripts partial-outage scenarios.
struct MockBackend {
    calls: AtomicUsize,
}

impl MockBackend {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
        })
    }

    fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

fn mock_vector(text: &str) -> Vec<f64> {
    let mut v = vec![0.0; 8];
    for word in text.to_lowercase().split_whitespace() {
        if word.contains("climate") {
            v[0] += 4.0;
        } else if word.contains("telehealth") {
            v[1] += 4.0;
        } else if word.contains("assessment") {
            v[2] += 4.0;
        } else {
            let bucket = 3 + word.bytes().map(usize::from).sum::<usize>() % 5;
            v[bucket] += 0.1;
        }
    }
    if v.iter().all(|&x| x == 0.0) {
        v[3] = 1.0;
    }
    v
}

#[async_trait]
impl EmbeddingBackend for MockBackend {
    async fn embed(&self, text: &str) -> Result<Vec<f64>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if text.contains("unembeddable") {
            anyhow::bail!("simulated backend failure");
        }
        Ok(mock_vector(text))
    }

    fn model_id(&self) -> &str {
        "mock-model"
    }

    fn default_concurrency(&self) -> usize {
        4
    }
}

/// Labeler returning a fixed, well-formed two-line response.
struct MockLabeler;

#[async_trait]
impl Labeler for MockLabeler {
    async fn complete(&self, _prompt: &str) -> Result<String> {
        Ok("Label: Mock theme name\nDescription: A mocked theme description.".to_string())
    }
}

fn provider(backend: Arc<MockBackend>) -> EmbeddingProvider {
    let cache = EmbeddingCache::new(10_000, std::time::Duration::from_secs(300));
    EmbeddingProvider::new(backend, cache, None).with_retry(RetryPolicy {
        max_attempts: 3,
        base_delay: std::time::Duration::from_millis(1),
    })
}

fn source(id: &str, content: String) -> Source {
    Source {
        id: id.to_string(),
        content,
        content_type: ContentType::Abstract,
        content_length: 0,
        metadata: HashMap::new(),
    }
}

fn topical_sources(count: usize) -> Vec<Source> {
    (0..count)
        .map(|i| source(&format!("s{i:03}"), TOPICS[i % 3].join(" ")))
        .collect()
}

#[tokio::test]
async fn fifty_abstract_corpus_yields_coherent_themes() {
    let sources = topical_sources(50);
    let p = provider(MockBackend::new());
    let cache = ResultCache::new(8, std::time::Duration::from_secs(60));

    let result = extract::run(
        &sources,
        &p,
        &MockLabeler,
        &ExtractionParams::default(),
        &cache,
        &CancelToken::new(),
    )
    .await
    .unwrap();

    assert!(!result.themes.is_empty(), "expected at least one theme");
    for theme in &result.themes {
        assert!(
            theme.coherence >= 0.40,
            "theme '{}' below the relaxed bar: {}",
            theme.label,
            theme.coherence
        );
        assert_eq!(theme.label, "Mock theme name");
        assert_eq!(theme.description, "A mocked theme description.");
        assert!(!theme.codes.is_empty());
    }

    let s = &result.summary;
    assert_eq!(s.sources_total, 50);
    assert!(s.sources_contributing > 0);
    assert!(s.coverage > 0.0);
    assert!(s.refine_passes >= 1);
    // Dozens of sources repeating three templates: most contributors
    // reinforce existing themes, so saturation runs high.
    assert!(s.saturation > 0.5, "saturation was {}", s.saturation);
}

#[tokio::test]
async fn identical_corpus_produces_identical_themes() {
    let sources = topical_sources(9);
    let params = ExtractionParams::default();

    let mut outputs = Vec::new();
    for _ in 0..2 {
        // Fresh provider and caches each time: equality must come from
        // the pipeline, not from cache reuse.
        let p = provider(MockBackend::new());
        let cache = ResultCache::new(8, std::time::Duration::from_secs(60));
        let result = extract::run(
            &sources,
            &p,
            &NoopLabeler,
            &params,
            &cache,
            &CancelToken::new(),
        )
        .await
        .unwrap();
        outputs.push(result);
    }

    let (a, b) = (&outputs[0], &outputs[1]);
    assert_eq!(a.themes.len(), b.themes.len());
    for (ta, tb) in a.themes.iter().zip(b.themes.iter()) {
        assert_eq!(ta.label, tb.label);
        assert_eq!(ta.coherence, tb.coherence);
        let ids = |t: &skein::pipeline::Theme| {
            t.codes.iter().map(|c| c.id.clone()).collect::<Vec<_>>()
        };
        assert_eq!(ids(ta), ids(tb));
        assert_eq!(ta.source_ids, tb.source_ids);
    }
}

#[tokio::test]
async fn repeat_run_is_served_from_the_result_cache() {
    let sources = topical_sources(6);
    let backend = MockBackend::new();
    let p = provider(Arc::clone(&backend));
    let cache = ResultCache::new(8, std::time::Duration::from_secs(60));
    let params = ExtractionParams::default();
    let cancel = CancelToken::new();

    let first = extract::run(&sources, &p, &NoopLabeler, &params, &cache, &cancel)
        .await
        .unwrap();
    let calls_after_first = backend.call_count();

    let second = extract::run(&sources, &p, &NoopLabeler, &params, &cache, &cancel)
        .await
        .unwrap();

    assert!(Arc::ptr_eq(&first, &second), "expected the cached result");
    assert_eq!(
        backend.call_count(),
        calls_after_first,
        "a cache hit must not touch the backend"
    );
}

#[tokio::test]
async fn changed_params_miss_the_result_cache() {
    let sources = topical_sources(6);
    let backend = MockBackend::new();
    let p = provider(Arc::clone(&backend));
    let cache = ResultCache::new(8, std::time::Duration::from_secs(60));
    let cancel = CancelToken::new();

    let first = extract::run(
        &sources,
        &p,
        &NoopLabeler,
        &ExtractionParams::default(),
        &cache,
        &cancel,
    )
    .await
    .unwrap();

    let retuned = ExtractionParams {
        merge_bar: 0.80,
        ..Default::default()
    };
    let second = extract::run(&sources, &p, &NoopLabeler, &retuned, &cache, &cancel)
        .await
        .unwrap();

    assert!(
        !Arc::ptr_eq(&first, &second),
        "a threshold change must invalidate the cached result"
    );
}

#[tokio::test]
async fn partial_embedding_failures_skip_the_unit_not_the_run() {
    let mut sources = topical_sources(6);
    sources.push(source(
        "s-broken",
        "This unembeddable passage cannot be vectorized at all. \
         Another unembeddable stretch of text follows it."
            .to_string(),
    ));

    let p = provider(MockBackend::new());
    let cache = ResultCache::new(8, std::time::Duration::from_secs(60));
    let result = extract::run(
        &sources,
        &p,
        &NoopLabeler,
        &ExtractionParams::default(),
        &cache,
        &CancelToken::new(),
    )
    .await
    .unwrap();

    assert!(!result.themes.is_empty(), "healthy sources must still yield themes");
    let broken_skips: Vec<_> = result
        .skipped
        .iter()
        .filter(|s| s.source_id == "s-broken")
        .collect();
    assert!(!broken_skips.is_empty(), "failed codes need skip records");
    for skip in &broken_skips {
        assert!(skip.code_text.is_some());
    }
    assert!(result.summary.codes_skipped >= broken_skips.len());
    // The broken source contributed nothing.
    for theme in &result.themes {
        assert!(!theme.source_ids.iter().any(|id| id == "s-broken"));
    }
}

#[tokio::test]
async fn total_backend_outage_fails_the_run() {
    let sources = vec![
        source(
            "s0",
            "Every unembeddable sentence fails here without exception.".to_string(),
        ),
        source(
            "s1",
            "This equally unembeddable content cannot be processed.".to_string(),
        ),
    ];

    let p = provider(MockBackend::new());
    let cache = ResultCache::new(8, std::time::Duration::from_secs(60));
    let err = extract::run(
        &sources,
        &p,
        &NoopLabeler,
        &ExtractionParams::default(),
        &cache,
        &CancelToken::new(),
    )
    .await
    .unwrap_err();

    assert!(
        err.to_string().contains("embedding backend unavailable"),
        "unexpected error: {err}"
    );
}

#[tokio::test]
async fn whitespace_only_source_is_skipped_without_error() {
    let mut sources = topical_sources(3);
    sources.push(source("s-blank", "   \n\t  ".to_string()));

    let p = provider(MockBackend::new());
    let cache = ResultCache::new(8, std::time::Duration::from_secs(60));
    let result = extract::run(
        &sources,
        &p,
        &NoopLabeler,
        &ExtractionParams::default(),
        &cache,
        &CancelToken::new(),
    )
    .await
    .unwrap();

    assert!(result
        .skipped
        .iter()
        .any(|s| s.source_id == "s-blank" && s.code_text.is_none()));
    assert!(!result.themes.is_empty());
}

#[tokio::test]
async fn empty_corpus_returns_an_empty_result() {
    let p = provider(MockBackend::new());
    let cache = ResultCache::new(8, std::time::Duration::from_secs(60));
    let result = extract::run(
        &[],
        &p,
        &NoopLabeler,
        &ExtractionParams::default(),
        &cache,
        &CancelToken::new(),
    )
    .await
    .unwrap();

    assert!(result.themes.is_empty());
    assert!(result.skipped.is_empty());
    assert_eq!(result.summary.sources_total, 0);
    assert_eq!(result.summary.codes_extracted, 0);
}

#[tokio::test]
async fn duplicate_source_ids_are_rejected_up_front() {
    let sources = vec![
        source("dup", TOPICS[0].join(" ")),
        source("dup", TOPICS[1].join(" ")),
    ];
    let backend = MockBackend::new();
    let p = provider(Arc::clone(&backend));
    let cache = ResultCache::new(8, std::time::Duration::from_secs(60));

    let err = extract::run(
        &sources,
        &p,
        &NoopLabeler,
        &ExtractionParams::default(),
        &cache,
        &CancelToken::new(),
    )
    .await
    .unwrap_err();

    assert!(err.to_string().contains("duplicate source id"));
    assert_eq!(backend.call_count(), 0, "validation precedes embedding");
}

#[tokio::test]
async fn cancelled_token_aborts_before_embedding() {
    let sources = topical_sources(6);
    let backend = MockBackend::new();
    let p = provider(Arc::clone(&backend));
    let cache = ResultCache::new(8, std::time::Duration::from_secs(60));

    let cancel = CancelToken::new();
    cancel.cancel();

    let err = extract::run(
        &sources,
        &p,
        &NoopLabeler,
        &ExtractionParams::default(),
        &cache,
        &cancel,
    )
    .await
    .unwrap_err();

    assert!(err.to_string().contains("cancelled"));
    assert_eq!(backend.call_count(), 0);
}

#[tokio::test]
async fn strategies_honor_the_run_params() {
    use skein::strategy::statements::StatementStrategy;
    use skein::strategy::PipelineStrategy;

    let sources = topical_sources(12);
    let p = provider(MockBackend::new());
    let cache = ResultCache::new(8, std::time::Duration::from_secs(60));
    let params = ExtractionParams {
        items_per_theme: 2,
        ..Default::default()
    };

    let (result, state) = extract::run_with_state(
        &sources,
        &p,
        &NoopLabeler,
        &params,
        &cache,
        &CancelToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(state.themes.len(), result.themes.len());

    // The params' item bound flows through the strategy constructor.
    let out = StatementStrategy::from_params(&params).derive(&state).unwrap();
    assert_eq!(out.selections.len(), result.themes.len());
    for selection in &out.selections {
        assert!(!selection.items.is_empty());
        assert!(selection.items.len() <= params.items_per_theme);
        // Every selected code exists in the run's code list.
        for item in &selection.items {
            assert!(state.codes.iter().any(|c| c.id == item.code_id));
        }
    }
}

#[tokio::test]
async fn default_embed_batch_preserves_input_order() {
    let backend = MockBackend::new();
    let texts: Vec<String> = TOPICS[0].iter().map(|s| s.to_string()).collect();

    let batch = backend.embed_batch(&texts).await.unwrap();

    assert_eq!(batch.len(), texts.len());
    for (text, vector) in texts.iter().zip(&batch) {
        assert_eq!(vector, &backend.embed(text).await.unwrap());
    }
}
