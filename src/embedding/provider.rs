// EmbeddingProvider — the single ingestion boundary for embeddings.
//
// Wraps a backend with, in order: cache lookup, the concurrency gate,
// bounded retry for transient backend errors, and validation into the
// frozen EmbeddingWithNorm type. Nothing else in the crate calls a
// backend directly.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::time::Duration;
use tracing::{debug, warn};

use super::cache::EmbeddingCache;
use super::gate::ConcurrencyGate;
use super::traits::EmbeddingBackend;
use super::vector::EmbeddingWithNorm;

/// How transient backend failures are retried before the unit is dropped.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
        }
    }
}

pub struct EmbeddingProvider {
    backend: Arc<dyn EmbeddingBackend>,
    cache: Arc<EmbeddingCache>,
    gate: ConcurrencyGate,
    retry: RetryPolicy,
}

impl EmbeddingProvider {
    /// Wrap a backend with the given cache. The gate is sized from
    /// `concurrency` when given, otherwise from the backend's own default.
    pub fn new(
        backend: Arc<dyn EmbeddingBackend>,
        cache: Arc<EmbeddingCache>,
        concurrency: Option<usize>,
    ) -> Self {
        let limit = concurrency.unwrap_or_else(|| backend.default_concurrency());
        Self {
            backend,
            cache,
            gate: ConcurrencyGate::new(limit),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn model_id(&self) -> &str {
        self.backend.model_id()
    }

    /// The gate limit, used by callers to size buffer_unordered fan-out.
    pub fn concurrency(&self) -> usize {
        self.gate.limit()
    }

    /// Embed one text: cache hit, or a gated, retried backend call whose
    /// output is validated and frozen before anyone else sees it.
    pub async fn embed(&self, text: &str) -> Result<EmbeddingWithNorm> {
        let key = EmbeddingCache::key_for(text);
        if let Some(hit) = self.cache.get(&key) {
            return Ok(hit);
        }

        let _permit = self.gate.acquire().await?;

        // A sibling task may have filled the entry while we waited.
        if let Some(hit) = self.cache.get(&key) {
            return Ok(hit);
        }

        let raw = self.embed_with_retry(text).await?;

        // Validation boundary: heterogeneous backend output is normalized
        // here, once, instead of ad hoc at each use site.
        let embedding = EmbeddingWithNorm::new(raw, self.backend.model_id())
            .context("backend returned an invalid embedding")?;

        self.cache.insert(key, embedding.clone());
        Ok(embedding)
    }

    async fn embed_with_retry(&self, text: &str) -> Result<Vec<f64>> {
        let mut delay = self.retry.base_delay;
        let mut last_err = None;

        for attempt in 1..=self.retry.max_attempts {
            match self.backend.embed(text).await {
                Ok(raw) => {
                    if attempt > 1 {
                        debug!(attempt, "embedding call succeeded after retry");
                    }
                    return Ok(raw);
                }
                Err(e) => {
                    if attempt < self.retry.max_attempts {
                        warn!(
                            attempt,
                            error = %e,
                            "embedding call failed, retrying after backoff"
                        );
                        tokio::time::sleep(delay).await;
                        delay *= 2;
                    }
                    last_err = Some(e);
                }
            }
        }

        Err(last_err
            .unwrap_or_else(|| anyhow::anyhow!("embedding backend failed"))
            .context(format!(
                "embedding failed after {} attempts",
                self.retry.max_attempts
            )))
    }
}
