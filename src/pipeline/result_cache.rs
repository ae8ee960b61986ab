// Result cache — full extraction output memoized per corpus fingerprint.
//
// Converts repeated multi-minute runs over an unchanged corpus into cache
// hits. Independent of the embedding cache: its own capacity, its own
// TTL. The fingerprint covers content, parameters, and the embedding
// model id, so any change to any of them misses.

use std::sync::Arc;
use std::time::Duration;

use moka::sync::Cache;
use sha2::{Digest, Sha256};
use tracing::debug;

use super::ExtractionResult;
use crate::config::ExtractionParams;
use crate::corpus::Source;

pub struct ResultCache {
    inner: Cache<String, Arc<ExtractionResult>>,
}

impl ResultCache {
    pub fn new(capacity: u64, ttl: Duration) -> Arc<Self> {
        Arc::new(Self {
            inner: Cache::builder()
                .max_capacity(capacity)
                .time_to_live(ttl)
                .build(),
        })
    }

    /// Fingerprint of (content + parameters + model).
    pub fn fingerprint(sources: &[Source], params: &ExtractionParams, model_id: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(model_id.as_bytes());
        hasher.update([0u8]);
        // Params are serde-serializable precisely so tuning changes
        // change the fingerprint.
        let params_json = serde_json::to_string(params).unwrap_or_default();
        hasher.update(params_json.as_bytes());
        for source in sources {
            hasher.update([0u8]);
            hasher.update(source.id.as_bytes());
            hasher.update([0u8]);
            let ct = serde_json::to_string(&source.content_type).unwrap_or_default();
            hasher.update(ct.as_bytes());
            hasher.update([0u8]);
            hasher.update(source.content.as_bytes());
        }
        hex::encode(hasher.finalize())
    }

    pub fn get(&self, fingerprint: &str) -> Option<Arc<ExtractionResult>> {
        let hit = self.inner.get(fingerprint);
        if hit.is_some() {
            debug!(fingerprint, "result cache hit");
        }
        hit
    }

    /// Idempotent: overlapping runs on the same fingerprint write the
    /// same value, so no locking beyond the cache's own is needed.
    pub fn insert(&self, fingerprint: String, result: Arc<ExtractionResult>) {
        self.inner.insert(fingerprint, result);
    }

    pub fn clear(&self) {
        self.inner.invalidate_all();
        self.inner.run_pending_tasks();
    }
}
