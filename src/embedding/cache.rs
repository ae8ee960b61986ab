// Exact-match embedding cache.
//
// Keyed by a sha256 of the whitespace-normalized text, so trivially
// reformatted duplicates (common across abstract/overflow pairs) hit the
// same entry. Bounded capacity with recency-aware eviction and a TTL —
// an entry older than the TTL is never served, it is recomputed.
//
// The cache is an explicitly owned, injectable object (not an ambient
// global): tests construct and reset their own instance.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use moka::sync::Cache;
use sha2::{Digest, Sha256};

use super::vector::EmbeddingWithNorm;

/// Hit/miss counters for the status line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: u64,
}

pub struct EmbeddingCache {
    inner: Cache<String, EmbeddingWithNorm>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl EmbeddingCache {
    pub fn new(capacity: u64, ttl: Duration) -> Arc<Self> {
        Arc::new(Self {
            inner: Cache::builder()
                .max_capacity(capacity)
                .time_to_live(ttl)
                .build(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        })
    }

    /// Cache key: sha256 of the text with runs of whitespace collapsed.
    pub fn key_for(text: &str) -> String {
        let normalized = text.split_whitespace().collect::<Vec<_>>().join(" ");
        let digest = Sha256::digest(normalized.as_bytes());
        hex::encode(digest)
    }

    /// Look up a previously validated embedding. A hit refreshes recency.
    pub fn get(&self, key: &str) -> Option<EmbeddingWithNorm> {
        match self.inner.get(key) {
            Some(hit) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(hit)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Store a validated embedding. Idempotent: overlapping runs writing
    /// the same key write the same value.
    pub fn insert(&self, key: String, embedding: EmbeddingWithNorm) {
        self.inner.insert(key, embedding);
    }

    pub fn stats(&self) -> CacheStats {
        // Flush pending maintenance so entry_count reflects reality.
        self.inner.run_pending_tasks();
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.inner.entry_count(),
        }
    }

    /// Drop every entry — test teardown and explicit lifecycle resets.
    pub fn clear(&self) {
        self.inner.invalidate_all();
        self.inner.run_pending_tasks();
    }
}
