// Embedding backend trait — the swap-ready abstraction.
//
// The default implementation runs a local sentence-transformer via ONNX.
// The OpenAI embeddings API is available as the remote alternative. The
// pipeline only ever talks to the EmbeddingProvider wrapper, which owns
// validation, caching, and the concurrency gate.

use anyhow::Result;
use async_trait::async_trait;

/// Trait for turning text into a raw embedding vector. Implementations
/// must be async because remote providers require HTTP calls.
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    /// Embed a single text into a raw vector. Output is unvalidated —
    /// the provider normalizes it into EmbeddingWithNorm.
    async fn embed(&self, text: &str) -> Result<Vec<f64>>;

    /// Embed multiple texts, returning vectors in the same order.
    /// Default implementation calls embed sequentially — backends can
    /// override for true batching if they support it.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f64>>> {
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            results.push(self.embed(text).await?);
        }
        Ok(results)
    }

    /// Identifier recorded on every embedding this backend produces.
    /// Part of the result-cache fingerprint: switching models must never
    /// serve results computed under a different one.
    fn model_id(&self) -> &str;

    /// How many embedding calls may run concurrently against this backend.
    /// Local compute tolerates a high bound; remote providers get a low
    /// one tuned to their published rate limits.
    fn default_concurrency(&self) -> usize;
}
