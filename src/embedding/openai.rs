// OpenAI embeddings API backend.
//
// Remote alternative to the local ONNX model, for machines that can't run
// inference or corpora that want a larger model. Requests are paced by the
// interval rate limiter and the provider gives this backend a low
// concurrency bound, matching published tier limits.
//
// API docs: https://platform.openai.com/docs/api-reference/embeddings

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::rate_limit::RateLimiter;
use super::traits::EmbeddingBackend;

const EMBEDDINGS_URL: &str = "https://api.openai.com/v1/embeddings";

pub struct OpenAiEmbedder {
    client: Client,
    api_key: String,
    model: String,
    rate_limiter: RateLimiter,
}

impl OpenAiEmbedder {
    /// Create a new OpenAI embeddings backend for the given model.
    pub fn new(api_key: String, model: String) -> Self {
        Self {
            client: Client::new(),
            api_key,
            model,
            // Conservative default well under the lowest published tier
            rate_limiter: RateLimiter::new(5.0),
        }
    }

    pub fn with_rate(mut self, requests_per_second: f64) -> Self {
        self.rate_limiter = RateLimiter::new(requests_per_second);
        self
    }
}

#[async_trait]
impl EmbeddingBackend for OpenAiEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f64>> {
        // Respect rate limits before making the call
        self.rate_limiter.acquire().await;

        let request = EmbeddingRequest {
            model: &self.model,
            input: text,
        };

        let response = self
            .client
            .post(EMBEDDINGS_URL)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .context("Failed to call OpenAI embeddings API")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("OpenAI embeddings API returned {}: {}", status, body);
        }

        let result: EmbeddingResponse = response
            .json()
            .await
            .context("Failed to parse OpenAI embeddings response")?;

        let embedding = result
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| anyhow::anyhow!("OpenAI embeddings response contained no data"))?;

        let preview: String = text.chars().take(50).collect();
        debug!(
            dims = embedding.len(),
            text_preview = %preview,
            "Embedded text via OpenAI"
        );

        Ok(embedding)
    }

    fn model_id(&self) -> &str {
        &self.model
    }

    fn default_concurrency(&self) -> usize {
        2
    }
}

// --- OpenAI API request/response types ---

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f64>,
}
