// Theme labeler trait — the text-generation seam.
//
// Labeling is the only place the pipeline touches a completion model, and
// it is non-fatal by design: any failure here falls back to a
// deterministic label from the theme's most representative code.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::embedding::rate_limit::RateLimiter;

/// Trait for generating label/description text from a prompt.
#[async_trait]
pub trait Labeler: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String>;
}

/// Labeler used when LLM labeling is disabled or unavailable. Always
/// errors, which routes every theme through the deterministic fallback.
pub struct NoopLabeler;

#[async_trait]
impl Labeler for NoopLabeler {
    async fn complete(&self, _prompt: &str) -> Result<String> {
        anyhow::bail!("labeling disabled — using deterministic fallback labels")
    }
}

/// OpenAI chat-completions labeler.
pub struct OpenAiLabeler {
    client: Client,
    api_key: String,
    model: String,
    rate_limiter: RateLimiter,
}

impl OpenAiLabeler {
    pub fn new(api_key: String, model: String) -> Self {
        Self {
            client: Client::new(),
            api_key,
            model,
            rate_limiter: RateLimiter::new(2.0),
        }
    }
}

#[async_trait]
impl Labeler for OpenAiLabeler {
    async fn complete(&self, prompt: &str) -> Result<String> {
        self.rate_limiter.acquire().await;

        let request = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            temperature: 0.0,
        };

        let response = self
            .client
            .post("https://api.openai.com/v1/chat/completions")
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .context("Failed to call chat completions API")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("chat completions API returned {}: {}", status, body);
        }

        let result: ChatResponse = response
            .json()
            .await
            .context("Failed to parse chat completions response")?;

        let text = result
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| anyhow::anyhow!("chat completions response contained no choices"))?;

        debug!(chars = text.len(), "received labeling completion");
        Ok(text)
    }
}

// --- chat completions request/response types ---

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f64,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: String,
}
