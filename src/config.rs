use std::env;
use std::path::PathBuf;

use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Which embedding backend to use.
#[derive(Debug, Clone, PartialEq)]
pub enum EmbeddingBackendKind {
    /// Local ONNX sentence transformer (default) — no API key, no rate limits
    Onnx,
    /// OpenAI embeddings API — requires OPENAI_API_KEY, rate-limited
    OpenAi,
}

/// Central configuration loaded from environment variables.
///
/// All secrets come from env vars (never hardcoded). The .env file
/// is loaded automatically at startup via dotenvy.
pub struct Config {
    /// Which embedding backend to use (default: Onnx)
    pub embedding_backend: EmbeddingBackendKind,
    /// Directory containing the ONNX model files
    pub model_dir: PathBuf,
    pub openai_api_key: String,
    /// OpenAI embedding model name (SKEIN_EMBED_MODEL)
    pub openai_embed_model: String,
    /// OpenAI chat model used for theme labeling (SKEIN_LABEL_MODEL)
    pub openai_label_model: String,
    /// Override for the embedding concurrency gate. When unset, the
    /// backend's own default applies (high for local, low for remote).
    pub concurrency: Option<usize>,
    /// Disable LLM labeling even when an API key is present — themes fall
    /// back to deterministic labels from their representative codes.
    pub labeling_disabled: bool,
    pub embed_cache_capacity: u64,
    pub embed_cache_ttl_secs: u64,
    pub result_cache_capacity: u64,
    pub result_cache_ttl_secs: u64,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self> {
        let embedding_backend = match env::var("SKEIN_EMBEDDER").as_deref() {
            Ok("openai") => EmbeddingBackendKind::OpenAi,
            // "onnx" or unset both default to the local model
            _ => EmbeddingBackendKind::Onnx,
        };

        let model_dir = env::var("SKEIN_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| crate::embedding::download::default_model_dir());

        let concurrency = match env::var("SKEIN_CONCURRENCY") {
            Ok(v) => Some(v.parse().map_err(|_| {
                anyhow::anyhow!("SKEIN_CONCURRENCY must be a positive integer, got {v:?}")
            })?),
            Err(_) => None,
        };

        Ok(Self {
            embedding_backend,
            model_dir,
            openai_api_key: env::var("OPENAI_API_KEY").unwrap_or_default(),
            openai_embed_model: env::var("SKEIN_EMBED_MODEL")
                .unwrap_or_else(|_| "text-embedding-3-small".to_string()),
            openai_label_model: env::var("SKEIN_LABEL_MODEL")
                .unwrap_or_else(|_| "gpt-4o-mini".to_string()),
            concurrency,
            labeling_disabled: matches!(
                env::var("SKEIN_LABELING").as_deref(),
                Ok("off") | Ok("0") | Ok("false")
            ),
            embed_cache_capacity: env_u64("SKEIN_EMBED_CACHE_CAPACITY", 50_000)?,
            embed_cache_ttl_secs: env_u64("SKEIN_EMBED_CACHE_TTL_SECS", 6 * 3600)?,
            result_cache_capacity: env_u64("SKEIN_RESULT_CACHE_CAPACITY", 64)?,
            result_cache_ttl_secs: env_u64("SKEIN_RESULT_CACHE_TTL_SECS", 24 * 3600)?,
        })
    }

    /// Check that the OpenAI API key is configured.
    /// Call this before any operation that goes through the OpenAI API.
    pub fn require_openai(&self) -> Result<()> {
        if self.openai_api_key.is_empty() {
            anyhow::bail!(
                "OPENAI_API_KEY not set. Add it to your .env file,\n\
                 or set SKEIN_EMBEDDER=onnx to use the local model."
            );
        }
        Ok(())
    }

    /// Validate that the chosen embedding backend has what it needs.
    /// For ONNX: model files must exist (or user should run download-model).
    /// For OpenAI: API key must be set.
    pub fn require_backend(&self) -> Result<()> {
        match self.embedding_backend {
            EmbeddingBackendKind::Onnx => {
                if !crate::embedding::download::model_files_present(&self.model_dir) {
                    anyhow::bail!(
                        "Embedding model files not found in {}\n\
                         Run `skein download-model` to download them.\n\
                         Or set SKEIN_EMBEDDER=openai to use the OpenAI API instead.",
                        self.model_dir.display()
                    );
                }
                Ok(())
            }
            EmbeddingBackendKind::OpenAi => self.require_openai(),
        }
    }
}

fn env_u64(var: &str, default: u64) -> Result<u64> {
    match env::var(var) {
        Ok(v) => v
            .parse()
            .map_err(|_| anyhow::anyhow!("{var} must be a non-negative integer, got {v:?}")),
        Err(_) => Ok(default),
    }
}

fn env_f64(var: &str, default: f64) -> Result<f64> {
    match env::var(var) {
        Ok(v) => v
            .parse()
            .map_err(|_| anyhow::anyhow!("{var} must be a number, got {v:?}")),
        Err(_) => Ok(default),
    }
}

/// Tunable pipeline thresholds. None of these are derived from first
/// principles — they are operationally tuned, so every one is exposed as
/// configuration and serialized into the result-cache fingerprint (a tuning
/// change must never serve a stale cached result).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionParams {
    /// Coherence bar when any contributing source is full text
    pub strict_coherence_bar: f64,
    /// Coherence bar for abstract-only themes
    pub relaxed_coherence_bar: f64,
    /// Centroid similarity at or above which two themes are near-duplicates
    pub merge_bar: f64,
    /// Stop agglomeration once the best merge falls below this similarity
    pub stop_similarity: f64,
    /// Target theme count; None picks a heuristic from the code count
    pub target_theme_count: Option<usize>,
    /// Upper bound on refinement merge/split passes
    pub max_refine_passes: usize,
    /// Codes shorter than this (chars, after trimming) are discarded
    pub min_code_chars: usize,
    /// Items per theme requested from the pipeline strategies
    pub items_per_theme: usize,
    /// Pairwise similarity above which two scale items are redundant
    pub redundancy_cap: f64,
}

impl Default for ExtractionParams {
    fn default() -> Self {
        Self {
            strict_coherence_bar: 0.55,
            relaxed_coherence_bar: 0.40,
            merge_bar: 0.85,
            stop_similarity: 0.35,
            target_theme_count: None,
            max_refine_passes: 4,
            min_code_chars: 20,
            items_per_theme: 5,
            redundancy_cap: 0.92,
        }
    }
}

impl ExtractionParams {
    /// Defaults with SKEIN_* env overrides applied.
    pub fn from_env() -> Result<Self> {
        let d = Self::default();
        let params = Self {
            strict_coherence_bar: env_f64("SKEIN_STRICT_BAR", d.strict_coherence_bar)?,
            relaxed_coherence_bar: env_f64("SKEIN_RELAXED_BAR", d.relaxed_coherence_bar)?,
            merge_bar: env_f64("SKEIN_MERGE_BAR", d.merge_bar)?,
            stop_similarity: env_f64("SKEIN_STOP_SIMILARITY", d.stop_similarity)?,
            target_theme_count: match env::var("SKEIN_TARGET_THEMES") {
                Ok(v) => Some(v.parse().map_err(|_| {
                    anyhow::anyhow!("SKEIN_TARGET_THEMES must be a positive integer, got {v:?}")
                })?),
                Err(_) => d.target_theme_count,
            },
            max_refine_passes: env_u64("SKEIN_MAX_REFINE_PASSES", d.max_refine_passes as u64)?
                as usize,
            min_code_chars: env_u64("SKEIN_MIN_CODE_CHARS", d.min_code_chars as u64)? as usize,
            items_per_theme: env_u64("SKEIN_ITEMS_PER_THEME", d.items_per_theme as u64)? as usize,
            redundancy_cap: env_f64("SKEIN_REDUNDANCY_CAP", d.redundancy_cap)?,
        };
        params.validate()?;
        Ok(params)
    }

    /// Reject inconsistent threshold configurations up front.
    pub fn validate(&self) -> Result<()> {
        for (name, v) in [
            ("strict_coherence_bar", self.strict_coherence_bar),
            ("relaxed_coherence_bar", self.relaxed_coherence_bar),
            ("merge_bar", self.merge_bar),
            ("redundancy_cap", self.redundancy_cap),
        ] {
            if !(0.0..=1.0).contains(&v) {
                anyhow::bail!("{name} must be in [0, 1], got {v}");
            }
        }
        if self.strict_coherence_bar < self.relaxed_coherence_bar {
            anyhow::bail!(
                "strict_coherence_bar ({}) must be >= relaxed_coherence_bar ({})",
                self.strict_coherence_bar,
                self.relaxed_coherence_bar
            );
        }
        if self.max_refine_passes == 0 {
            anyhow::bail!("max_refine_passes must be at least 1");
        }
        Ok(())
    }
}
