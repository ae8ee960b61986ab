// Corpus input types — the records the pipeline consumes.
//
// Sources are assembled by an external ingestion layer (PDF extraction,
// transcript fetching, etc.) and handed to us as plain records. Everything
// here is immutable once validated: the pipeline never rewrites a source
// or a code after creation.

use std::collections::HashMap;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::embedding::vector::EmbeddingWithNorm;

/// What kind of text a source carries. Richer text supports higher expected
/// coherence, so the content type drives the adaptive acceptance bars.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    FullText,
    /// An abstract long enough that it overflowed into body text during
    /// ingestion — treated like full text for threshold purposes.
    AbstractOverflow,
    Abstract,
    VideoTranscript,
}

impl ContentType {
    /// Rich content types get the strict coherence bar; abstract-only
    /// corpora get the relaxed one.
    pub fn is_rich(&self) -> bool {
        matches!(self, ContentType::FullText | ContentType::AbstractOverflow)
    }
}

/// One input document: a paper abstract, a full text, or a transcript.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    pub id: String,
    pub content: String,
    pub content_type: ContentType,
    /// Declared character count from the ingestion layer. Zero means
    /// "not declared" and is filled from the content itself.
    #[serde(default)]
    pub content_length: usize,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl Source {
    /// Validate the record at pipeline entry. Malformed records are
    /// rejected here, synchronously, never silently coerced downstream.
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            anyhow::bail!("source record has an empty id");
        }
        let actual = self.content.chars().count();
        if self.content_length != 0 && self.content_length != actual {
            anyhow::bail!(
                "source {}: declared content_length {} does not match content ({} chars)",
                self.id,
                self.content_length,
                actual
            );
        }
        Ok(())
    }

    /// Character count, preferring the declared length when present.
    pub fn effective_length(&self) -> usize {
        if self.content_length != 0 {
            self.content_length
        } else {
            self.content.chars().count()
        }
    }
}

/// An atomic concept extracted from one source — the unit of clustering.
/// Created during open coding (phase 2) and never mutated afterwards.
#[derive(Debug, Clone)]
pub struct Code {
    pub id: String,
    pub text: String,
    pub source_id: String,
    pub embedding: EmbeddingWithNorm,
}

/// Why a unit (a source, a code, or a theme) was dropped from the run.
/// Partial results with explicit skip reasons beat opaque failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkipRecord {
    pub source_id: String,
    /// The code text involved, when the skip happened below source level.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code_text: Option<String>,
    pub reason: String,
}

impl SkipRecord {
    pub fn source(source_id: &str, reason: impl Into<String>) -> Self {
        Self {
            source_id: source_id.to_string(),
            code_text: None,
            reason: reason.into(),
        }
    }

    pub fn code(source_id: &str, code_text: &str, reason: impl Into<String>) -> Self {
        Self {
            source_id: source_id.to_string(),
            code_text: Some(code_text.to_string()),
            reason: reason.into(),
        }
    }
}
