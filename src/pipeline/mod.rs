// Pipeline orchestration — the six-phase extraction run.
//
// Stages run sequentially; within a stage, independent units fan out
// concurrently behind the provider's gate. A stage never starts until the
// previous one has fully settled, and a cancellation signal is honored at
// every stage boundary.

pub mod extract;
pub mod result_cache;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cluster::CandidateTheme;
use crate::corpus::{Code, SkipRecord};

/// External cancellation signal, checked at each stage boundary and
/// before each externally-bound call. Clone-cheap and injectable; the CLI
/// wires it to Ctrl-C, tests flip it directly.
#[derive(Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Error out promptly instead of continuing silently.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            anyhow::bail!("run cancelled");
        }
        Ok(())
    }
}

/// Intermediate state shared with pipeline strategies: the embedded codes
/// and the refined candidate themes. Strategies never recompute
/// embeddings from this.
pub struct PipelineState {
    pub codes: Vec<Code>,
    pub themes: Vec<CandidateTheme>,
}

/// A code as it appears in the final output (no embedding).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThemeCode {
    pub id: String,
    pub text: String,
    pub source_id: String,
}

/// A final, validated, labeled theme.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Theme {
    pub id: String,
    pub label: String,
    pub description: String,
    pub codes: Vec<ThemeCode>,
    pub coherence: f64,
    pub source_ids: Vec<String>,
}

/// Saturation/coverage summary for the run — phase 6's report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub sources_total: usize,
    /// Sources with at least one code retained in a final theme
    pub sources_contributing: usize,
    pub codes_extracted: usize,
    pub codes_skipped: usize,
    pub themes_returned: usize,
    /// Fraction of contributing sources that introduced no new theme —
    /// approaches 1.0 as additional sources stop yielding new themes.
    pub saturation: f64,
    /// Fraction of extracted codes retained in the final themes
    pub coverage: f64,
    pub refine_passes: usize,
    pub refine_merges: usize,
    pub refine_splits: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Full extraction output: themes plus explicit skip reasons. A
/// smaller-than-hoped theme set with skip metadata beats opaque failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub themes: Vec<Theme>,
    pub skipped: Vec<SkipRecord>,
    pub summary: RunSummary,
}
