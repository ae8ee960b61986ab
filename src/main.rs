use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;

use skein::config::{Config, EmbeddingBackendKind, ExtractionParams};
use skein::corpus::Source;
use skein::embedding::cache::EmbeddingCache;
use skein::embedding::openai::OpenAiEmbedder;
use skein::embedding::provider::EmbeddingProvider;
use skein::embedding::traits::EmbeddingBackend;
use skein::output::terminal;
use skein::pipeline::extract;
use skein::pipeline::result_cache::ResultCache;
use skein::pipeline::CancelToken;
use skein::refine::labeler::{Labeler, NoopLabeler, OpenAiLabeler};
use skein::strategy::items::ScaleItemStrategy;
use skein::strategy::statements::StatementStrategy;
use skein::strategy::PipelineStrategy;

/// Skein: embedding-based thematic analysis for research corpora.
///
/// Extracts recurring conceptual themes from collections of abstracts,
/// full texts, and transcripts.
#[derive(Parser)]
#[command(name = "skein", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract themes from a JSON file of source records
    Extract {
        /// Path to a JSON array of sources: [{id, content, content_type, ...}]
        input: PathBuf,

        /// Write the full result as JSON to this path
        #[arg(long)]
        output: Option<PathBuf>,

        /// Number of concurrent embedding calls (default: backend-tuned)
        #[arg(long)]
        concurrency: Option<usize>,

        /// Also derive per-theme selections with a pipeline strategy
        #[arg(long, value_enum)]
        strategy: Option<StrategyKind>,
    },

    /// Download the ONNX sentence-embedding model (~90 MB)
    DownloadModel,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum StrategyKind {
    /// Representative opinion statements per theme
    Statements,
    /// Non-redundant survey scale items per theme
    Items,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if missing)
    let _ = dotenvy::dotenv();

    // Set up structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("skein=info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Extract {
            input,
            output,
            concurrency,
            strategy,
        } => {
            let config = Config::load()?;
            config.require_backend()?;

            let sources = read_sources(&input)?;
            println!("Loaded {} sources from {}", sources.len(), input.display());

            let params = ExtractionParams::from_env()?;
            let backend = build_backend(&config)?;
            let embed_cache = EmbeddingCache::new(
                config.embed_cache_capacity,
                std::time::Duration::from_secs(config.embed_cache_ttl_secs),
            );
            let provider = EmbeddingProvider::new(
                backend,
                Arc::clone(&embed_cache),
                concurrency.or(config.concurrency),
            );
            let labeler = build_labeler(&config);
            let result_cache = ResultCache::new(
                config.result_cache_capacity,
                std::time::Duration::from_secs(config.result_cache_ttl_secs),
            );

            // Ctrl-C cancels at the next stage boundary or external call.
            let cancel = CancelToken::new();
            let cancel_for_signal = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("cancellation requested");
                    cancel_for_signal.cancel();
                }
            });

            let result = match strategy {
                Some(kind) => {
                    let (result, state) = extract::run_with_state(
                        &sources,
                        &provider,
                        labeler.as_ref(),
                        &params,
                        &result_cache,
                        &cancel,
                    )
                    .await?;

                    terminal::display_result(&result);
                    let selections = match kind {
                        StrategyKind::Statements => {
                            StatementStrategy::from_params(&params).derive(&state)?
                        }
                        StrategyKind::Items => {
                            ScaleItemStrategy::from_params(&params).derive(&state)?
                        }
                    };
                    terminal::display_strategy(&selections);
                    result
                }
                None => {
                    let result = extract::run(
                        &sources,
                        &provider,
                        labeler.as_ref(),
                        &params,
                        &result_cache,
                        &cancel,
                    )
                    .await?;
                    terminal::display_result(&result);
                    result
                }
            };

            let stats = embed_cache.stats();
            println!(
                "  Embedding cache: {} hits, {} misses, {} entries",
                stats.hits, stats.misses, stats.entries
            );

            if let Some(path) = output {
                let json = serde_json::to_string_pretty(&*result)
                    .context("Failed to serialize extraction result")?;
                std::fs::write(&path, json)
                    .with_context(|| format!("Failed to write {}", path.display()))?;
                println!("\nWrote full result to {}", path.display());
            }
        }

        Commands::DownloadModel => {
            let config = Config::load()?;
            skein::embedding::download::download_model(&config.model_dir).await?;
            println!("\nModel ready in {}", config.model_dir.display());
        }
    }

    Ok(())
}

fn read_sources(path: &PathBuf) -> Result<Vec<Source>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let sources: Vec<Source> =
        serde_json::from_str(&raw).context("Input must be a JSON array of source records")?;
    Ok(sources)
}

fn build_backend(config: &Config) -> Result<Arc<dyn EmbeddingBackend>> {
    match config.embedding_backend {
        EmbeddingBackendKind::Onnx => {
            #[cfg(feature = "onnx")]
            {
                let embedder = skein::embedding::onnx::OnnxEmbedder::load(&config.model_dir)?;
                Ok(Arc::new(embedder))
            }
            #[cfg(not(feature = "onnx"))]
            {
                anyhow::bail!(
                    "this build has no ONNX support; set SKEIN_EMBEDDER=openai \
                     or rebuild with the `onnx` feature"
                )
            }
        }
        EmbeddingBackendKind::OpenAi => Ok(Arc::new(OpenAiEmbedder::new(
            config.openai_api_key.clone(),
            config.openai_embed_model.clone(),
        ))),
    }
}

fn build_labeler(config: &Config) -> Box<dyn Labeler> {
    if config.labeling_disabled || config.openai_api_key.is_empty() {
        info!("LLM labeling off — themes get deterministic fallback labels");
        Box::new(NoopLabeler)
    } else {
        Box::new(OpenAiLabeler::new(
            config.openai_api_key.clone(),
            config.openai_label_model.clone(),
        ))
    }
}
