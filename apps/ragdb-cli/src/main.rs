//! `ragdb`: ingest a directory and query it with semantic, keyword or hybrid search.
//!
//! ```bash
//! ragdb ingest ./docs --dataset handbook
//! ragdb query hybrid "how are chunks split" -n 5
//! ragdb query keyword "merge_insert" --filter language=rust --json
//! ragdb stats --dataset handbook
//! ragdb maintain
//! ```
//!
//! Settings come from `config.toml` / `APP_*` variables. Set
//! `APP_USE_FAKE_EMBEDDINGS=1` to run without an Ollama server.

mod output;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use ragdb_core::config::{expand_path, Config};
use ragdb_core::loader::DirectoryLoader;
use ragdb_core::traits::VectorStore;
use ragdb_core::types::Meta;
use ragdb_embed::{default_provider, ModelRegistry};
use ragdb_hybrid::{HybridSearchEngine, IndexEvent};
use ragdb_vector::LanceVectorStore;

const DEFAULT_LANCEDB_DIR: &str = "./data/lancedb";

#[derive(Parser)]
#[command(name = "ragdb", version, about = "Hybrid semantic and keyword retrieval over local files")]
struct Cli {
    /// LanceDB directory (default: `data.lancedb_dir` from config)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Log at debug level instead of info
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Chunk, embed and index every supported file under a directory
    Ingest {
        dir: PathBuf,
        /// Index at most this many files
        #[arg(long)]
        limit: Option<usize>,
        /// Tag every chunk with `dataset_id`
        #[arg(long)]
        dataset: Option<String>,
        /// Print index events as JSON lines instead of a progress bar
        #[arg(long)]
        json: bool,
    },
    /// Run a search: semantic, keyword or hybrid
    Query {
        search_type: String,
        query: String,
        #[arg(short = 'n', long, default_value = "10")]
        limit: usize,
        /// Metadata equality filter, repeatable
        #[arg(long = "filter", value_parser = parse_filter)]
        filters: Vec<(String, String)>,
        #[arg(long)]
        json: bool,
    },
    /// Remove every chunk of a document
    Delete { document_id: String },
    /// Engine, store and optionally per-dataset statistics as JSON
    Stats {
        #[arg(long)]
        dataset: Option<String>,
    },
    /// Check the embedding provider and the vector store
    Health,
    /// Build vector and scalar indices, then compact the table
    Maintain,
}

fn parse_filter(raw: &str) -> std::result::Result<(String, String), String> {
    match raw.split_once('=') {
        Some((k, v)) if !k.trim().is_empty() => Ok((k.trim().to_string(), v.trim().to_string())),
        _ => Err(format!("expected key=value, got '{raw}'")),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();

    let config = Config::load().context("loading configuration")?;
    let retrieval = config.retrieval()?;
    let data_dir = cli.data_dir.unwrap_or_else(|| {
        let dir: String = config.get("data.lancedb_dir").unwrap_or_else(|_| DEFAULT_LANCEDB_DIR.to_string());
        expand_path(dir)
    });

    let provider = default_provider(&retrieval)?;
    let dims = ModelRegistry::from_config(&retrieval)?.best(provider.provider_id()).dimensions;
    let store = LanceVectorStore::open_with_config(&data_dir, &retrieval, dims)
        .await
        .with_context(|| format!("opening vector store at {}", data_dir.display()))?;
    let engine = Arc::new(HybridSearchEngine::from_config(&retrieval, provider, store)?);
    let restored = engine.initialize().await?;
    info!(data_dir = %data_dir.display(), restored, dims, "engine ready");

    match cli.command {
        Command::Ingest { dir, limit, dataset, json } => {
            let mut loader = DirectoryLoader::new(retrieval.max_document_bytes);
            if let Some(limit) = limit {
                loader = loader.with_limit(limit);
            }
            let mut documents = loader.load(&dir)?;
            if documents.is_empty() {
                warn!(dir = %dir.display(), "no supported files found");
                return Ok(());
            }
            if let Some(dataset) = &dataset {
                for document in &mut documents {
                    document.metadata.insert("dataset_id".to_string(), dataset.clone());
                }
            }
            ingest(&engine, documents, json).await?;
        }
        Command::Query { search_type, query, limit, filters, json } => {
            let filters: Meta = filters.into_iter().collect();
            let results = engine.search_with_filters(&query, &search_type, limit, &filters).await?;
            let rendered =
                if json { output::format_json(&query, &results)? } else { output::format_human(&query, &results) };
            println!("{rendered}");
        }
        Command::Delete { document_id } => {
            let removed = engine.delete_document(&document_id).await?;
            println!("Removed {removed} chunks of {document_id}");
        }
        Command::Stats { dataset } => {
            let mut report = serde_json::json!({
                "engine": engine.get_stats().await,
                "store": engine.store().stats().await?,
            });
            if let Some(dataset) = dataset {
                report["dataset"] = serde_json::to_value(engine.store().stats_for_dataset(&dataset).await?)?;
            }
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Health => {
            let report = engine.health_check().await;
            println!("{}", serde_json::to_string_pretty(&report)?);
            if !(report.embedding_provider && report.vector_store) {
                bail!("engine is {:?}", report.status);
            }
        }
        Command::Maintain => {
            let report = engine.store().create_index().await?;
            engine.store().optimize().await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    engine.shutdown();
    Ok(())
}

async fn ingest(
    engine: &Arc<HybridSearchEngine<LanceVectorStore>>,
    documents: Vec<ragdb_core::types::Document>,
    json: bool,
) -> Result<()> {
    let pb = ProgressBar::new(documents.len() as u64);
    if json {
        pb.set_draw_target(indicatif::ProgressDrawTarget::hidden());
    } else {
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} documents {msg}")?
                .progress_chars("#>-"),
        );
    }

    let mut events = engine.index_documents(documents);
    let mut failed = 0usize;
    while let Some(event) = events.recv().await {
        if json {
            println!("{}", event.to_json());
        }
        match &event {
            IndexEvent::Progress { document_id, .. } => pb.set_message(document_id.clone()),
            IndexEvent::DocumentResult { .. } => pb.inc(1),
            IndexEvent::Error { document_id, message, .. } => {
                failed += 1;
                pb.inc(1);
                pb.suspend(|| warn!(document = %document_id, %message, "skipped"));
            }
            IndexEvent::Completion { total, succeeded, chunks, elapsed_ms, .. } => {
                pb.finish_and_clear();
                if !json {
                    println!("Indexed {succeeded}/{total} documents into {chunks} chunks in {elapsed_ms} ms");
                }
            }
        }
    }
    if failed > 0 {
        warn!(failed, "some documents were not indexed");
    }
    Ok(())
}
