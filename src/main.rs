// CodeCast - periodic multi-perspective code review reports
// Main entry point

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use codecast::changes::SqliteChangeSource;
use codecast::config::{load_config, Config, EmbeddingBackend};
use codecast::generation::HttpGenerationClient;
use codecast::habits::{FileHabitStore, HabitStore};
use codecast::logging::init_tracing;
use codecast::memory::{
    EmbeddingService, HashEmbedding, HttpEmbeddingService, HttpReranker, HybridMemory, Namespace,
};
use codecast::results::ResultsLog;
use codecast::workflow::WorkflowEngine;

#[derive(Parser)]
#[command(name = "codecast", about = "Daily multi-perspective code review reports", version)]
struct Cli {
    /// Path to config file (default: ~/.codecast/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one review cycle and print the report
    Run,

    /// Search stored topics by meaning and wording
    Recall {
        query: String,

        /// Number of matches to show
        #[arg(short = 'k', long, default_value_t = 5)]
        top_k: usize,
    },

    /// Print the current habit profile
    Habits,

    /// Print recent cycle results, newest first
    Results {
        #[arg(short, long, default_value_t = 5)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = load_config(cli.config.as_deref()).context("Failed to load configuration")?;

    match cli.command {
        Command::Run => run_cycle(config).await,
        Command::Recall { query, top_k } => {
            let memory = open_memory(&config)?;
            let matches = memory.find_similar(Namespace::Topics, &query, top_k).await;
            if matches.is_empty() {
                println!("No similar topics found.");
            }
            for item in matches {
                println!("{:.3}  [{:?}]  {}", item.score, item.source, item.text);
            }
            Ok(())
        }
        Command::Habits => {
            let profile = FileHabitStore::new(config.storage.habits_file()).read().await?;
            if profile.trim().is_empty() {
                println!("No habits recorded yet.");
            } else {
                println!("{}", profile.trim());
            }
            Ok(())
        }
        Command::Results { limit } => {
            let results = ResultsLog::open(&config.storage.results_db(), config.storage.results_limit)?;
            for entry in results.recent(limit).await? {
                println!(
                    "=== {} [{}] ===\n{}\n",
                    entry.created_at.format("%Y-%m-%d %H:%M"),
                    entry.status,
                    entry.text
                );
            }
            Ok(())
        }
    }
}

async fn run_cycle(config: Config) -> Result<()> {
    let generation = Arc::new(HttpGenerationClient::new(&config.generation)?);
    let memory = Arc::new(open_memory(&config)?);
    let changes = Arc::new(SqliteChangeSource::open(&config.storage.changes_db())?);
    let habits = Arc::new(FileHabitStore::new(config.storage.habits_file()));
    let results = ResultsLog::open(&config.storage.results_db(), config.storage.results_limit)?;
    let log_dir = config.storage.data_dir.clone();

    let engine = WorkflowEngine::new(changes, generation, memory, habits, results, config)
        .with_cycle_log(log_dir);
    let outcome = engine.run_cycle().await;

    println!("{}", outcome.report);
    eprintln!(
        "\n[{}] {} steps, {} review passes",
        outcome.status, outcome.steps, outcome.review_passes
    );
    Ok(())
}

fn open_memory(config: &Config) -> Result<HybridMemory> {
    let embedder: Arc<dyn EmbeddingService> = match config.embedding.backend {
        EmbeddingBackend::Hash => Arc::new(HashEmbedding::with_dimension(config.embedding.dimension)),
        EmbeddingBackend::Http => {
            let base_url = config
                .embedding
                .base_url
                .clone()
                .unwrap_or_else(|| config.generation.base_url.clone());
            Arc::new(HttpEmbeddingService::new(
                base_url,
                config.generation.api_key.clone(),
                config.embedding.model.clone(),
                config.embedding.dimension,
                config.generation.timeout(),
            )?)
        }
    };

    let mut memory = HybridMemory::open(&config.storage, embedder)?;
    if let Some(rerank) = &config.rerank {
        memory = memory.with_reranker(Arc::new(HttpReranker::new(rerank, config.generation.timeout())?));
    }
    Ok(memory)
}
