//! ShellForge prompt preview
//!
//! Builds the prompt the engine would hand to a language model for a query,
//! using a JSON shell history as the retrieval corpus.

use clap::Parser;
use shellforge_common::embeddings::create_embedder;
use shellforge_common::{config::AppConfig, metrics, DEFAULT_EMBEDDING_DIMENSION, VERSION};
use shellforge_context::{AssistEngine, PromptRequest, TaskType};
use shellforge_search::retrieval::HistoryStore;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Print the prompt ShellForge would build for a query.
#[derive(Parser, Debug)]
#[command(name = "shellforge-preview", version, about = "Preview an assembled ShellForge prompt")]
struct Cli {
    /// JSON array of history entries
    history: PathBuf,

    /// The user's query
    query: String,

    /// Current working directory
    #[arg(long)]
    cwd: Option<String>,

    /// Total prompt budget in tokens; enables compression
    #[arg(long)]
    max_tokens: Option<usize>,

    /// Task template (explain, generate, suggest, generic); detected when absent
    #[arg(long)]
    task: Option<TaskType>,

    /// Embedding provider
    #[arg(long, default_value = "hashing")]
    embedder: String,

    /// Embedding dimension
    #[arg(long, default_value_t = DEFAULT_EMBEDDING_DIMENSION)]
    dimension: usize,
}

impl Cli {
    fn request(&self) -> PromptRequest {
        PromptRequest {
            query: self.query.clone(),
            cwd: self.cwd.clone(),
            task: self.task,
            max_tokens: self.max_tokens,
            history: None,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let config = AppConfig::load_validated()?;

    // Logs go to stderr so stdout stays pure JSON
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.observability.log_level));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr);
    if config.observability.json_logging {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    info!(service = %config.observability.service_name, "Starting ShellForge preview v{}", VERSION);
    metrics::register_metrics();

    let history = Arc::new(HistoryStore::load_json(&cli.history)?);
    info!(path = %cli.history.display(), entries = history.len(), "Loaded history");

    let embedder = create_embedder(&cli.embedder, cli.dimension)?;
    let engine = AssistEngine::builder(config)
        .with_history(history)
        .with_embedder(embedder)
        .with_history_providers()
        .build()?;

    let bundle = engine.prompt(&cli.request()).await?;
    println!("{}", serde_json::to_string_pretty(&bundle)?);

    let stats = engine.cache_stats();
    info!(hits = stats.total.hits, misses = stats.total.misses, "Done");
    Ok(())
}
