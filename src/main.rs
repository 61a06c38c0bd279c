#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc)]

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{Level, info};
use tracing_subscriber::FmtSubscriber;

use mailsift::config::Config;
use mailsift::index::{SemanticIndex, create_embedding_provider};
use mailsift::mail::Email;
use mailsift::providers::create_provider;
use mailsift::store::MailStore;
use mailsift::triage::{DecisionPolicy, Dispatcher};

#[derive(Parser)]
#[command(name = "mailsift", version, about = "Email triage, drafting, and retrieval engine")]
struct Cli {
    /// Path to config.toml (defaults to ~/.mailsift/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Process one incoming email (JSON file) through the triage pipeline
    Triage {
        /// Path to a JSON-encoded email
        input: PathBuf,
    },
    /// Search stored emails by meaning
    Search {
        query: String,
        #[arg(long, default_value_t = 5)]
        limit: usize,
    },
    /// Rebuild the semantic index from the store of record
    Reindex,
}

#[tokio::main]
async fn main() -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Triage { input } => triage(&config, &input).await,
        Commands::Search { query, limit } => search(&config, &query, limit).await,
        Commands::Reindex => reindex(&config).await,
    }
}

async fn triage(config: &Config, input: &PathBuf) -> Result<()> {
    let raw = std::fs::read_to_string(input)
        .with_context(|| format!("reading {}", input.display()))?;
    let email: Email = serde_json::from_str(&raw).context("parsing input email JSON")?;

    let store = MailStore::open(&config.storage.database_path()).await?;
    let index = open_or_rebuild_index(config, &store).await?;
    let store = Arc::new(store.with_index(Arc::clone(&index)));
    let provider = create_provider(&config.provider, &config.identity);
    let policy = DecisionPolicy::new(config.triage.decision_threshold)?;
    let dispatcher = Dispatcher::new(store, provider, policy);

    let outcome = dispatcher.process_new_email(&email).await?;
    index.save(&config.storage.index_dir())?;

    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}

async fn search(config: &Config, query: &str, limit: usize) -> Result<()> {
    let store = MailStore::open(&config.storage.database_path()).await?;
    let index = open_or_rebuild_index(config, &store).await?;

    let hits = index.search(query, limit).await?;
    println!("{}", serde_json::to_string_pretty(&hits)?);
    Ok(())
}

async fn reindex(config: &Config) -> Result<()> {
    let store = MailStore::open(&config.storage.database_path()).await?;
    let emails = store.fetch_all_emails().await?;

    let embedder: Arc<dyn mailsift::index::EmbeddingProvider> =
        Arc::from(create_embedding_provider(&config.embedding));
    let index = SemanticIndex::new(embedder);
    let indexed = index.rebuild(&emails).await?;
    index.save(&config.storage.index_dir())?;

    info!(indexed, "semantic index rebuilt");
    Ok(())
}

/// Load the saved index, or rebuild it from the store when no usable saved
/// copy exists yet.
async fn open_or_rebuild_index(config: &Config, store: &MailStore) -> Result<Arc<SemanticIndex>> {
    let embedder: Arc<dyn mailsift::index::EmbeddingProvider> =
        Arc::from(create_embedding_provider(&config.embedding));
    let index_dir = config.storage.index_dir();

    match SemanticIndex::load(&index_dir, Arc::clone(&embedder)) {
        Ok(index) => Ok(Arc::new(index)),
        Err(error) => {
            info!(%error, "no usable saved index, rebuilding");
            let index = SemanticIndex::new(embedder);
            let emails = store.fetch_all_emails().await?;
            index.rebuild(&emails).await?;
            index.save(&index_dir)?;
            Ok(Arc::new(index))
        }
    }
}
