mod chunk;
mod config;
mod history;
mod ingest;
mod init;
mod list;
mod show;
mod status;

use std::io::{self, Read};
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};

use crate::models::Config;
use crate::services::{
    Arbiter, ConsistencyCoordinator, DecisionEngine, Embedder, EmbeddingClient, Ingestor,
    LlmArbiter, LlmClient, LlmReconciler, NoArbiter, NoReconciler, RateLimiter, Reconciler,
    TextChunker,
};
use crate::store::{PgStore, Store};
use crate::utils::RetryConfig;

pub use chunk::ChunkArgs;
pub use config::ConfigCommand;
pub use history::HistoryArgs;
pub use ingest::IngestArgs;
pub use show::ShowArgs;

pub use chunk::handle_chunk;
pub use config::handle_config;
pub use history::handle_history;
pub use ingest::handle_ingest;
pub use init::handle_init;
pub use list::handle_list;
pub use show::handle_show;
pub use status::handle_status;

/// Connect to the configured PostgreSQL store.
async fn connect_store(config: &Config) -> Result<PgStore> {
    PgStore::connect(&config.store, config.embedding.dimension)
        .await
        .with_context(|| "failed to connect to the knowledge base database")
}

fn embedding_client(config: &Config) -> Result<EmbeddingClient> {
    let client = EmbeddingClient::new(&config.embedding, RateLimiter::from_config(&config.limits))
        .context("failed to create embedding client")?;
    Ok(client.with_retry(RetryConfig::new(config.limits.max_retries)))
}

/// Wire the decision engine and the coordinator over `store`.
///
/// Without `use_llm` every merge is append-only and uncertain topics fall
/// back to the similarity cutoff.
fn build_ingestor(config: &Config, store: Arc<dyn Store>, use_llm: bool) -> Result<Ingestor> {
    let embedder: Arc<dyn Embedder> = Arc::new(embedding_client(config)?);

    let (reconciler, arbiter): (Arc<dyn Reconciler>, Arc<dyn Arbiter>) = if use_llm {
        let llm = LlmClient::new(&config.llm, RateLimiter::from_config(&config.limits))
            .context("failed to create LLM client")?
            .with_retry(RetryConfig::new(config.limits.max_retries));
        (
            Arc::new(LlmReconciler::new(llm.clone())),
            Arc::new(LlmArbiter::new(llm)),
        )
    } else {
        (Arc::new(NoReconciler), Arc::new(NoArbiter))
    };

    let provider_timeout = config.limits.provider_timeout();
    let engine = DecisionEngine::new(embedder.clone(), arbiter).with_timeout(provider_timeout);
    let coordinator = ConsistencyCoordinator::new(
        store.clone(),
        embedder,
        reconciler,
        TextChunker::from_config(&config.chunking),
    )
    .with_batch_size(config.embedding.batch_size as usize)
    .with_dimension(config.embedding.dimension as usize)
    .with_timeout(provider_timeout);

    Ok(Ingestor::new(store, engine, coordinator))
}

/// Read a file, or stdin when the path is absent or `-`.
fn read_input(file: Option<&Path>) -> Result<String> {
    match file {
        Some(path) if path.to_string_lossy() != "-" => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display())),
        _ => {
            let mut input = String::new();
            io::stdin()
                .read_to_string(&mut input)
                .context("failed to read stdin")?;
            Ok(input)
        }
    }
}
