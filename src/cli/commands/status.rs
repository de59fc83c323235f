use anyhow::Result;
use tracing::debug;

use super::{connect_store, embedding_client};
use crate::cli::output::{StatusInfo, get_formatter};
use crate::models::{Config, OutputFormat};
use crate::store::{PsqlClient, Store};

pub async fn handle_status(config: &Config, format: OutputFormat, _verbose: bool) -> Result<()> {
    let formatter = get_formatter(format);

    let embedding_ok = match embedding_client(config) {
        Ok(client) => match client.embed_texts(&["status check"]).await {
            Ok(vectors) => !vectors.is_empty(),
            Err(e) => {
                debug!(error = %e, "embedding probe failed");
                false
            }
        },
        Err(_) => false,
    };

    let psql_available = PsqlClient::new(&config.store.psql_bin, &config.store.url)
        .check_available()
        .await
        .unwrap_or(false);

    let document_count = match connect_store(config).await {
        Ok(store) => store.list_candidates().await.ok().map(|docs| docs.len()),
        Err(e) => {
            debug!(error = %e, "database probe failed");
            None
        }
    };

    let status = StatusInfo {
        embedding_url: config.embedding.url.clone(),
        embedding_model: config.embedding.model.clone(),
        embedding_ok,
        llm_url: config.llm.url.clone(),
        llm_model: config.llm.model.clone(),
        psql_available,
        database_connected: document_count.is_some(),
        document_count,
    };

    print!("{}", formatter.format_status(&status));

    if !psql_available {
        eprintln!();
        eprintln!(
            "Warning: {} not found. Reads go through the PostgreSQL client tools.",
            config.store.psql_bin
        );
    }
    if !embedding_ok {
        eprintln!(
            "Warning: embedding server not reachable at {}",
            config.embedding.url
        );
    }

    Ok(())
}
