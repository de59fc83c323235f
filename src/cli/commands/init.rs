use anyhow::{Context, Result};

use super::connect_store;
use crate::cli::output::get_formatter;
use crate::models::{Config, OutputFormat};

pub async fn handle_init(config: &Config, format: OutputFormat, _verbose: bool) -> Result<()> {
    let formatter = get_formatter(format);
    let store = connect_store(config).await?;
    store
        .create_schema()
        .await
        .context("failed to create schema")?;

    print!(
        "{}",
        formatter.format_message(&format!(
            "Schema ready (embedding dimension {})",
            config.embedding.dimension
        ))
    );
    Ok(())
}
