use anyhow::Result;
use clap::Args;

use super::connect_store;
use crate::cli::output::get_formatter;
use crate::models::{Config, OutputFormat};
use crate::store::Store;

#[derive(Debug, Args)]
pub struct ShowArgs {
    /// Document ID
    pub id: String,

    /// Also list the document's chunks
    #[arg(long, short = 'c')]
    pub chunks: bool,
}

pub async fn handle_show(
    args: ShowArgs,
    config: &Config,
    format: OutputFormat,
    _verbose: bool,
) -> Result<()> {
    let formatter = get_formatter(format);
    let store = connect_store(config).await?;

    let Some(document) = store.get_document(&args.id).await? else {
        anyhow::bail!("document not found: {}", args.id);
    };

    let chunks = if args.chunks {
        Some(store.get_chunks(&document.id).await?)
    } else {
        None
    };

    print!("{}", formatter.format_document(&document, chunks.as_deref()));
    Ok(())
}
