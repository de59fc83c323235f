use anyhow::Result;
use clap::Args;

use super::connect_store;
use crate::cli::output::get_formatter;
use crate::models::{Config, OutputFormat};
use crate::store::Store;

#[derive(Debug, Args)]
pub struct HistoryArgs {
    /// Document ID
    pub id: String,
}

pub async fn handle_history(
    args: HistoryArgs,
    config: &Config,
    format: OutputFormat,
    _verbose: bool,
) -> Result<()> {
    let formatter = get_formatter(format);
    let store = connect_store(config).await?;
    let records = store.merge_history(&args.id).await?;
    print!("{}", formatter.format_history(&args.id, &records));
    Ok(())
}
