use anyhow::Result;

use super::connect_store;
use crate::cli::output::get_formatter;
use crate::models::{Config, OutputFormat};
use crate::store::Store;

pub async fn handle_list(config: &Config, format: OutputFormat, _verbose: bool) -> Result<()> {
    let formatter = get_formatter(format);
    let store = connect_store(config).await?;
    let summaries = store.list_candidates().await?;
    print!("{}", formatter.format_summaries(&summaries));
    Ok(())
}
