use std::path::PathBuf;

use anyhow::Result;
use clap::Args;

use super::read_input;
use crate::cli::output::get_formatter;
use crate::models::{Config, OutputFormat};
use crate::services::TextChunker;

#[derive(Debug, Args)]
pub struct ChunkArgs {
    /// Text file to chunk (use - for stdin)
    pub file: Option<PathBuf>,

    /// Override chunking.max_tokens
    #[arg(long)]
    pub max_tokens: Option<u32>,

    /// Override chunking.min_tokens
    #[arg(long)]
    pub min_tokens: Option<u32>,

    /// Override chunking.overlap_tokens
    #[arg(long)]
    pub overlap_tokens: Option<u32>,
}

pub async fn handle_chunk(
    args: ChunkArgs,
    config: &Config,
    format: OutputFormat,
    verbose: bool,
) -> Result<()> {
    let formatter = get_formatter(format);
    let text = read_input(args.file.as_deref())?;

    let mut chunking = config.chunking;
    if let Some(max) = args.max_tokens {
        chunking.max_tokens = max;
    }
    if let Some(min) = args.min_tokens {
        chunking.min_tokens = min;
    }
    if let Some(overlap) = args.overlap_tokens {
        chunking.overlap_tokens = overlap;
    }

    let chunks = TextChunker::from_config(&chunking).chunk(&text);
    if verbose {
        eprintln!(
            "{} chars -> {} chunks (min {}, max {}, overlap {} tokens)",
            text.chars().count(),
            chunks.len(),
            chunking.min_tokens,
            chunking.max_tokens,
            chunking.overlap_tokens
        );
    }

    print!("{}", formatter.format_chunks(&chunks));
    Ok(())
}
