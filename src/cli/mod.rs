//! CLI module for the knowledge base engine.

pub mod commands;
pub mod output;

use clap::{Parser, Subcommand};

use crate::models::OutputFormat;

/// Keeps a knowledge base consistent while topics are merged into it.
#[derive(Debug, Parser)]
#[command(name = "kbase")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[arg(long, short = 'f', global = true, help = "Output format: text or json")]
    pub format: Option<OutputFormat>,

    #[arg(long, short = 'v', global = true, help = "Enable verbose output")]
    pub verbose: bool,

    #[arg(
        long,
        global = true,
        env = "DATABASE_URL",
        hide_env_values = true,
        help = "PostgreSQL connection URL (overrides config)"
    )]
    pub database_url: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Create the knowledge base schema
    Init,

    /// Check infrastructure status (embedding server, psql, database)
    Status,

    /// Decide and persist topics from a JSON/JSONL file
    Ingest(commands::IngestArgs),

    /// Show one document
    Show(commands::ShowArgs),

    /// List documents
    List,

    /// Show the merge history of a document
    History(commands::HistoryArgs),

    /// Chunk a text file and print the result without storing anything
    Chunk(commands::ChunkArgs),

    /// Manage configuration
    #[command(subcommand)]
    Config(commands::ConfigCommand),
}
