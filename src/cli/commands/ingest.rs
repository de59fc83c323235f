//! Ingest command implementation.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Args;
use indicatif::{ProgressBar, ProgressStyle};

use super::{build_ingestor, connect_store, read_input};
use crate::cli::output::get_formatter;
use crate::models::{Config, OutputFormat, Topic};
use crate::store::Store;

/// Arguments for the ingest command.
#[derive(Debug, Args)]
pub struct IngestArgs {
    /// Path to a JSON array or JSONL file of topics (use - for stdin)
    pub file: Option<PathBuf>,

    /// Decide every topic and print the decisions without writing anything
    #[arg(long)]
    pub dry_run: bool,

    /// Skip the LLM: merges are append-only and uncertain topics use the similarity cutoff
    #[arg(long)]
    pub no_llm: bool,
}

pub async fn handle_ingest(
    args: IngestArgs,
    config: &Config,
    format: OutputFormat,
    verbose: bool,
) -> Result<()> {
    let formatter = get_formatter(format);
    let start_time = Instant::now();

    let input = read_input(args.file.as_deref())?;
    let mut topics = parse_topics(&input)?;
    if topics.is_empty() {
        print!("{}", formatter.format_message("No topics found in input."));
        return Ok(());
    }
    if verbose {
        eprintln!("Found {} topics", topics.len());
    }

    let store: Arc<dyn Store> = Arc::new(connect_store(config).await?);
    let ingestor = build_ingestor(config, store, !args.no_llm)?;

    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {msg}")
            .unwrap(),
    );
    pb.enable_steady_tick(Duration::from_millis(120));

    if args.dry_run {
        pb.set_message(format!("Deciding {} topics...", topics.len()));
        let decisions = ingestor.plan(&mut topics).await;
        pb.finish_and_clear();
        print!("{}", formatter.format_decisions(&decisions?));
        return Ok(());
    }

    pb.set_message(format!("Ingesting {} topics...", topics.len()));
    let report = ingestor.ingest(topics).await;
    pb.finish_and_clear();
    let report = report?;

    let duration_ms = start_time.elapsed().as_millis() as u64;
    print!("{}", formatter.format_ingest_report(&report, duration_ms));

    if !report.is_success() {
        anyhow::bail!("{} topic group(s) failed", report.failures.len());
    }
    Ok(())
}

/// Parse topics from a JSON array or JSONL.
fn parse_topics(input: &str) -> Result<Vec<Topic>> {
    let input = input.trim();

    if input.is_empty() {
        return Ok(Vec::new());
    }

    if input.starts_with('[') {
        return serde_json::from_str(input).context("failed to parse JSON array");
    }

    let mut topics = Vec::new();
    for (i, line) in input.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let topic: Topic = serde_json::from_str(line)
            .with_context(|| format!("failed to parse JSON at line {}", i + 1))?;
        topics.push(topic);
    }

    Ok(topics)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_topics_json_array() {
        let topics = parse_topics(r#"[{"title": "A"}, {"title": "B", "summary": "b"}]"#).unwrap();
        assert_eq!(topics.len(), 2);
        assert_eq!(topics[1].summary, "b");
    }

    #[test]
    fn test_parse_topics_jsonl_skips_blank_lines() {
        let input = "{\"title\": \"A\"}\n\n{\"title\": \"B\"}\n";
        let topics = parse_topics(input).unwrap();
        assert_eq!(topics.len(), 2);
    }

    #[test]
    fn test_parse_topics_reports_line() {
        let err = parse_topics("{\"title\": \"A\"}\nnot json").unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }

    #[test]
    fn test_parse_topics_empty() {
        assert!(parse_topics("  \n").unwrap().is_empty());
    }
}
