use std::fmt::Write as FmtWrite;

use crate::models::{
    Chunk, Decision, Document, DocumentSummary, MergeHistoryRecord, OutputFormat,
};
use crate::services::{IngestReport, TextChunk, TopicDecision};
use crate::utils::truncate_chars;

const PREVIEW_CHARS: usize = 120;

pub trait Formatter {
    fn format_document(&self, document: &Document, chunks: Option<&[Chunk]>) -> String;
    fn format_summaries(&self, summaries: &[DocumentSummary]) -> String;
    fn format_history(&self, document_id: &str, records: &[MergeHistoryRecord]) -> String;
    fn format_decisions(&self, decisions: &[TopicDecision]) -> String;
    fn format_ingest_report(&self, report: &IngestReport, duration_ms: u64) -> String;
    fn format_chunks(&self, chunks: &[TextChunk]) -> String;
    fn format_status(&self, status: &StatusInfo) -> String;
    fn format_message(&self, message: &str) -> String;
    fn format_error(&self, error: &str) -> String;
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct StatusInfo {
    pub embedding_url: String,
    pub embedding_model: String,
    pub embedding_ok: bool,
    pub llm_url: String,
    pub llm_model: String,
    pub psql_available: bool,
    pub database_connected: bool,
    pub document_count: Option<usize>,
}

fn preview(text: &str) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    truncate_chars(&flat, PREVIEW_CHARS)
}

fn describe_decision(decision: &Decision) -> String {
    match decision {
        Decision::Merge {
            target_document_id,
            similarity,
            confidence,
            ..
        } => format!(
            "merge into {} (similarity {:.3}, confidence {:.2})",
            target_document_id, similarity, confidence
        ),
        Decision::Create { similarity, .. } => {
            format!("create (best similarity {:.3})", similarity)
        }
        Decision::Verify {
            candidate_document_id,
            similarity,
        } => format!(
            "verify against {} (similarity {:.3})",
            candidate_document_id, similarity
        ),
    }
}

pub struct TextFormatter;

impl Formatter for TextFormatter {
    fn format_document(&self, document: &Document, chunks: Option<&[Chunk]>) -> String {
        let mut output = String::new();
        writeln!(output, "{}", document.title).unwrap();
        writeln!(output, "{}", "-".repeat(document.title.chars().count().max(4))).unwrap();
        writeln!(output, "ID: {}", document.id).unwrap();
        if !document.category.is_empty() {
            writeln!(output, "Category: {}", document.category).unwrap();
        }
        if !document.keywords.is_empty() {
            writeln!(output, "Keywords: {}", document.keywords.join(", ")).unwrap();
        }
        for url in &document.source_urls {
            writeln!(output, "Source: {}", url).unwrap();
        }
        writeln!(output, "Created: {}", document.created_at.to_rfc3339()).unwrap();
        writeln!(output, "Updated: {}", document.updated_at.to_rfc3339()).unwrap();
        if document.embedding.is_empty() {
            writeln!(output, "Embedding: missing").unwrap();
        }
        writeln!(output).unwrap();
        writeln!(output, "{}", document.summary).unwrap();
        writeln!(output).unwrap();
        writeln!(output, "{}", document.content).unwrap();

        if let Some(chunks) = chunks {
            writeln!(output).unwrap();
            writeln!(output, "Chunks ({})", chunks.len()).unwrap();
            for chunk in chunks {
                writeln!(
                    output,
                    "  [{}] {} tokens  {}",
                    chunk.chunk_index,
                    chunk.token_count,
                    preview(&chunk.content)
                )
                .unwrap();
            }
        }
        output
    }

    fn format_summaries(&self, summaries: &[DocumentSummary]) -> String {
        if summaries.is_empty() {
            return "No documents found.\n".to_string();
        }

        let mut output = String::new();
        writeln!(output, "Documents ({})", summaries.len()).unwrap();
        writeln!(output, "---------").unwrap();
        for summary in summaries {
            let marker = if summary.embedding.is_some() { ' ' } else { '!' };
            writeln!(output, "{} {}  {}", marker, summary.id, summary.title).unwrap();
        }
        output
    }

    fn format_history(&self, document_id: &str, records: &[MergeHistoryRecord]) -> String {
        if records.is_empty() {
            return format!("No merges recorded for: {}\n", document_id);
        }

        let mut output = String::new();
        writeln!(output, "Merge history for {}", document_id).unwrap();
        writeln!(output, "------------------").unwrap();
        for record in records {
            writeln!(
                output,
                "{}  {}  {}",
                record.merged_at.to_rfc3339(),
                record.merge_strategy,
                record.source_topic_titles.join(" | ")
            )
            .unwrap();
            if !record.changes_made.is_empty() {
                writeln!(output, "    {}", record.changes_made).unwrap();
            }
        }
        output
    }

    fn format_decisions(&self, decisions: &[TopicDecision]) -> String {
        let mut output = String::new();
        for (i, topic) in decisions.iter().enumerate() {
            let target = match &topic.joins_new_document {
                Some(owner) => format!("join new document \"{}\"", owner),
                None => describe_decision(&topic.decision),
            };
            writeln!(output, "{}. {} -> {}", i + 1, topic.title, target).unwrap();
        }
        output
    }

    fn format_ingest_report(&self, report: &IngestReport, duration_ms: u64) -> String {
        let mut output = String::new();
        writeln!(output, "Ingest Complete").unwrap();
        writeln!(output, "---------------").unwrap();
        writeln!(output, "Topics: {}", report.decisions.len()).unwrap();
        writeln!(output, "Documents created: {}", report.created.len()).unwrap();
        writeln!(output, "Documents merged: {}", report.merged.len()).unwrap();
        for created in &report.created {
            writeln!(output, "  + {}", created).unwrap();
        }
        for merged in &report.merged {
            writeln!(
                output,
                "  ~ {} ({} topics)",
                merged.document_id, merged.topic_count
            )
            .unwrap();
        }
        if !report.failures.is_empty() {
            writeln!(output, "Failures: {}", report.failures.len()).unwrap();
            for failure in &report.failures {
                writeln!(
                    output,
                    "  ✗ {}: {}",
                    failure.topics.join(", "),
                    failure.error
                )
                .unwrap();
            }
        }
        writeln!(output, "Duration: {}ms", duration_ms).unwrap();
        output
    }

    fn format_chunks(&self, chunks: &[TextChunk]) -> String {
        if chunks.is_empty() {
            return "No chunks produced.\n".to_string();
        }

        let mut output = String::new();
        for chunk in chunks {
            writeln!(
                output,
                "--- chunk {} ({} tokens, {} chars) ---",
                chunk.chunk_index,
                chunk.token_count,
                chunk.content.chars().count()
            )
            .unwrap();
            writeln!(output, "{}", chunk.content).unwrap();
        }
        output
    }

    fn format_status(&self, status: &StatusInfo) -> String {
        let mark = |ok: bool| if ok { "✓" } else { "✗" };
        let mut output = String::new();
        writeln!(output, "Knowledge Base Status").unwrap();
        writeln!(output, "---------------------").unwrap();
        writeln!(
            output,
            "{} Embedding: {} ({})",
            mark(status.embedding_ok),
            status.embedding_url,
            status.embedding_model
        )
        .unwrap();
        writeln!(output, "  LLM: {} ({})", status.llm_url, status.llm_model).unwrap();
        writeln!(output, "{} psql client", mark(status.psql_available)).unwrap();
        writeln!(output, "{} Database", mark(status.database_connected)).unwrap();
        if let Some(count) = status.document_count {
            writeln!(output, "  Documents: {}", count).unwrap();
        }
        output
    }

    fn format_message(&self, message: &str) -> String {
        format!("{}\n", message)
    }

    fn format_error(&self, error: &str) -> String {
        format!("Error: {}\n", error)
    }
}

pub struct JsonFormatter {
    pretty: bool,
}

impl JsonFormatter {
    pub fn new(pretty: bool) -> Self {
        Self { pretty }
    }

    fn render(&self, value: &serde_json::Value) -> String {
        let rendered = if self.pretty {
            serde_json::to_string_pretty(value)
        } else {
            serde_json::to_string(value)
        };
        rendered.unwrap_or_else(|e| format!("{{\"error\": \"{}\"}}", e)) + "\n"
    }
}

impl Formatter for JsonFormatter {
    fn format_document(&self, document: &Document, chunks: Option<&[Chunk]>) -> String {
        let mut value = serde_json::json!({ "document": document });
        if let Some(chunks) = chunks {
            value["chunks"] = serde_json::json!(chunks);
        }
        self.render(&value)
    }

    fn format_summaries(&self, summaries: &[DocumentSummary]) -> String {
        let items: Vec<_> = summaries
            .iter()
            .map(|s| {
                serde_json::json!({
                    "id": s.id,
                    "title": s.title,
                    "summary": s.summary,
                    "embedded": s.embedding.is_some(),
                })
            })
            .collect();
        self.render(&serde_json::json!({ "documents": items }))
    }

    fn format_history(&self, document_id: &str, records: &[MergeHistoryRecord]) -> String {
        self.render(&serde_json::json!({
            "document_id": document_id,
            "history": records,
        }))
    }

    fn format_decisions(&self, decisions: &[TopicDecision]) -> String {
        self.render(&serde_json::json!({ "decisions": decisions }))
    }

    fn format_ingest_report(&self, report: &IngestReport, duration_ms: u64) -> String {
        self.render(&serde_json::json!({
            "report": report,
            "success": report.is_success(),
            "duration_ms": duration_ms,
        }))
    }

    fn format_chunks(&self, chunks: &[TextChunk]) -> String {
        self.render(&serde_json::json!({ "chunks": chunks }))
    }

    fn format_status(&self, status: &StatusInfo) -> String {
        self.render(&serde_json::json!(status))
    }

    fn format_message(&self, message: &str) -> String {
        self.render(&serde_json::json!({ "message": message }))
    }

    fn format_error(&self, error: &str) -> String {
        self.render(&serde_json::json!({ "error": error }))
    }
}

pub fn get_formatter(format: OutputFormat) -> Box<dyn Formatter> {
    match format {
        OutputFormat::Text => Box::new(TextFormatter),
        OutputFormat::Json => Box::new(JsonFormatter::new(true)),
    }
}
