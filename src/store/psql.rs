//! Read path through the `psql` command-line client.
//!
//! Queries run in unaligned, tuples-only mode with `|` as the separator.
//! Output lines go through the [`RecordParser`](super::parser::RecordParser);
//! free-text columns that precede other free text are recovered by their
//! `char_length`, selected as a trailing integer column.

use std::process::Stdio;

use chrono::{DateTime, Utc};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use super::parser::{FieldKind, FieldShape, Record, parse_rows};
use super::pg_array::{parse_integer, parse_text_array, parse_vector};
use crate::error::{ParseError, StoreError};
use crate::models::{Chunk, Document, DocumentSummary, MergeHistoryRecord, MergeStrategy};

const SUMMARIES_SQL: &str = "\
SELECT id, title, summary, char_length(title), embedding
FROM documents
ORDER BY created_at, id;";

const DOCUMENT_SQL: &str = "\
SELECT id, title, category, summary, content,
       char_length(title), char_length(category), char_length(summary),
       keywords, source_urls, embedding,
       (extract(epoch FROM created_at) * 1000000)::bigint,
       (extract(epoch FROM updated_at) * 1000000)::bigint
FROM documents
WHERE id = :'id';";

const CHUNKS_SQL: &str = "\
SELECT id, document_id, content, chunk_index, token_count, embedding
FROM chunks
WHERE document_id = :'document_id'
ORDER BY chunk_index;";

const HISTORY_SQL: &str = "\
SELECT target_document_id, changes_made, merge_strategy, source_topic_titles,
       (extract(epoch FROM merged_at) * 1000000)::bigint
FROM merge_history
WHERE target_document_id = :'document_id'
ORDER BY merged_at, id;";

pub fn summary_shape() -> FieldShape {
    FieldShape::new(1, vec![FieldKind::Integer, FieldKind::Array])
}

pub fn document_shape() -> FieldShape {
    FieldShape::new(
        1,
        vec![
            FieldKind::Integer,
            FieldKind::Integer,
            FieldKind::Integer,
            FieldKind::Array,
            FieldKind::Array,
            FieldKind::Array,
            FieldKind::Integer,
            FieldKind::Integer,
        ],
    )
}

pub fn chunk_shape() -> FieldShape {
    FieldShape::new(
        2,
        vec![FieldKind::Integer, FieldKind::Integer, FieldKind::Array],
    )
}

pub fn history_shape() -> FieldShape {
    FieldShape::new(
        1,
        vec![FieldKind::Word, FieldKind::Array, FieldKind::Integer],
    )
}

/// Runs read queries through the `psql` binary.
#[derive(Debug, Clone)]
pub struct PsqlClient {
    bin: String,
    url: String,
}

impl PsqlClient {
    pub fn new(bin: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            bin: bin.into(),
            url: url.into(),
        }
    }

    pub async fn check_available(&self) -> Result<bool, StoreError> {
        match Command::new(&self.bin).arg("--version").output().await {
            Ok(output) => Ok(output.status.success()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StoreError::ExecutionError(e.to_string())),
        }
    }

    /// Run `sql` with `vars` bound as psql variables; returns raw output lines.
    pub async fn query_lines(
        &self,
        sql: &str,
        vars: &[(&str, &str)],
    ) -> Result<Vec<String>, StoreError> {
        let mut cmd = Command::new(&self.bin);
        cmd.args(["-X", "-q", "-A", "-t", "-F", "|", "-v", "ON_ERROR_STOP=1"])
            .args(["-d", self.url.as_str()]);
        for (name, value) in vars {
            cmd.arg("-v").arg(format!("{}={}", name, value));
        }
        cmd.args(["-f", "-"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StoreError::ClientNotFound(format!(
                    "{} not found. Install the PostgreSQL client tools",
                    self.bin
                ))
            } else {
                StoreError::ExecutionError(e.to_string())
            }
        })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(sql.as_bytes())
                .await
                .map_err(|e| StoreError::ExecutionError(e.to_string()))?;
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| StoreError::ExecutionError(e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(StoreError::ExecutionError(format!(
                "psql failed: {}",
                stderr.trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let lines = split_output_lines(&stdout);
        debug!(lines = lines.len(), "psql query finished");
        Ok(lines)
    }

    pub async fn list_summaries(&self) -> Result<Vec<DocumentSummary>, StoreError> {
        let lines = self.query_lines(SUMMARIES_SQL, &[]).await?;
        let records = parse_rows(lines, &summary_shape());
        Ok(records
            .iter()
            .map(decode_summary)
            .collect::<Result<Vec<_>, _>>()?)
    }

    pub async fn fetch_document(&self, id: &str) -> Result<Option<Document>, StoreError> {
        let lines = self.query_lines(DOCUMENT_SQL, &[("id", id)]).await?;
        let records = parse_rows(lines, &document_shape());
        match records.first() {
            Some(record) => Ok(Some(decode_document(record)?)),
            None => Ok(None),
        }
    }

    pub async fn fetch_chunks(&self, document_id: &str) -> Result<Vec<Chunk>, StoreError> {
        let lines = self
            .query_lines(CHUNKS_SQL, &[("document_id", document_id)])
            .await?;
        let records = parse_rows(lines, &chunk_shape());
        Ok(records
            .iter()
            .map(decode_chunk)
            .collect::<Result<Vec<_>, _>>()?)
    }

    pub async fn fetch_history(
        &self,
        document_id: &str,
    ) -> Result<Vec<MergeHistoryRecord>, StoreError> {
        let lines = self
            .query_lines(HISTORY_SQL, &[("document_id", document_id)])
            .await?;
        let records = parse_rows(lines, &history_shape());
        Ok(records
            .iter()
            .map(decode_history)
            .collect::<Result<Vec<_>, _>>()?)
    }
}

fn split_output_lines(stdout: &str) -> Vec<String> {
    let body = stdout.strip_suffix('\n').unwrap_or(stdout);
    if body.is_empty() {
        return Vec::new();
    }
    body.split('\n').map(str::to_string).collect()
}

/// Fields of `record`, warning when it is a best-effort record.
fn checked_fields<'a>(
    record: &'a Record,
    shape: &FieldShape,
    kind: &str,
) -> Result<&'a [String], ParseError> {
    let fields = record.expect_fields(shape.field_count())?;
    if !record.is_terminated() {
        warn!(kind, id = %fields[0], "decoding unterminated record");
    }
    Ok(fields)
}

/// Take the first `len` characters of `text`, then the `|` that follows them.
fn take_chars<'a>(text: &'a str, len: i64) -> Result<(&'a str, &'a str), ParseError> {
    let len = usize::try_from(len).map_err(|_| ParseError::InvalidLiteral {
        kind: "length",
        value: len.to_string(),
    })?;
    let split_at = text
        .char_indices()
        .nth(len)
        .map(|(idx, _)| idx)
        .unwrap_or(text.len());
    let (head, tail) = text.split_at(split_at);
    if head.chars().count() != len {
        return Err(ParseError::FieldCount {
            expected: len,
            found: head.chars().count(),
        });
    }
    let rest = tail.strip_prefix('|').ok_or(ParseError::InvalidLiteral {
        kind: "separator",
        value: tail.chars().take(20).collect(),
    })?;
    Ok((head, rest))
}

fn timestamp(field: &str) -> Result<DateTime<Utc>, ParseError> {
    let micros = parse_integer(field)?;
    DateTime::from_timestamp_micros(micros).ok_or_else(|| ParseError::InvalidLiteral {
        kind: "timestamp",
        value: field.to_string(),
    })
}

fn optional_vector(field: &str) -> Result<Option<Vec<f32>>, ParseError> {
    let vector = parse_vector(field)?;
    Ok((!vector.is_empty()).then_some(vector))
}

pub fn decode_summary(record: &Record) -> Result<DocumentSummary, ParseError> {
    let f = checked_fields(record, &summary_shape(), "summary")?;
    let (title, summary) = take_chars(&f[1], parse_integer(&f[2])?)?;
    Ok(DocumentSummary {
        id: f[0].clone(),
        title: title.to_string(),
        summary: summary.to_string(),
        embedding: optional_vector(&f[3])?,
    })
}

pub fn decode_document(record: &Record) -> Result<Document, ParseError> {
    let f = checked_fields(record, &document_shape(), "document")?;
    let (title, rest) = take_chars(&f[1], parse_integer(&f[2])?)?;
    let (category, rest) = take_chars(rest, parse_integer(&f[3])?)?;
    let (summary, content) = take_chars(rest, parse_integer(&f[4])?)?;
    Ok(Document {
        id: f[0].clone(),
        title: title.to_string(),
        category: category.to_string(),
        summary: summary.to_string(),
        content: content.to_string(),
        keywords: parse_text_array(&f[5])?,
        source_urls: parse_text_array(&f[6])?,
        embedding: parse_vector(&f[7])?,
        created_at: timestamp(&f[8])?,
        updated_at: timestamp(&f[9])?,
    })
}

pub fn decode_chunk(record: &Record) -> Result<Chunk, ParseError> {
    let f = checked_fields(record, &chunk_shape(), "chunk")?;
    let index = u32::try_from(parse_integer(&f[3])?).map_err(|_| ParseError::InvalidLiteral {
        kind: "chunk_index",
        value: f[3].clone(),
    })?;
    let tokens = u32::try_from(parse_integer(&f[4])?).map_err(|_| ParseError::InvalidLiteral {
        kind: "token_count",
        value: f[4].clone(),
    })?;
    let mut chunk = Chunk::new(&f[1], index, f[2].clone(), tokens, parse_vector(&f[5])?);
    chunk.id = f[0].clone();
    Ok(chunk)
}

pub fn decode_history(record: &Record) -> Result<MergeHistoryRecord, ParseError> {
    let f = checked_fields(record, &history_shape(), "merge history")?;
    let merge_strategy = f[2]
        .parse::<MergeStrategy>()
        .unwrap_or(MergeStrategy::Unknown);
    Ok(MergeHistoryRecord {
        target_document_id: f[0].clone(),
        changes_made: f[1].clone(),
        merge_strategy,
        source_topic_titles: parse_text_array(&f[3])?,
        merged_at: timestamp(&f[4])?,
    })
}
