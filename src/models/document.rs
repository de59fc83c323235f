use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::utils::{calculate_checksum, slugify};

/// A knowledge base document: the merged, reconciled form of one or more topics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub title: String,
    pub content: String,
    pub summary: String,
    pub category: String,
    /// Case-preserved, deduplicated, in first-seen order.
    pub keywords: Vec<String>,
    /// Append-only, deduplicated, in first-seen order.
    pub source_urls: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub embedding: Vec<f32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The slice of a document the decision engine compares topics against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentSummary {
    pub id: String,
    pub title: String,
    pub summary: String,
    #[serde(default)]
    pub embedding: Option<Vec<f32>>,
}

/// A retrieval unit owned by exactly one document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub content: String,
    pub chunk_index: u32,
    pub token_count: u32,
    pub checksum: String,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub embedding: Vec<f32>,
}

/// Text used to embed a document or a topic. Every call site goes through
/// here so stored and freshly computed vectors describe the same string.
pub fn embedding_text(title: &str, summary: &str) -> String {
    format!("{}. {}", title.trim(), summary.trim())
}

impl Document {
    /// Build a fresh id from the title and a microsecond timestamp.
    ///
    /// The random suffix keeps ids distinct when two documents with the same
    /// title are created within the same microsecond.
    pub fn generate_id(title: &str, now: DateTime<Utc>) -> String {
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        format!(
            "{}-{}-{}",
            slugify(title, 48),
            now.format("%Y%m%d%H%M%S%6f"),
            &suffix[..8]
        )
    }

    pub fn summary_view(&self) -> DocumentSummary {
        DocumentSummary {
            id: self.id.clone(),
            title: self.title.clone(),
            summary: self.summary.clone(),
            embedding: if self.embedding.is_empty() {
                None
            } else {
                Some(self.embedding.clone())
            },
        }
    }

    pub fn embedding_text(&self) -> String {
        embedding_text(&self.title, &self.summary)
    }
}

impl DocumentSummary {
    pub fn embedding_text(&self) -> String {
        embedding_text(&self.title, &self.summary)
    }
}

impl Chunk {
    pub fn generate_id(document_id: &str, chunk_index: u32) -> String {
        use uuid::Uuid;
        let name = format!("{}:{}", document_id, chunk_index);
        Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes()).to_string()
    }

    pub fn new(
        document_id: &str,
        chunk_index: u32,
        content: String,
        token_count: u32,
        embedding: Vec<f32>,
    ) -> Self {
        Self {
            id: Self::generate_id(document_id, chunk_index),
            document_id: document_id.to_string(),
            checksum: calculate_checksum(&content),
            content,
            chunk_index,
            token_count,
            embedding,
        }
    }
}

/// Append items not already present, preserving first-seen order.
pub fn union_ordered<I>(target: &mut Vec<String>, items: I)
where
    I: IntoIterator<Item = String>,
{
    for item in items {
        let trimmed = item.trim();
        if trimmed.is_empty() || target.iter().any(|t| t == trimmed) {
            continue;
        }
        target.push(trimmed.to_string());
    }
}
