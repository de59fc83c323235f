use serde::{Deserialize, Serialize};

use super::document::embedding_text;

/// A unit of extracted knowledge waiting to be placed in the knowledge base.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Topic {
    pub title: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    /// Precomputed embedding of [`Topic::embedding_text`]; never recomputed once set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

impl Topic {
    pub fn new(
        title: impl Into<String>,
        summary: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            summary: summary.into(),
            content: content.into(),
            category: String::new(),
            keywords: Vec::new(),
            source_url: None,
            embedding: None,
        }
    }

    pub fn embedding_text(&self) -> String {
        embedding_text(&self.title, &self.summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_deserializes_with_defaults() {
        let topic: Topic = serde_json::from_str(r#"{"title": "Borrowing"}"#).unwrap();
        assert_eq!(topic.title, "Borrowing");
        assert!(topic.keywords.is_empty());
        assert!(topic.embedding.is_none());
    }

    #[test]
    fn test_topic_embedding_text() {
        let topic = Topic::new("Lifetimes", "How references stay valid", "");
        assert_eq!(topic.embedding_text(), "Lifetimes. How references stay valid");
    }
}
