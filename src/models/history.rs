use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How a merge combined the incoming content with the existing document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MergeStrategy {
    Reorganize,
    AppendOnly,
    Unknown,
}

impl std::str::FromStr for MergeStrategy {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_lowercase().replace('_', "-").as_str() {
            "reorganize" => MergeStrategy::Reorganize,
            "append-only" | "append" => MergeStrategy::AppendOnly,
            _ => MergeStrategy::Unknown,
        })
    }
}

impl std::fmt::Display for MergeStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MergeStrategy::Reorganize => write!(f, "reorganize"),
            MergeStrategy::AppendOnly => write!(f, "append-only"),
            MergeStrategy::Unknown => write!(f, "unknown"),
        }
    }
}

/// Append-only audit entry written with every committed merge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeHistoryRecord {
    pub target_document_id: String,
    pub source_topic_titles: Vec<String>,
    pub merge_strategy: MergeStrategy,
    pub changes_made: String,
    pub merged_at: DateTime<Utc>,
}
