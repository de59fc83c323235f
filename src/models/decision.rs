use serde::{Deserialize, Serialize};

/// Similarity at or above which a topic merges without arbitration.
pub const MERGE_THRESHOLD: f32 = 0.85;

/// Similarity at or below which a topic becomes a new document without arbitration.
pub const CREATE_THRESHOLD: f32 = 0.4;

/// Cutoff used when the arbiter cannot settle a Verify decision.
pub const FALLBACK_MERGE_THRESHOLD: f32 = 0.65;

/// Where a topic goes: into an existing document, or into a new one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum Decision {
    Merge {
        target_document_id: String,
        similarity: f32,
        confidence: f32,
        reasoning: String,
    },
    Create {
        similarity: f32,
        reasoning: String,
    },
    /// Transient: resolved to Merge or Create before anything is persisted.
    Verify {
        candidate_document_id: String,
        similarity: f32,
    },
}

impl Decision {
    pub fn similarity(&self) -> f32 {
        match self {
            Decision::Merge { similarity, .. }
            | Decision::Create { similarity, .. }
            | Decision::Verify { similarity, .. } => *similarity,
        }
    }

    pub fn is_final(&self) -> bool {
        !matches!(self, Decision::Verify { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            Decision::Merge { .. } => "merge",
            Decision::Create { .. } => "create",
            Decision::Verify { .. } => "verify",
        }
    }
}

/// The arbiter's verdict on a topic in the uncertain band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Merge,
    Create,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArbitrationResult {
    pub verdict: Verdict,
    pub confidence: f32,
    pub reasoning: String,
}
