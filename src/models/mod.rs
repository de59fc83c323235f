mod config;
mod decision;
mod document;
mod history;
mod output;
mod topic;

pub use config::{
    ChunkingConfig, Config, DEFAULT_DATABASE_URL, DEFAULT_EMBEDDING_DIMENSION,
    DEFAULT_EMBEDDING_MODEL, DEFAULT_EMBEDDING_URL, DEFAULT_LLM_MODEL, DEFAULT_LLM_URL,
    EmbeddingConfig, LimitsConfig, LlmConfig, StoreConfig,
};
pub use decision::{
    ArbitrationResult, CREATE_THRESHOLD, Decision, FALLBACK_MERGE_THRESHOLD, MERGE_THRESHOLD,
    Verdict,
};
pub use document::{Chunk, Document, DocumentSummary, embedding_text, union_ordered};
pub use history::{MergeHistoryRecord, MergeStrategy};
pub use output::OutputFormat;
pub use topic::Topic;
