//! Error types for the knowledge base engine.

use thiserror::Error;

use crate::utils::retry::Retryable;

/// Errors related to embedding operations.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("failed to connect to embedding server: {0}")]
    ConnectionError(String),

    #[error("embedding server error: {0}")]
    ServerError(String),

    #[error("embedding request failed: {0}")]
    RequestError(#[from] reqwest::Error),

    #[error("invalid embedding response: {0}")]
    InvalidResponse(String),

    #[error("embedding timeout")]
    Timeout,
}

impl Retryable for EmbeddingError {
    fn is_retryable(&self) -> bool {
        match self {
            EmbeddingError::ConnectionError(_) | EmbeddingError::Timeout => true,
            EmbeddingError::ServerError(msg) => is_transient_status(msg),
            EmbeddingError::RequestError(e) => e.is_timeout() || e.is_connect(),
            EmbeddingError::InvalidResponse(_) => false,
        }
    }
}

/// Errors related to text generation (reconciliation, arbitration).
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("failed to connect to LLM server: {0}")]
    ConnectionError(String),

    #[error("LLM server error: {0}")]
    ServerError(String),

    #[error("LLM request failed: {0}")]
    RequestError(#[from] reqwest::Error),

    #[error("malformed LLM reply: {0}")]
    MalformedReply(String),

    #[error("LLM timeout")]
    Timeout,
}

impl Retryable for LlmError {
    fn is_retryable(&self) -> bool {
        match self {
            LlmError::ConnectionError(_) | LlmError::Timeout => true,
            LlmError::ServerError(msg) => is_transient_status(msg),
            LlmError::RequestError(e) => e.is_timeout() || e.is_connect(),
            LlmError::MalformedReply(_) => false,
        }
    }
}

fn is_transient_status(msg: &str) -> bool {
    let lower = msg.to_lowercase();
    msg.contains("503")
        || msg.contains("502")
        || msg.contains("504")
        || msg.contains("429")
        || lower.contains("unavailable")
        || lower.contains("too many requests")
}

/// Errors raised by the persistence boundary.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to connect to PostgreSQL: {0}")]
    ConnectionError(String),

    #[error("PostgreSQL error: {0}")]
    PostgresError(String),

    #[error("pgvector extension error: {0}")]
    PgVectorExtensionError(String),

    #[error("psql client not found: {0}")]
    ClientNotFound(String),

    #[error("psql execution error: {0}")]
    ExecutionError(String),

    #[error("record decode error: {0}")]
    Decode(#[from] ParseError),

    #[error("commit failed: {0}")]
    CommitFailed(String),

    #[error("transaction already finished")]
    TransactionFinished,
}

impl Retryable for StoreError {
    fn is_retryable(&self) -> bool {
        match self {
            StoreError::ConnectionError(_) => true,
            StoreError::PostgresError(msg) | StoreError::ExecutionError(msg) => {
                let msg_lower = msg.to_lowercase();
                msg_lower.contains("timeout")
                    || msg_lower.contains("connection")
                    || msg_lower.contains("could not serialize")
                    || msg_lower.contains("deadlock")
            }
            _ => false,
        }
    }
}

/// Errors decoding records read back from the store's text output.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error("expected {expected} fields, found {found}")]
    FieldCount { expected: usize, found: usize },

    #[error("record is unterminated: trailing fields never validated")]
    Unterminated,

    #[error("invalid {kind} literal: {value}")]
    InvalidLiteral { kind: &'static str, value: String },
}

/// Errors related to configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlParseError(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),

    #[error("path error: {0}")]
    PathError(String),

    #[error("validation error: {0}")]
    ValidationError(String),
}

/// A commit that would break the document/chunk invariant.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConsistencyViolation {
    #[error("document {document_id}: all {attempted} chunks failed to embed")]
    NoEmbeddedChunks {
        document_id: String,
        attempted: usize,
    },

    #[error("document {document_id}: non-empty content produced no chunks")]
    MissingChunks { document_id: String },

    #[error("document {document_id}: chunk at position {position} has index {found}")]
    IndexGap {
        document_id: String,
        position: usize,
        found: u32,
    },

    #[error("chunk {chunk_id} belongs to {owner}, not {document_id}")]
    ForeignChunk {
        chunk_id: String,
        owner: String,
        document_id: String,
    },

    #[error("chunk {chunk_id} id does not derive from its document and index")]
    ChunkIdMismatch { chunk_id: String },

    #[error("chunk {chunk_index} embedding has dimension {found}, expected {expected}")]
    DimensionMismatch {
        chunk_index: u32,
        expected: usize,
        found: usize,
    },
}

/// Errors surfaced by the consistency coordinator.
#[derive(Debug, Error)]
pub enum ConsistencyError {
    #[error("consistency violation: {0}")]
    Violation(#[from] ConsistencyViolation),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("document not found: {0}")]
    DocumentNotFound(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

/// Application-level errors that wrap domain errors.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("consistency error: {0}")]
    Consistency(#[from] ConsistencyError),

    #[error("embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("{0}")]
    Other(String),
}
