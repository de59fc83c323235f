mod chunker;
mod coordinator;
mod decision;
mod embedding;
mod llm;
mod locks;
mod pipeline;
mod provider;
mod rate_limit;
mod similarity;

pub use chunker::{CHARS_PER_TOKEN, TextChunk, TextChunker, chunk_text, estimate_tokens};
pub use coordinator::{ConsistencyCoordinator, merge_marker, verify_chunk_set};
pub use decision::{DEFAULT_PROVIDER_TIMEOUT, DecisionEngine, classify, fallback_decision};
pub use embedding::{EmbeddingClient, normalize_embeddings};
pub use llm::{LlmArbiter, LlmClient, LlmReconciler, decode_reply};
pub use locks::{DocumentGuard, DocumentLocks};
pub use pipeline::{IngestFailure, IngestReport, Ingestor, MergedDocument, TopicDecision};
pub use provider::{
    Arbiter, Embedder, NoArbiter, NoReconciler, ReconcileContext, ReconcileMeta, Reconciler,
};
pub use rate_limit::{RatePermit, RateLimiter};
pub use similarity::{best_match, cosine_similarity, is_valid_embedding};
