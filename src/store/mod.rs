//! Persistence boundary.
//!
//! Writes go through a [`Transaction`]; nothing a transaction stages is
//! visible until `commit` returns. Dropping an uncommitted transaction
//! discards its writes.

pub mod memory;
pub mod parser;
pub mod pg_array;
pub mod postgres;
pub mod psql;

pub use memory::InMemoryStore;
pub use parser::{FieldKind, FieldShape, Record, RecordParser, parse_rows};
pub use postgres::PgStore;
pub use psql::PsqlClient;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::models::{Chunk, Document, DocumentSummary, MergeHistoryRecord};

#[async_trait]
pub trait Store: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn Transaction>, StoreError>;

    /// Every document as a decision candidate, oldest first.
    async fn list_candidates(&self) -> Result<Vec<DocumentSummary>, StoreError>;

    async fn get_document(&self, id: &str) -> Result<Option<Document>, StoreError>;

    /// Chunks of a document ordered by `chunk_index`.
    async fn get_chunks(&self, document_id: &str) -> Result<Vec<Chunk>, StoreError>;

    /// Merge history of a document, oldest first.
    async fn merge_history(&self, document_id: &str)
    -> Result<Vec<MergeHistoryRecord>, StoreError>;
}

#[async_trait]
pub trait Transaction: Send {
    /// Insert the document, or overwrite every mutable field of an existing one.
    async fn upsert_document(&mut self, document: &Document) -> Result<(), StoreError>;

    /// Delete all chunks of `document_id` and insert `chunks` in their place.
    async fn replace_chunks(&mut self, document_id: &str, chunks: &[Chunk])
    -> Result<(), StoreError>;

    async fn append_merge_history(&mut self, record: &MergeHistoryRecord)
    -> Result<(), StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}
