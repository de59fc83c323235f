//! In-memory [`Store`] implementation for tests and offline runs.
//!
//! Uses `HashMap` and `Vec` behind `std::sync::RwLock`. A transaction stages
//! its writes privately and applies them all under one write lock at commit.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tracing::debug;

use super::{Store, Transaction};
use crate::error::StoreError;
use crate::models::{Chunk, Document, DocumentSummary, MergeHistoryRecord};

#[derive(Debug, Default)]
struct State {
    docs: HashMap<String, Document>,
    chunks: HashMap<String, Vec<Chunk>>,
    history: Vec<MergeHistoryRecord>,
}

#[derive(Debug, Default)]
struct Shared {
    state: RwLock<State>,
    fail_next_commit: AtomicBool,
    commits: AtomicUsize,
}

/// In-memory store with commit fault injection.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    shared: Arc<Shared>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `commit` fail without applying anything.
    pub fn fail_next_commit(&self) {
        self.shared.fail_next_commit.store(true, Ordering::SeqCst);
    }

    /// Number of successful commits so far.
    pub fn commit_count(&self) -> usize {
        self.shared.commits.load(Ordering::SeqCst)
    }

    pub fn document_count(&self) -> usize {
        self.read().docs.len()
    }

    /// Write a document and its chunks directly, bypassing transactions.
    pub fn seed(&self, document: Document, chunks: Vec<Chunk>) {
        let mut state = self.write();
        state.chunks.insert(document.id.clone(), chunks);
        state.docs.insert(document.id.clone(), document);
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, State> {
        self.shared.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, State> {
        self.shared.state.write().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn begin(&self) -> Result<Box<dyn Transaction>, StoreError> {
        Ok(Box::new(MemoryTransaction {
            shared: self.shared.clone(),
            ops: Vec::new(),
        }))
    }

    async fn list_candidates(&self) -> Result<Vec<DocumentSummary>, StoreError> {
        let state = self.read();
        let mut docs: Vec<&Document> = state.docs.values().collect();
        docs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(docs.into_iter().map(Document::summary_view).collect())
    }

    async fn get_document(&self, id: &str) -> Result<Option<Document>, StoreError> {
        Ok(self.read().docs.get(id).cloned())
    }

    async fn get_chunks(&self, document_id: &str) -> Result<Vec<Chunk>, StoreError> {
        let mut chunks = self
            .read()
            .chunks
            .get(document_id)
            .cloned()
            .unwrap_or_default();
        chunks.sort_by_key(|c| c.chunk_index);
        Ok(chunks)
    }

    async fn merge_history(
        &self,
        document_id: &str,
    ) -> Result<Vec<MergeHistoryRecord>, StoreError> {
        Ok(self
            .read()
            .history
            .iter()
            .filter(|r| r.target_document_id == document_id)
            .cloned()
            .collect())
    }
}

#[derive(Debug)]
enum Op {
    UpsertDocument(Document),
    ReplaceChunks(String, Vec<Chunk>),
    AppendHistory(MergeHistoryRecord),
}

struct MemoryTransaction {
    shared: Arc<Shared>,
    ops: Vec<Op>,
}

#[async_trait]
impl Transaction for MemoryTransaction {
    async fn upsert_document(&mut self, document: &Document) -> Result<(), StoreError> {
        self.ops.push(Op::UpsertDocument(document.clone()));
        Ok(())
    }

    async fn replace_chunks(
        &mut self,
        document_id: &str,
        chunks: &[Chunk],
    ) -> Result<(), StoreError> {
        self.ops
            .push(Op::ReplaceChunks(document_id.to_string(), chunks.to_vec()));
        Ok(())
    }

    async fn append_merge_history(&mut self, record: &MergeHistoryRecord) -> Result<(), StoreError> {
        self.ops.push(Op::AppendHistory(record.clone()));
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let MemoryTransaction { shared, ops } = *self;
        if shared.fail_next_commit.swap(false, Ordering::SeqCst) {
            return Err(StoreError::CommitFailed("injected commit failure".to_string()));
        }

        let mut state = shared.state.write().unwrap_or_else(|e| e.into_inner());

        // Validate references against the post-commit view before touching anything.
        for op in &ops {
            let target = match op {
                Op::UpsertDocument(_) => continue,
                Op::ReplaceChunks(id, _) => id,
                Op::AppendHistory(record) => &record.target_document_id,
            };
            let staged = ops
                .iter()
                .any(|o| matches!(o, Op::UpsertDocument(d) if &d.id == target));
            if !staged && !state.docs.contains_key(target) {
                return Err(StoreError::CommitFailed(format!(
                    "unknown document {}",
                    target
                )));
            }
        }

        let count = ops.len();
        for op in ops {
            match op {
                Op::UpsertDocument(doc) => {
                    let doc = match state.docs.get(&doc.id) {
                        Some(existing) => Document {
                            created_at: existing.created_at,
                            ..doc
                        },
                        None => doc,
                    };
                    state.docs.insert(doc.id.clone(), doc);
                }
                Op::ReplaceChunks(id, chunks) => {
                    state.chunks.insert(id, chunks);
                }
                Op::AppendHistory(record) => state.history.push(record),
            }
        }
        drop(state);

        shared.commits.fetch_add(1, Ordering::SeqCst);
        debug!(ops = count, "memory transaction committed");
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        debug!(ops = self.ops.len(), "memory transaction rolled back");
        Ok(())
    }
}
