//! Atomic create/merge lifecycle of a document and its chunk set.
//!
//! Every path ends in one transaction that writes the document, its complete
//! chunk set and (for merges) one history record. Chunks are always rebuilt
//! from the final content; an old chunk set is never patched.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use super::chunker::TextChunker;
use super::decision::DEFAULT_PROVIDER_TIMEOUT;
use super::locks::DocumentLocks;
use super::provider::{Embedder, ReconcileContext, ReconcileMeta, Reconciler};
use super::similarity::is_valid_embedding;
use crate::error::{ConsistencyError, ConsistencyViolation, StoreError};
use crate::models::{
    Chunk, Decision, Document, MergeHistoryRecord, MergeStrategy, Topic, union_ordered,
};
use crate::store::Store;
use crate::utils::is_plausible_rewrite;

/// Separator written between existing content and each merged topic.
pub fn merge_marker(topic_title: &str) -> String {
    format!("\n\n--- Merged from: {} ---\n\n", topic_title)
}

/// Check a chunk set against the document it is about to be committed with.
pub fn verify_chunk_set(document: &Document, chunks: &[Chunk]) -> Result<(), ConsistencyViolation> {
    if chunks.is_empty() && !document.content.trim().is_empty() {
        return Err(ConsistencyViolation::MissingChunks {
            document_id: document.id.clone(),
        });
    }

    let expected_dim = chunks.first().map(|c| c.embedding.len());
    for (position, chunk) in chunks.iter().enumerate() {
        if chunk.document_id != document.id {
            return Err(ConsistencyViolation::ForeignChunk {
                chunk_id: chunk.id.clone(),
                owner: chunk.document_id.clone(),
                document_id: document.id.clone(),
            });
        }
        if chunk.chunk_index as usize != position {
            return Err(ConsistencyViolation::IndexGap {
                document_id: document.id.clone(),
                position,
                found: chunk.chunk_index,
            });
        }
        if chunk.id != Chunk::generate_id(&document.id, chunk.chunk_index) {
            return Err(ConsistencyViolation::ChunkIdMismatch {
                chunk_id: chunk.id.clone(),
            });
        }
        let found = chunk.embedding.len();
        let expected = if document.embedding.is_empty() {
            expected_dim.unwrap_or(found)
        } else {
            document.embedding.len()
        };
        if found == 0 || found != expected {
            return Err(ConsistencyViolation::DimensionMismatch {
                chunk_index: chunk.chunk_index,
                expected,
                found,
            });
        }
    }
    Ok(())
}

/// Owns the write side of the knowledge base.
#[derive(Clone)]
pub struct ConsistencyCoordinator {
    store: Arc<dyn Store>,
    embedder: Arc<dyn Embedder>,
    reconciler: Arc<dyn Reconciler>,
    chunker: TextChunker,
    locks: DocumentLocks,
    batch_size: usize,
    provider_timeout: Duration,
    dimension: Option<usize>,
}

impl ConsistencyCoordinator {
    pub fn new(
        store: Arc<dyn Store>,
        embedder: Arc<dyn Embedder>,
        reconciler: Arc<dyn Reconciler>,
        chunker: TextChunker,
    ) -> Self {
        Self {
            store,
            embedder,
            reconciler,
            chunker,
            locks: DocumentLocks::new(),
            batch_size: 8,
            provider_timeout: DEFAULT_PROVIDER_TIMEOUT,
            dimension: None,
        }
    }

    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, provider_timeout: Duration) -> Self {
        self.provider_timeout = provider_timeout;
        self
    }

    /// Expected vector length. Without it, a chunk set takes the most common
    /// length among its own vectors.
    #[must_use]
    pub fn with_dimension(mut self, dimension: usize) -> Self {
        self.dimension = (dimension > 0).then_some(dimension);
        self
    }

    /// Share a lock table with other coordinators writing to the same store.
    #[must_use]
    pub fn with_locks(mut self, locks: DocumentLocks) -> Self {
        self.locks = locks;
        self
    }

    /// Persist `decision` for `topics`.
    ///
    /// `Create` takes exactly one topic. `Merge` takes one or more topics and
    /// merges them into the target in a single pass; the target is re-read
    /// from the store under its lock, so `existing` only has to identify it.
    pub async fn apply(
        &self,
        decision: Decision,
        topics: Vec<Topic>,
        existing: Option<Document>,
    ) -> Result<Document, ConsistencyError> {
        match decision {
            Decision::Create { .. } => {
                let [topic]: [Topic; 1] = topics.try_into().map_err(|t: Vec<Topic>| {
                    ConsistencyError::InvalidRequest(format!(
                        "create takes exactly one topic, got {}",
                        t.len()
                    ))
                })?;
                self.create(topic).await
            }
            Decision::Merge {
                target_document_id, ..
            } => {
                if let Some(doc) = &existing
                    && doc.id != target_document_id
                {
                    return Err(ConsistencyError::InvalidRequest(format!(
                        "existing document {} is not merge target {}",
                        doc.id, target_document_id
                    )));
                }
                if topics.is_empty() {
                    return Err(ConsistencyError::InvalidRequest(
                        "merge needs at least one topic".to_string(),
                    ));
                }
                self.merge(&target_document_id, topics).await
            }
            Decision::Verify {
                candidate_document_id,
                ..
            } => Err(ConsistencyError::InvalidRequest(format!(
                "unresolved verify decision for {}",
                candidate_document_id
            ))),
        }
    }

    async fn create(&self, topic: Topic) -> Result<Document, ConsistencyError> {
        let now = Utc::now();
        let mut keywords = Vec::new();
        union_ordered(&mut keywords, topic.keywords);

        let content = if topic.content.trim().is_empty() {
            topic.summary.clone()
        } else {
            topic.content
        };

        let mut document = Document {
            id: Document::generate_id(&topic.title, now),
            title: topic.title,
            content,
            summary: topic.summary,
            category: topic.category,
            keywords,
            source_urls: topic.source_url.into_iter().collect(),
            embedding: Vec::new(),
            created_at: now,
            updated_at: now,
        };

        let chunks = self.build_chunks(&document).await?;
        let dim = chunk_dimension(&chunks);
        document.embedding = match topic.embedding {
            Some(vector) if is_valid_embedding(&vector, dim) => vector,
            precomputed => {
                if precomputed.is_some() {
                    debug!(document_id = %document.id, "topic embedding unusable, re-embedding");
                }
                self.embed_document(&document, dim).await.unwrap_or_default()
            }
        };

        verify_chunk_set(&document, &chunks)?;
        self.commit(&document, &chunks, None).await?;

        info!(
            document_id = %document.id,
            chunks = chunks.len(),
            "document created"
        );
        Ok(document)
    }

    async fn merge(&self, target_id: &str, topics: Vec<Topic>) -> Result<Document, ConsistencyError> {
        let _guard = self.locks.lock(target_id).await;

        let current = self
            .store
            .get_document(target_id)
            .await?
            .ok_or_else(|| ConsistencyError::DocumentNotFound(target_id.to_string()))?;

        let mut concatenated = current.content.clone();
        for topic in &topics {
            concatenated.push_str(&merge_marker(&topic.title));
            concatenated.push_str(&topic.content);
        }

        let titles: Vec<String> = topics.iter().map(|t| t.title.clone()).collect();
        let context = ReconcileContext {
            document_title: current.title.clone(),
            existing_summary: current.summary.clone(),
            topic_titles: titles.clone(),
        };

        let (content, meta) = match self.reconcile(&concatenated, &context).await {
            Some((content, meta)) if is_plausible_rewrite(&concatenated, &content) => {
                (content, meta)
            }
            Some(_) => {
                warn!(document_id = target_id, "reconciled content implausible, appending instead");
                append_only(&concatenated, &current, &titles)
            }
            None => append_only(&concatenated, &current, &titles),
        };

        let mut document = current.clone();
        document.content = content;
        if !meta.summary.trim().is_empty() {
            document.summary = meta.summary.trim().to_string();
        }
        if document.category.is_empty()
            && let Some(category) = topics.iter().map(|t| &t.category).find(|c| !c.is_empty())
        {
            document.category = category.clone();
        }
        for topic in topics {
            union_ordered(&mut document.keywords, topic.keywords);
            union_ordered(&mut document.source_urls, topic.source_url);
        }
        document.updated_at = Utc::now();

        let chunks = self.build_chunks(&document).await?;
        let dim = chunk_dimension(&chunks);
        document.embedding = match self.embed_document(&document, dim).await {
            Some(vector) => vector,
            // The stored vector still describes an unchanged summary.
            None if document.summary == current.summary
                && is_valid_embedding(&current.embedding, dim) =>
            {
                current.embedding.clone()
            }
            None => Vec::new(),
        };

        verify_chunk_set(&document, &chunks)?;

        let record = MergeHistoryRecord {
            target_document_id: document.id.clone(),
            source_topic_titles: titles,
            merge_strategy: meta.strategy,
            changes_made: meta.changes_made,
            merged_at: document.updated_at,
        };
        self.commit(&document, &chunks, Some(&record)).await?;

        info!(
            document_id = %document.id,
            topics = record.source_topic_titles.len(),
            strategy = %record.merge_strategy,
            chunks = chunks.len(),
            "document merged"
        );
        Ok(document)
    }

    async fn reconcile(
        &self,
        concatenated: &str,
        context: &ReconcileContext,
    ) -> Option<(String, ReconcileMeta)> {
        match timeout(
            self.provider_timeout,
            self.reconciler.reconcile(concatenated, context),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => {
                warn!(document = %context.document_title, "reconciliation timed out");
                None
            }
        }
    }

    async fn embed_document(&self, document: &Document, dim: Option<usize>) -> Option<Vec<f32>> {
        let text = document.embedding_text();
        match timeout(self.provider_timeout, self.embedder.embed(&text)).await {
            Ok(Some(vector)) if is_valid_embedding(&vector, dim) => Some(vector),
            Ok(_) => {
                warn!(document_id = %document.id, "document embedding unavailable");
                None
            }
            Err(_) => {
                warn!(document_id = %document.id, "document embedding timed out");
                None
            }
        }
    }

    /// Chunk the document's content and embed every chunk. Chunks that fail to
    /// embed, or come back with an unusable vector, are dropped and the rest
    /// renumbered; losing all of them is fatal.
    async fn build_chunks(&self, document: &Document) -> Result<Vec<Chunk>, ConsistencyError> {
        let pieces = self.chunker.chunk(&document.content);
        if pieces.is_empty() {
            return Ok(Vec::new());
        }

        let mut embedded = Vec::with_capacity(pieces.len());
        for batch in pieces.chunks(self.batch_size) {
            let texts: Vec<&str> = batch.iter().map(|p| p.content.as_str()).collect();
            let vectors = match timeout(self.provider_timeout, self.embedder.embed_batch(&texts)).await
            {
                Ok(vectors) if vectors.len() == batch.len() => vectors,
                Ok(vectors) => {
                    warn!(
                        expected = batch.len(),
                        found = vectors.len(),
                        "embedder returned wrong batch size"
                    );
                    vec![None; batch.len()]
                }
                Err(_) => {
                    warn!(size = batch.len(), "chunk embedding timed out");
                    vec![None; batch.len()]
                }
            };
            embedded.extend(batch.iter().zip(vectors));
        }

        let attempted = pieces.len();
        let dim = self.dimension.or_else(|| {
            dominant_dimension(
                embedded
                    .iter()
                    .filter_map(|(_, vector)| vector.as_deref())
                    .filter(|v| is_valid_embedding(v, None))
                    .map(<[f32]>::len),
            )
        });
        let chunks: Vec<Chunk> = embedded
            .into_iter()
            .filter_map(|(piece, vector)| match vector {
                Some(v) if is_valid_embedding(&v, dim) => Some((piece, v)),
                _ => None,
            })
            .enumerate()
            .map(|(idx, (piece, vector))| {
                Chunk::new(
                    &document.id,
                    idx as u32,
                    piece.content.clone(),
                    piece.token_count,
                    vector,
                )
            })
            .collect();

        if chunks.is_empty() {
            return Err(ConsistencyViolation::NoEmbeddedChunks {
                document_id: document.id.clone(),
                attempted,
            }
            .into());
        }
        if chunks.len() < attempted {
            warn!(
                document_id = %document.id,
                dropped = attempted - chunks.len(),
                kept = chunks.len(),
                "dropped chunks that failed to embed"
            );
        }
        Ok(chunks)
    }

    async fn commit(
        &self,
        document: &Document,
        chunks: &[Chunk],
        record: Option<&MergeHistoryRecord>,
    ) -> Result<(), ConsistencyError> {
        let mut tx = self.store.begin().await?;

        let staged: Result<(), StoreError> = async {
            tx.upsert_document(document).await?;
            tx.replace_chunks(&document.id, chunks).await?;
            if let Some(record) = record {
                tx.append_merge_history(record).await?;
            }
            Ok(())
        }
        .await;

        if let Err(e) = staged {
            error!(document_id = %document.id, error = %e, "write failed, rolling back");
            if let Err(rollback) = tx.rollback().await {
                warn!(document_id = %document.id, error = %rollback, "rollback failed");
            }
            return Err(e.into());
        }

        tx.commit().await.map_err(|e| {
            error!(document_id = %document.id, error = %e, "commit failed");
            ConsistencyError::from(e)
        })
    }
}

fn chunk_dimension(chunks: &[Chunk]) -> Option<usize> {
    chunks.first().map(|c| c.embedding.len())
}

/// Most common vector length; ties go to the length seen first.
fn dominant_dimension(lengths: impl IntoIterator<Item = usize>) -> Option<usize> {
    let mut counts: Vec<(usize, usize)> = Vec::new();
    for len in lengths {
        match counts.iter_mut().find(|(seen, _)| *seen == len) {
            Some((_, n)) => *n += 1,
            None => counts.push((len, 1)),
        }
    }
    counts
        .into_iter()
        .fold(None, |best: Option<(usize, usize)>, (len, n)| match best {
            Some((_, top)) if n <= top => best,
            _ => Some((len, n)),
        })
        .map(|(len, _)| len)
}

fn append_only(
    concatenated: &str,
    current: &Document,
    titles: &[String],
) -> (String, ReconcileMeta) {
    (
        concatenated.to_string(),
        ReconcileMeta {
            strategy: MergeStrategy::AppendOnly,
            summary: current.summary.clone(),
            changes_made: format!("appended {} topic(s): {}", titles.len(), titles.join(", ")),
        },
    )
}
