//! PostgreSQL store: transactional writes over `sqlx`, reads through `psql`.

use async_trait::async_trait;
use pgvector::Vector;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, Transaction as SqlxTransaction};
use std::time::Duration;
use tracing::{debug, info};

use super::psql::PsqlClient;
use super::{Store, Transaction};
use crate::error::StoreError;
use crate::models::{Chunk, Document, DocumentSummary, MergeHistoryRecord, StoreConfig};

pub struct PgStore {
    pool: PgPool,
    reader: PsqlClient,
    embedding_dim: u32,
}

impl PgStore {
    pub async fn connect(config: &StoreConfig, embedding_dim: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.pool_max)
            .acquire_timeout(Duration::from_secs(config.pool_acquire_timeout.into()))
            .connect(&config.url)
            .await
            .map_err(|e| StoreError::ConnectionError(e.to_string()))?;

        Ok(Self {
            pool,
            reader: PsqlClient::new(&config.psql_bin, &config.url),
            embedding_dim,
        })
    }

    pub fn reader(&self) -> &PsqlClient {
        &self.reader
    }

    async fn check_pgvector_extension(&self) -> Result<(), StoreError> {
        let result: Option<(String,)> =
            sqlx::query_as("SELECT extname FROM pg_extension WHERE extname = 'vector'")
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| StoreError::PostgresError(e.to_string()))?;

        if result.is_none() {
            return Err(StoreError::PgVectorExtensionError(
                "pgvector extension is not installed. Run: CREATE EXTENSION vector;".to_string(),
            ));
        }

        Ok(())
    }

    /// Create the `documents`, `chunks` and `merge_history` tables if missing.
    pub async fn create_schema(&self) -> Result<(), StoreError> {
        self.check_pgvector_extension().await?;

        let statements = [
            format!(
                r#"
                CREATE TABLE IF NOT EXISTS documents (
                    id TEXT PRIMARY KEY,
                    title TEXT NOT NULL,
                    content TEXT NOT NULL,
                    summary TEXT NOT NULL DEFAULT '',
                    category TEXT NOT NULL DEFAULT '',
                    keywords TEXT[] NOT NULL DEFAULT '{{}}',
                    source_urls TEXT[] NOT NULL DEFAULT '{{}}',
                    embedding vector({dim}),
                    created_at TIMESTAMPTZ NOT NULL,
                    updated_at TIMESTAMPTZ NOT NULL
                )
                "#,
                dim = self.embedding_dim
            ),
            format!(
                r#"
                CREATE TABLE IF NOT EXISTS chunks (
                    id TEXT PRIMARY KEY,
                    document_id TEXT NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
                    chunk_index INTEGER NOT NULL,
                    content TEXT NOT NULL,
                    token_count INTEGER NOT NULL,
                    checksum TEXT NOT NULL,
                    embedding vector({dim}) NOT NULL,
                    UNIQUE (document_id, chunk_index)
                )
                "#,
                dim = self.embedding_dim
            ),
            r#"
            CREATE TABLE IF NOT EXISTS merge_history (
                id BIGSERIAL PRIMARY KEY,
                target_document_id TEXT NOT NULL REFERENCES documents(id),
                source_topic_titles TEXT[] NOT NULL,
                merge_strategy TEXT NOT NULL,
                changes_made TEXT NOT NULL DEFAULT '',
                merged_at TIMESTAMPTZ NOT NULL
            )
            "#
            .to_string(),
            "CREATE INDEX IF NOT EXISTS chunks_embedding_idx ON chunks USING hnsw (embedding vector_cosine_ops)"
                .to_string(),
            "CREATE INDEX IF NOT EXISTS merge_history_target_idx ON merge_history (target_document_id)"
                .to_string(),
        ];

        for sql in &statements {
            sqlx::query(sql)
                .execute(&self.pool)
                .await
                .map_err(|e| StoreError::PostgresError(e.to_string()))?;
        }

        info!(dimension = self.embedding_dim, "schema ready");
        Ok(())
    }
}

#[async_trait]
impl Store for PgStore {
    async fn begin(&self) -> Result<Box<dyn Transaction>, StoreError> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::ConnectionError(e.to_string()))?;
        Ok(Box::new(PgTransaction { tx }))
    }

    async fn list_candidates(&self) -> Result<Vec<DocumentSummary>, StoreError> {
        self.reader.list_summaries().await
    }

    async fn get_document(&self, id: &str) -> Result<Option<Document>, StoreError> {
        self.reader.fetch_document(id).await
    }

    async fn get_chunks(&self, document_id: &str) -> Result<Vec<Chunk>, StoreError> {
        self.reader.fetch_chunks(document_id).await
    }

    async fn merge_history(
        &self,
        document_id: &str,
    ) -> Result<Vec<MergeHistoryRecord>, StoreError> {
        self.reader.fetch_history(document_id).await
    }
}

/// A database transaction; dropping it uncommitted rolls it back.
pub struct PgTransaction {
    tx: SqlxTransaction<'static, Postgres>,
}

fn optional_vector(values: &[f32]) -> Option<Vector> {
    (!values.is_empty()).then(|| Vector::from(values.to_vec()))
}

#[async_trait]
impl Transaction for PgTransaction {
    async fn upsert_document(&mut self, document: &Document) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO documents (id, title, content, summary, category, keywords,
                                   source_urls, embedding, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (id) DO UPDATE SET
                title = EXCLUDED.title,
                content = EXCLUDED.content,
                summary = EXCLUDED.summary,
                category = EXCLUDED.category,
                keywords = EXCLUDED.keywords,
                source_urls = EXCLUDED.source_urls,
                embedding = EXCLUDED.embedding,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(&document.id)
        .bind(&document.title)
        .bind(&document.content)
        .bind(&document.summary)
        .bind(&document.category)
        .bind(&document.keywords)
        .bind(&document.source_urls)
        .bind(optional_vector(&document.embedding))
        .bind(document.created_at)
        .bind(document.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| StoreError::PostgresError(e.to_string()))?;

        Ok(())
    }

    async fn replace_chunks(
        &mut self,
        document_id: &str,
        chunks: &[Chunk],
    ) -> Result<(), StoreError> {
        let deleted = sqlx::query("DELETE FROM chunks WHERE document_id = $1")
            .bind(document_id)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| StoreError::PostgresError(e.to_string()))?;

        for chunk in chunks {
            sqlx::query(
                r#"
                INSERT INTO chunks (id, document_id, chunk_index, content, token_count,
                                    checksum, embedding)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(&chunk.id)
            .bind(&chunk.document_id)
            .bind(chunk.chunk_index as i32)
            .bind(&chunk.content)
            .bind(chunk.token_count as i32)
            .bind(&chunk.checksum)
            .bind(Vector::from(chunk.embedding.clone()))
            .execute(&mut *self.tx)
            .await
            .map_err(|e| StoreError::PostgresError(e.to_string()))?;
        }

        debug!(
            document_id,
            deleted = deleted.rows_affected(),
            inserted = chunks.len(),
            "chunks replaced"
        );
        Ok(())
    }

    async fn append_merge_history(&mut self, record: &MergeHistoryRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO merge_history (target_document_id, source_topic_titles,
                                       merge_strategy, changes_made, merged_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(&record.target_document_id)
        .bind(&record.source_topic_titles)
        .bind(record.merge_strategy.to_string())
        .bind(&record.changes_made)
        .bind(record.merged_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| StoreError::PostgresError(e.to_string()))?;

        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx
            .commit()
            .await
            .map_err(|e| StoreError::CommitFailed(e.to_string()))
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.tx
            .rollback()
            .await
            .map_err(|e| StoreError::PostgresError(e.to_string()))
    }
}
