//! Embedding client for generating text embeddings.

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

use super::provider::Embedder;
use super::rate_limit::RateLimiter;
use super::similarity::is_valid_embedding;
use crate::error::EmbeddingError;
use crate::models::EmbeddingConfig;
use crate::utils::{RetryConfig, with_retry};

/// Request body for the `/api/embed` endpoint.
#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [&'a str],
    truncate: bool,
}

/// Client for interacting with the embedding server.
#[derive(Debug, Clone)]
pub struct EmbeddingClient {
    client: Client,
    base_url: String,
    model: String,
    batch_size: usize,
    dimension: usize,
    limiter: RateLimiter,
    retry: RetryConfig,
}

impl EmbeddingClient {
    /// Create a new embedding client with the given configuration.
    pub fn new(config: &EmbeddingConfig, limiter: RateLimiter) -> Result<Self, EmbeddingError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| EmbeddingError::ConnectionError(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            batch_size: (config.batch_size as usize).max(1),
            dimension: config.dimension as usize,
            limiter,
            retry: RetryConfig::default(),
        })
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Get the base URL of the embedding server.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Embed one provider batch, retrying transient failures.
    pub async fn embed_texts(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let limiter = self.limiter.clone();
        with_retry(
            &self.retry,
            || self.embed_single_batch(texts),
            |delay| limiter.backoff(delay),
        )
        .await
    }

    async fn embed_single_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let _permit = self
            .limiter
            .acquire()
            .await
            .ok_or_else(|| EmbeddingError::ConnectionError("rate limiter closed".to_string()))?;

        let url = format!("{}/api/embed", self.base_url);
        let request = EmbedRequest {
            model: &self.model,
            input: texts,
            truncate: true,
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    EmbeddingError::Timeout
                } else if e.is_connect() {
                    EmbeddingError::ConnectionError(e.to_string())
                } else {
                    EmbeddingError::RequestError(e)
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(EmbeddingError::ServerError(format!(
                "status {}: {}",
                status, body
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| EmbeddingError::InvalidResponse(e.to_string()))?;

        let vectors = normalize_embeddings(body)?;
        if vectors.len() != texts.len() {
            return Err(EmbeddingError::InvalidResponse(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                vectors.len()
            )));
        }
        Ok(vectors)
    }

    fn validated(&self, vector: Vec<f32>) -> Option<Vec<f32>> {
        if is_valid_embedding(&vector, Some(self.dimension)) {
            Some(vector)
        } else {
            warn!(
                expected = self.dimension,
                found = vector.len(),
                "discarding invalid embedding"
            );
            None
        }
    }
}

#[async_trait]
impl Embedder for EmbeddingClient {
    async fn embed(&self, text: &str) -> Option<Vec<f32>> {
        match self.embed_texts(&[text]).await {
            Ok(vectors) => vectors.into_iter().next().and_then(|v| self.validated(v)),
            Err(e) => {
                warn!(error = %e, "embedding failed");
                None
            }
        }
    }

    async fn embed_batch(&self, texts: &[&str]) -> Vec<Option<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());

        for batch in texts.chunks(self.batch_size) {
            match self.embed_texts(batch).await {
                Ok(vectors) => out.extend(vectors.into_iter().map(|v| self.validated(v))),
                Err(e) if batch.len() > 1 => {
                    // A bad input can fail the whole request; isolate it.
                    debug!(error = %e, size = batch.len(), "batch failed, embedding one by one");
                    for text in batch {
                        out.push(self.embed(text).await);
                    }
                }
                Err(e) => {
                    warn!(error = %e, "embedding failed");
                    out.push(None);
                }
            }
        }

        out
    }
}

/// Flatten the response shapes embedding servers use into plain vectors.
///
/// Accepted: `[[f32]]`, `[f32]`, `{"embeddings": [[f32]]}`,
/// `{"embedding": [f32]}` and `{"data": [{"embedding": [f32]}]}`.
pub fn normalize_embeddings(body: Value) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    match body {
        Value::Array(items) if items.iter().all(Value::is_array) => {
            items.into_iter().map(to_vector).collect()
        }
        Value::Array(_) => Ok(vec![to_vector(body)?]),
        Value::Object(mut map) => {
            if let Some(embeddings) = map.remove("embeddings") {
                return normalize_embeddings(embeddings);
            }
            if let Some(embedding) = map.remove("embedding") {
                return Ok(vec![to_vector(embedding)?]);
            }
            if let Some(Value::Array(data)) = map.remove("data") {
                return data
                    .into_iter()
                    .map(|mut item| {
                        item.get_mut("embedding")
                            .map(Value::take)
                            .ok_or_else(|| {
                                EmbeddingError::InvalidResponse(
                                    "data item without embedding".to_string(),
                                )
                            })
                            .and_then(to_vector)
                    })
                    .collect();
            }
            Err(EmbeddingError::InvalidResponse(
                "no embeddings in response object".to_string(),
            ))
        }
        other => Err(EmbeddingError::InvalidResponse(format!(
            "unexpected response type: {}",
            other
        ))),
    }
}

fn to_vector(value: Value) -> Result<Vec<f32>, EmbeddingError> {
    let Value::Array(items) = value else {
        return Err(EmbeddingError::InvalidResponse(
            "embedding is not an array".to_string(),
        ));
    };
    items
        .iter()
        .map(|v| {
            v.as_f64().map(|f| f as f32).ok_or_else(|| {
                EmbeddingError::InvalidResponse(format!("non-numeric component: {}", v))
            })
        })
        .collect()
}
