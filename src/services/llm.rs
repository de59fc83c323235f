//! Text-generation client and the reconciler/arbiter adapters built on it.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::warn;

use super::provider::{Arbiter, ReconcileContext, ReconcileMeta, Reconciler};
use super::rate_limit::RateLimiter;
use crate::error::LlmError;
use crate::models::{ArbitrationResult, LlmConfig, MergeStrategy, Verdict};
use crate::utils::{RetryConfig, truncate_chars, with_retry};

/// Request body for the `/api/generate` endpoint.
#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    format: &'a str,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

/// Client for a generate-style LLM endpoint.
#[derive(Debug, Clone)]
pub struct LlmClient {
    client: Client,
    base_url: String,
    model: String,
    limiter: RateLimiter,
    retry: RetryConfig,
}

impl LlmClient {
    pub fn new(config: &LlmConfig, limiter: RateLimiter) -> Result<Self, LlmError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| LlmError::ConnectionError(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            limiter,
            retry: RetryConfig::default(),
        })
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Generate a completion for `prompt`, retrying transient failures.
    pub async fn generate(&self, prompt: &str) -> Result<String, LlmError> {
        let limiter = self.limiter.clone();
        with_retry(
            &self.retry,
            || self.generate_once(prompt),
            |delay| limiter.backoff(delay),
        )
        .await
    }

    async fn generate_once(&self, prompt: &str) -> Result<String, LlmError> {
        let _permit = self
            .limiter
            .acquire()
            .await
            .ok_or_else(|| LlmError::ConnectionError("rate limiter closed".to_string()))?;

        let url = format!("{}/api/generate", self.base_url);
        let request = GenerateRequest {
            model: &self.model,
            prompt,
            stream: false,
            format: "json",
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Timeout
                } else if e.is_connect() {
                    LlmError::ConnectionError(e.to_string())
                } else {
                    LlmError::RequestError(e)
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::ServerError(format!("status {}: {}", status, body)));
        }

        let body: GenerateResponse = response
            .json()
            .await
            .map_err(|e| LlmError::MalformedReply(e.to_string()))?;
        Ok(body.response)
    }

    /// Generate and decode the first JSON object in the reply.
    async fn generate_json<T: DeserializeOwned>(&self, prompt: &str) -> Result<T, LlmError> {
        let reply = self.generate(prompt).await?;
        decode_reply(&reply)
    }
}

/// Decode the outermost `{...}` span of a model reply.
///
/// Models often wrap JSON in prose or code fences.
pub fn decode_reply<T: DeserializeOwned>(reply: &str) -> Result<T, LlmError> {
    let (Some(start), Some(end)) = (reply.find('{'), reply.rfind('}')) else {
        return Err(LlmError::MalformedReply(format!(
            "no JSON object in reply: {}",
            truncate_chars(reply, 80)
        )));
    };
    if end < start {
        return Err(LlmError::MalformedReply("unbalanced braces".to_string()));
    }
    serde_json::from_str(&reply[start..=end]).map_err(|e| LlmError::MalformedReply(e.to_string()))
}

#[derive(Debug, Deserialize)]
struct ReconcileReply {
    content: String,
    #[serde(default)]
    strategy: String,
    #[serde(default)]
    summary: String,
    #[serde(default)]
    changes_made: String,
}

/// Reorganizes merged content with the LLM.
#[derive(Debug, Clone)]
pub struct LlmReconciler {
    client: LlmClient,
}

impl LlmReconciler {
    pub fn new(client: LlmClient) -> Self {
        Self { client }
    }
}

fn reconcile_prompt(concatenated: &str, context: &ReconcileContext) -> String {
    format!(
        "You maintain a knowledge base document titled \"{title}\".\n\
         Its current summary: {summary}\n\
         New material from these topics was appended: {topics}.\n\
         Reorganize the text below into one coherent document without losing facts.\n\
         Reply with a JSON object with keys \"content\", \"strategy\" \
         (\"reorganize\" or \"append-only\"), \"summary\" and \"changes_made\".\n\n\
         {text}",
        title = context.document_title,
        summary = context.existing_summary,
        topics = context.topic_titles.join(", "),
        text = concatenated,
    )
}

#[async_trait]
impl Reconciler for LlmReconciler {
    async fn reconcile(
        &self,
        concatenated: &str,
        context: &ReconcileContext,
    ) -> Option<(String, ReconcileMeta)> {
        let prompt = reconcile_prompt(concatenated, context);
        match self.client.generate_json::<ReconcileReply>(&prompt).await {
            Ok(reply) => {
                let strategy = reply
                    .strategy
                    .parse::<MergeStrategy>()
                    .unwrap_or(MergeStrategy::Unknown);
                Some((
                    reply.content,
                    ReconcileMeta {
                        strategy,
                        summary: reply.summary,
                        changes_made: reply.changes_made,
                    },
                ))
            }
            Err(e) => {
                warn!(error = %e, document = %context.document_title, "reconciliation failed");
                None
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct ArbiterReply {
    decision: String,
    #[serde(default = "default_confidence")]
    confidence: f32,
    #[serde(default)]
    reasoning: String,
}

fn default_confidence() -> f32 {
    0.5
}

impl ArbiterReply {
    fn into_result(self) -> Result<ArbitrationResult, LlmError> {
        let verdict = match self.decision.trim().to_lowercase().as_str() {
            "merge" => Verdict::Merge,
            "create" => Verdict::Create,
            other => {
                return Err(LlmError::MalformedReply(format!(
                    "unknown decision: {}",
                    other
                )));
            }
        };
        Ok(ArbitrationResult {
            verdict,
            confidence: self.confidence.clamp(0.0, 1.0),
            reasoning: self.reasoning,
        })
    }
}

/// Settles topics in the uncertain similarity band with the LLM.
#[derive(Debug, Clone)]
pub struct LlmArbiter {
    client: LlmClient,
}

impl LlmArbiter {
    pub fn new(client: LlmClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Arbiter for LlmArbiter {
    async fn arbitrate(
        &self,
        topic_summary: &str,
        candidate_summary: &str,
        similarity: f32,
    ) -> Option<ArbitrationResult> {
        let prompt = format!(
            "Should the new topic be merged into the existing document, or become a new one?\n\
             New topic: {topic_summary}\n\
             Existing document: {candidate_summary}\n\
             Embedding similarity: {similarity:.3}\n\
             Reply with a JSON object with keys \"decision\" (\"merge\" or \"create\"), \
             \"confidence\" (0 to 1) and \"reasoning\"."
        );

        match self
            .client
            .generate_json::<ArbiterReply>(&prompt)
            .await
            .and_then(ArbiterReply::into_result)
        {
            Ok(result) => Some(result),
            Err(e) => {
                warn!(error = %e, similarity, "arbitration failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_reply_strips_surrounding_text() {
        let reply = "Sure! ```json\n{\"decision\": \"merge\", \"confidence\": 0.8}\n```";
        let parsed: ArbiterReply = decode_reply(reply).unwrap();
        assert_eq!(parsed.decision, "merge");
        assert_eq!(parsed.confidence, 0.8);
        assert!(parsed.reasoning.is_empty());
    }

    #[test]
    fn test_decode_reply_without_json() {
        let err = decode_reply::<ArbiterReply>("I cannot decide").unwrap_err();
        assert!(matches!(err, LlmError::MalformedReply(_)));
    }

    #[test]
    fn test_arbiter_reply_verdicts() {
        let reply: ArbiterReply =
            decode_reply(r#"{"decision": "Create", "confidence": 3.0, "reasoning": "new"}"#)
                .unwrap();
        let result = reply.into_result().unwrap();
        assert_eq!(result.verdict, Verdict::Create);
        assert_eq!(result.confidence, 1.0);

        let reply: ArbiterReply = decode_reply(r#"{"decision": "maybe"}"#).unwrap();
        assert!(reply.into_result().is_err());
    }

    #[test]
    fn test_reconcile_reply_defaults() {
        let reply: ReconcileReply = decode_reply(r#"{"content": "merged text"}"#).unwrap();
        assert_eq!(reply.content, "merged text");
        assert_eq!(
            reply.strategy.parse::<MergeStrategy>().unwrap(),
            MergeStrategy::Unknown
        );
    }

    #[test]
    fn test_reconcile_prompt_mentions_topics() {
        let context = ReconcileContext {
            document_title: "Ownership".to_string(),
            existing_summary: "Who frees memory".to_string(),
            topic_titles: vec!["Moves".to_string(), "Borrows".to_string()],
        };
        let prompt = reconcile_prompt("body", &context);
        assert!(prompt.contains("Moves, Borrows"));
        assert!(prompt.ends_with("body"));
    }

    #[tokio::test]
    async fn test_unreachable_server_yields_none() {
        let config = LlmConfig {
            url: "http://127.0.0.1:9".to_string(),
            timeout_secs: 2,
            ..Default::default()
        };
        let client = LlmClient::new(&config, RateLimiter::unlimited())
            .unwrap()
            .with_retry(RetryConfig::new(1));
        let arbiter = LlmArbiter::new(client);
        assert!(arbiter.arbitrate("a", "b", 0.6).await.is_none());
    }
}
