//! Merge/create/verify classification of incoming topics.

use std::borrow::Cow;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::provider::{Arbiter, Embedder};
use super::similarity::best_match;
use crate::models::{
    CREATE_THRESHOLD, Decision, DocumentSummary, FALLBACK_MERGE_THRESHOLD, MERGE_THRESHOLD,
    Topic, Verdict,
};

pub const DEFAULT_PROVIDER_TIMEOUT: Duration = Duration::from_secs(60);

/// Classify a best-match similarity against the fixed thresholds.
pub fn classify(similarity: f32, candidate_id: &str) -> Decision {
    if similarity >= MERGE_THRESHOLD {
        Decision::Merge {
            target_document_id: candidate_id.to_string(),
            similarity,
            confidence: similarity,
            reasoning: format!("similarity {:.3} at or above merge threshold", similarity),
        }
    } else if similarity <= CREATE_THRESHOLD {
        Decision::Create {
            similarity,
            reasoning: format!("similarity {:.3} at or below create threshold", similarity),
        }
    } else {
        Decision::Verify {
            candidate_document_id: candidate_id.to_string(),
            similarity,
        }
    }
}

/// Deterministic resolution of a Verify decision when the arbiter is unavailable.
pub fn fallback_decision(candidate_id: &str, similarity: f32) -> Decision {
    if similarity >= FALLBACK_MERGE_THRESHOLD {
        Decision::Merge {
            target_document_id: candidate_id.to_string(),
            similarity,
            confidence: similarity,
            reasoning: "arbiter unavailable; fallback rule chose merge".to_string(),
        }
    } else {
        Decision::Create {
            similarity,
            reasoning: "arbiter unavailable; fallback rule chose create".to_string(),
        }
    }
}

/// Decides where each topic belongs.
#[derive(Clone)]
pub struct DecisionEngine {
    embedder: Arc<dyn Embedder>,
    arbiter: Arc<dyn Arbiter>,
    provider_timeout: Duration,
}

impl DecisionEngine {
    pub fn new(embedder: Arc<dyn Embedder>, arbiter: Arc<dyn Arbiter>) -> Self {
        Self {
            embedder,
            arbiter,
            provider_timeout: DEFAULT_PROVIDER_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, provider_timeout: Duration) -> Self {
        self.provider_timeout = provider_timeout;
        self
    }

    async fn embed_text(&self, text: &str) -> Option<Vec<f32>> {
        match timeout(self.provider_timeout, self.embedder.embed(text)).await {
            Ok(vector) => vector,
            Err(_) => {
                warn!(
                    timeout_ms = self.provider_timeout.as_millis() as u64,
                    "embedding timed out"
                );
                None
            }
        }
    }

    /// The topic's embedding: the precomputed one if present, otherwise a fresh one.
    pub async fn topic_embedding(&self, topic: &Topic) -> Option<Vec<f32>> {
        match &topic.embedding {
            Some(vector) => Some(vector.clone()),
            None => self.embed_text(&topic.embedding_text()).await,
        }
    }

    /// Compute and store the topic's embedding if it has none. Returns whether
    /// the topic carries an embedding afterwards.
    pub async fn embed_topic(&self, topic: &mut Topic) -> bool {
        if topic.embedding.is_none() {
            topic.embedding = self.embed_text(&topic.embedding_text()).await;
        }
        topic.embedding.is_some()
    }

    /// First-pass classification. May return [`Decision::Verify`].
    pub async fn decide(&self, topic: &Topic, candidates: &[DocumentSummary]) -> Decision {
        if candidates.is_empty() {
            return Decision::Create {
                similarity: 0.0,
                reasoning: "no existing documents".to_string(),
            };
        }

        let Some(query) = self.topic_embedding(topic).await else {
            warn!(topic = %topic.title, "topic embedding unavailable, creating new document");
            return Decision::Create {
                similarity: 0.0,
                reasoning: "topic embedding unavailable".to_string(),
            };
        };

        // An empty vector scores 0.0 against any query.
        let mut vectors: Vec<Cow<'_, [f32]>> = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            let vector = match &candidate.embedding {
                Some(vector) => Cow::Borrowed(vector.as_slice()),
                None => match self.embed_text(&candidate.embedding_text()).await {
                    Some(vector) => Cow::Owned(vector),
                    None => {
                        debug!(candidate = %candidate.id, "candidate embedding unavailable");
                        Cow::Owned(Vec::new())
                    }
                },
            };
            vectors.push(vector);
        }

        let (idx, similarity) =
            best_match(&query, vectors.iter().map(|v| &**v)).unwrap_or((0, 0.0));
        classify(similarity, &candidates[idx].id)
    }

    /// Settle a Verify decision through the arbiter, or the fallback rule.
    /// Final decisions pass through unchanged.
    pub async fn resolve(
        &self,
        decision: Decision,
        topic: &Topic,
        candidates: &[DocumentSummary],
    ) -> Decision {
        let Decision::Verify {
            candidate_document_id,
            similarity,
        } = decision
        else {
            return decision;
        };

        let candidate_summary = candidates
            .iter()
            .find(|c| c.id == candidate_document_id)
            .map(DocumentSummary::embedding_text)
            .unwrap_or_default();

        let verdict = timeout(
            self.provider_timeout,
            self.arbiter
                .arbitrate(&topic.embedding_text(), &candidate_summary, similarity),
        )
        .await;

        match verdict {
            Ok(Some(result)) => match result.verdict {
                Verdict::Merge => Decision::Merge {
                    target_document_id: candidate_document_id,
                    similarity,
                    confidence: result.confidence,
                    reasoning: result.reasoning,
                },
                Verdict::Create => Decision::Create {
                    similarity,
                    reasoning: result.reasoning,
                },
            },
            Ok(None) => {
                warn!(topic = %topic.title, similarity, "arbiter failed, using fallback rule");
                fallback_decision(&candidate_document_id, similarity)
            }
            Err(_) => {
                warn!(topic = %topic.title, similarity, "arbiter timed out, using fallback rule");
                fallback_decision(&candidate_document_id, similarity)
            }
        }
    }

    /// Classify and resolve: the result is always Merge or Create.
    pub async fn decide_final(&self, topic: &Topic, candidates: &[DocumentSummary]) -> Decision {
        let first = self.decide(topic, candidates).await;
        let decision = self.resolve(first, topic, candidates).await;
        info!(
            topic = %topic.title,
            action = decision.label(),
            similarity = decision.similarity(),
            "decision"
        );
        decision
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ArbitrationResult;
    use crate::services::provider::NoArbiter;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Embeds by looking the text up in a fixed table.
    struct TableEmbedder {
        table: Vec<(String, Vec<f32>)>,
        calls: AtomicUsize,
    }

    impl TableEmbedder {
        fn new(table: Vec<(&str, Vec<f32>)>) -> Self {
            Self {
                table: table
                    .into_iter()
                    .map(|(k, v)| (k.to_string(), v))
                    .collect(),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Embedder for TableEmbedder {
        async fn embed(&self, text: &str) -> Option<Vec<f32>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.table
                .iter()
                .find(|(k, _)| k == text)
                .map(|(_, v)| v.clone())
        }
    }

    struct FixedArbiter(Verdict);

    #[async_trait]
    impl Arbiter for FixedArbiter {
        async fn arbitrate(&self, _: &str, _: &str, _: f32) -> Option<ArbitrationResult> {
            Some(ArbitrationResult {
                verdict: self.0,
                confidence: 0.7,
                reasoning: "arbiter said so".to_string(),
            })
        }
    }

    struct SlowArbiter;

    #[async_trait]
    impl Arbiter for SlowArbiter {
        async fn arbitrate(&self, _: &str, _: &str, _: f32) -> Option<ArbitrationResult> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            None
        }
    }

    fn candidate(id: &str, embedding: Option<Vec<f32>>) -> DocumentSummary {
        DocumentSummary {
            id: id.to_string(),
            title: id.to_string(),
            summary: format!("summary of {}", id),
            embedding,
        }
    }

    /// A unit vector at the given cosine from `[1, 0]`.
    fn at_cosine(cos: f32) -> Vec<f32> {
        vec![cos, (1.0 - cos * cos).sqrt()]
    }

    fn topic_with(embedding: Vec<f32>) -> Topic {
        let mut topic = Topic::new("Topic", "about something", "body");
        topic.embedding = Some(embedding);
        topic
    }

    fn engine(arbiter: Arc<dyn Arbiter>) -> (DecisionEngine, Arc<TableEmbedder>) {
        let embedder = Arc::new(TableEmbedder::new(vec![]));
        (DecisionEngine::new(embedder.clone(), arbiter), embedder)
    }

    #[test]
    fn test_classify_boundaries() {
        assert!(matches!(classify(0.85, "d"), Decision::Merge { .. }));
        assert!(matches!(classify(0.4, "d"), Decision::Create { .. }));
        assert!(matches!(classify(0.41, "d"), Decision::Verify { .. }));
        assert!(matches!(classify(0.84, "d"), Decision::Verify { .. }));
        assert!(matches!(classify(1.0, "d"), Decision::Merge { .. }));
        assert!(matches!(classify(0.0, "d"), Decision::Create { .. }));
    }

    #[test]
    fn test_fallback_rule() {
        assert!(matches!(fallback_decision("d", 0.65), Decision::Merge { .. }));
        assert!(matches!(fallback_decision("d", 0.6), Decision::Create { .. }));
    }

    #[tokio::test]
    async fn test_no_candidates_creates() {
        let (engine, embedder) = engine(Arc::new(NoArbiter));
        let decision = engine.decide(&Topic::new("T", "S", "C"), &[]).await;
        assert_eq!(
            decision,
            Decision::Create {
                similarity: 0.0,
                reasoning: "no existing documents".to_string()
            }
        );
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_precomputed_embeddings_are_not_recomputed() {
        let (engine, embedder) = engine(Arc::new(NoArbiter));
        let topic = topic_with(vec![1.0, 0.0]);
        let candidates = vec![candidate("a", Some(at_cosine(0.9)))];

        let decision = engine.decide(&topic, &candidates).await;
        assert!(matches!(
            decision,
            Decision::Merge { ref target_document_id, .. } if target_document_id == "a"
        ));
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_missing_candidate_embedding_uses_embedder() {
        let embedder = Arc::new(TableEmbedder::new(vec![(
            "b. summary of b",
            vec![1.0, 0.0],
        )]));
        let engine = DecisionEngine::new(embedder.clone(), Arc::new(NoArbiter));
        let topic = topic_with(vec![1.0, 0.0]);
        let candidates = vec![candidate("a", Some(vec![0.0, 1.0])), candidate("b", None)];

        let decision = engine.decide(&topic, &candidates).await;
        assert!(matches!(
            decision,
            Decision::Merge { ref target_document_id, .. } if target_document_id == "b"
        ));
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_tie_prefers_first_candidate() {
        let (engine, _) = engine(Arc::new(NoArbiter));
        let topic = topic_with(vec![1.0, 0.0]);
        let candidates = vec![
            candidate("first", Some(vec![1.0, 0.0])),
            candidate("second", Some(vec![3.0, 0.0])),
        ];
        let decision = engine.decide(&topic, &candidates).await;
        assert!(matches!(
            decision,
            Decision::Merge { ref target_document_id, .. } if target_document_id == "first"
        ));
    }

    #[tokio::test]
    async fn test_uncertain_band_asks_arbiter() {
        let (engine, _) = engine(Arc::new(FixedArbiter(Verdict::Merge)));
        let topic = topic_with(vec![1.0, 0.0]);
        let candidates = vec![candidate("a", Some(at_cosine(0.6)))];

        let decision = engine.decide_final(&topic, &candidates).await;
        match decision {
            Decision::Merge {
                target_document_id,
                confidence,
                ..
            } => {
                assert_eq!(target_document_id, "a");
                assert_eq!(confidence, 0.7);
            }
            other => panic!("expected merge, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_arbiter_unavailable_falls_back() {
        let (engine, _) = engine(Arc::new(NoArbiter));
        let topic = topic_with(vec![1.0, 0.0]);

        let low = engine
            .decide_final(&topic, &[candidate("a", Some(at_cosine(0.6)))])
            .await;
        assert!(matches!(low, Decision::Create { .. }));

        let high = engine
            .decide_final(&topic, &[candidate("a", Some(at_cosine(0.7)))])
            .await;
        assert!(matches!(high, Decision::Merge { .. }));
    }

    #[tokio::test]
    async fn test_arbiter_timeout_falls_back() {
        let (engine, _) = engine(Arc::new(SlowArbiter));
        let engine = engine.with_timeout(Duration::from_millis(20));
        let topic = topic_with(vec![1.0, 0.0]);
        let decision = engine
            .decide_final(&topic, &[candidate("a", Some(at_cosine(0.7)))])
            .await;
        assert!(matches!(decision, Decision::Merge { .. }));
    }

    #[tokio::test]
    async fn test_unembeddable_topic_creates() {
        let (engine, _) = engine(Arc::new(NoArbiter));
        let topic = Topic::new("Unknown", "text", "body");
        let decision = engine
            .decide(&topic, &[candidate("a", Some(vec![1.0, 0.0]))])
            .await;
        assert!(matches!(decision, Decision::Create { similarity, .. } if similarity == 0.0));
    }

    #[tokio::test]
    async fn test_embed_topic_fills_once() {
        let embedder = Arc::new(TableEmbedder::new(vec![("T. S", vec![0.5, 0.5])]));
        let engine = DecisionEngine::new(embedder.clone(), Arc::new(NoArbiter));
        let mut topic = Topic::new("T", "S", "C");
        assert!(engine.embed_topic(&mut topic).await);
        assert!(engine.embed_topic(&mut topic).await);
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 1);
        assert_eq!(topic.embedding, Some(vec![0.5, 0.5]));
    }
}
