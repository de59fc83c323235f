//! Boundary traits for the external embedding, reconciliation and arbitration providers.
//!
//! Every method returns `Option`: provider failures are absorbed by the
//! adapter that talks to the provider, and the core composes its own
//! fallbacks at the call site.

use async_trait::async_trait;

use crate::models::{ArbitrationResult, MergeStrategy};

#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Option<Vec<f32>>;

    /// Embed many texts; the result has the same length and order as `texts`,
    /// with `None` where that text alone failed.
    async fn embed_batch(&self, texts: &[&str]) -> Vec<Option<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await);
        }
        out
    }
}

/// What the reconciler knows about the merge it is asked to tidy up.
#[derive(Debug, Clone, Default)]
pub struct ReconcileContext {
    pub document_title: String,
    pub existing_summary: String,
    pub topic_titles: Vec<String>,
}

/// Metadata returned alongside reconciled content.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconcileMeta {
    pub strategy: MergeStrategy,
    pub summary: String,
    pub changes_made: String,
}

#[async_trait]
pub trait Reconciler: Send + Sync {
    async fn reconcile(
        &self,
        concatenated: &str,
        context: &ReconcileContext,
    ) -> Option<(String, ReconcileMeta)>;
}

#[async_trait]
pub trait Arbiter: Send + Sync {
    async fn arbitrate(
        &self,
        topic_summary: &str,
        candidate_summary: &str,
        similarity: f32,
    ) -> Option<ArbitrationResult>;
}

/// Reconciler for runs without a text-generation provider: every merge is append-only.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoReconciler;

#[async_trait]
impl Reconciler for NoReconciler {
    async fn reconcile(&self, _: &str, _: &ReconcileContext) -> Option<(String, ReconcileMeta)> {
        None
    }
}

/// Arbiter for runs without a text-generation provider: the fallback rule decides.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoArbiter;

#[async_trait]
impl Arbiter for NoArbiter {
    async fn arbitrate(&self, _: &str, _: &str, _: f32) -> Option<ArbitrationResult> {
        None
    }
}
