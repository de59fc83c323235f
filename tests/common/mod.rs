//! Scripted providers and fixtures shared by the integration tests.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;

use kbase::models::{ArbitrationResult, Chunk, Document, MergeStrategy, Topic, Verdict};
use kbase::services::{
    Arbiter, ConsistencyCoordinator, DecisionEngine, Embedder, Ingestor, NoReconciler,
    ReconcileContext, ReconcileMeta, Reconciler, TextChunker,
};
use kbase::store::{InMemoryStore, Store};

/// Embedder with per-text overrides and a generation counter.
///
/// Unscripted texts embed to `[1.0, generation]`, so every vector produced
/// after `bump_generation` is distinguishable from earlier ones.
#[derive(Default)]
pub struct ScriptedEmbedder {
    scripted: Mutex<HashMap<String, Vec<f32>>>,
    by_marker: Mutex<Vec<(String, Option<Vec<f32>>)>>,
    generation: AtomicU32,
    fail_all: AtomicBool,
    stall_batches: AtomicBool,
    calls: AtomicUsize,
}

impl ScriptedEmbedder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn script(&self, text: impl Into<String>, vector: Vec<f32>) {
        self.scripted.lock().unwrap().insert(text.into(), vector);
    }

    /// Answer `response` for every text containing `marker`; `None` fails it.
    pub fn script_containing(&self, marker: impl Into<String>, response: Option<Vec<f32>>) {
        self.by_marker.lock().unwrap().push((marker.into(), response));
    }

    pub fn bump_generation(&self) -> u32 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn generation(&self) -> u32 {
        self.generation.load(Ordering::SeqCst)
    }

    pub fn fail_all(&self, fail: bool) {
        self.fail_all.store(fail, Ordering::SeqCst);
    }

    /// Make `embed_batch` hang until the caller gives up.
    pub fn stall_batches(&self, stall: bool) {
        self.stall_batches.store(stall, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn vector_for(&self, text: &str) -> Option<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_all.load(Ordering::SeqCst) {
            return None;
        }
        if let Some(vector) = self.scripted.lock().unwrap().get(text) {
            return Some(vector.clone());
        }
        if let Some((_, response)) = self
            .by_marker
            .lock()
            .unwrap()
            .iter()
            .find(|(marker, _)| text.contains(marker.as_str()))
        {
            return response.clone();
        }
        Some(vec![1.0, self.generation() as f32])
    }
}

#[async_trait]
impl Embedder for ScriptedEmbedder {
    async fn embed(&self, text: &str) -> Option<Vec<f32>> {
        self.vector_for(text)
    }

    async fn embed_batch(&self, texts: &[&str]) -> Vec<Option<Vec<f32>>> {
        if self.stall_batches.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        texts.iter().map(|t| self.vector_for(t)).collect()
    }
}

/// Arbiter that answers with a fixed verdict, or is unavailable.
pub struct ScriptedArbiter {
    answer: Option<(Verdict, f32)>,
    calls: AtomicUsize,
}

impl ScriptedArbiter {
    pub fn answering(verdict: Verdict, confidence: f32) -> Arc<Self> {
        Arc::new(Self {
            answer: Some((verdict, confidence)),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn unavailable() -> Arc<Self> {
        Arc::new(Self {
            answer: None,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Arbiter for ScriptedArbiter {
    async fn arbitrate(&self, _: &str, _: &str, _: f32) -> Option<ArbitrationResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.answer.map(|(verdict, confidence)| ArbitrationResult {
            verdict,
            confidence,
            reasoning: "scripted".to_string(),
        })
    }
}

/// Reconciler that rewrites merged content into a fixed body.
pub struct RewritingReconciler {
    pub content: String,
    pub summary: String,
}

#[async_trait]
impl Reconciler for RewritingReconciler {
    async fn reconcile(
        &self,
        _concatenated: &str,
        context: &ReconcileContext,
    ) -> Option<(String, ReconcileMeta)> {
        Some((
            self.content.clone(),
            ReconcileMeta {
                strategy: MergeStrategy::Reorganize,
                summary: self.summary.clone(),
                changes_made: format!("reorganized {} topics", context.topic_titles.len()),
            },
        ))
    }
}

pub fn chunker() -> TextChunker {
    TextChunker::new(8, 40, 8)
}

pub fn coordinator(
    store: &InMemoryStore,
    embedder: Arc<ScriptedEmbedder>,
    reconciler: Arc<dyn Reconciler>,
) -> ConsistencyCoordinator {
    ConsistencyCoordinator::new(Arc::new(store.clone()), embedder, reconciler, chunker())
}

pub fn ingestor(
    store: &InMemoryStore,
    embedder: Arc<ScriptedEmbedder>,
    arbiter: Arc<dyn Arbiter>,
) -> Ingestor {
    let shared: Arc<dyn Store> = Arc::new(store.clone());
    let engine = DecisionEngine::new(embedder.clone(), arbiter);
    let coordinator =
        ConsistencyCoordinator::new(shared.clone(), embedder, Arc::new(NoReconciler), chunker());
    Ingestor::new(shared, engine, coordinator)
}

pub fn topic(title: &str) -> Topic {
    let mut topic = Topic::new(
        title,
        format!("What {} covers.", title),
        format!(
            "{} starts with a short overview. It continues with a worked example. \
             The last part lists common mistakes around {}.",
            title,
            title.to_lowercase()
        ),
    );
    topic.keywords = vec![title.to_lowercase()];
    topic.source_url = Some(format!("https://docs.example.org/{}", title.to_lowercase()));
    topic
}

/// A topic long enough to span several chunks, with `marker` in one sentence.
pub fn topic_with_marked_sentence(title: &str, marker: &str) -> Topic {
    let mut topic = topic(title);
    topic.content = format!(
        "{title} describe shared behavior across types. Implementations attach that behavior \
         to a type. Default methods save repetition in implementations. {marker} trait objects \
         erase the concrete type. Generic bounds keep dispatch static and fast. Associated \
         types name outputs tied to the trait. Supertraits require another trait first. \
         Blanket implementations cover every type meeting a bound."
    );
    topic
}

pub fn topic_with_embedding(title: &str, embedding: Vec<f32>) -> Topic {
    let mut topic = topic(title);
    topic.embedding = Some(embedding);
    topic
}

/// A stored document with a consistent chunk set built by the shared chunker.
pub fn seeded_document(store: &InMemoryStore, id: &str, embedding: Vec<f32>) -> Document {
    let now = Utc::now();
    let document = Document {
        id: id.to_string(),
        title: "Ownership".to_string(),
        content: "Every value has one owner. Ownership moves on assignment. \
                  Dropping the owner frees the value. Borrowing lends access without moving."
            .to_string(),
        summary: "How Rust tracks who owns a value.".to_string(),
        category: String::new(),
        keywords: vec!["ownership".to_string()],
        source_urls: vec!["https://docs.example.org/ownership".to_string()],
        embedding,
        created_at: now,
        updated_at: now,
    };
    let chunks: Vec<Chunk> = chunker()
        .chunk(&document.content)
        .into_iter()
        .map(|piece| {
            Chunk::new(
                &document.id,
                piece.chunk_index,
                piece.content,
                piece.token_count,
                vec![1.0, 0.0],
            )
        })
        .collect();
    store.seed(document.clone(), chunks);
    document
}
