mod common;

use std::sync::Arc;
use std::time::Duration;

use kbase::error::{ConsistencyError, ConsistencyViolation};
use kbase::models::{Decision, MergeStrategy};
use kbase::services::{NoReconciler, verify_chunk_set};
use kbase::store::{InMemoryStore, Store};

use common::{
    RewritingReconciler, ScriptedEmbedder, chunker, coordinator, seeded_document, topic,
    topic_with_embedding, topic_with_marked_sentence,
};

const MARKER: &str = "Unembeddable";

/// Chunks of `content` that do not contain the marker sentence.
fn clean_chunk_count(content: &str) -> usize {
    let pieces = chunker().chunk(content);
    let clean = pieces.iter().filter(|p| !p.content.contains(MARKER)).count();
    assert!(clean > 0 && clean < pieces.len(), "fixture must mark some chunks only");
    clean
}

fn merge_into(id: &str) -> Decision {
    Decision::Merge {
        target_document_id: id.to_string(),
        similarity: 0.9,
        confidence: 0.9,
        reasoning: "test".to_string(),
    }
}

fn create() -> Decision {
    Decision::Create {
        similarity: 0.0,
        reasoning: "test".to_string(),
    }
}

#[tokio::test]
async fn test_batched_merge_writes_one_history_record() {
    let store = InMemoryStore::new();
    let existing = seeded_document(&store, "ownership", vec![1.0, 0.0]);
    let coordinator = coordinator(&store, ScriptedEmbedder::new(), Arc::new(NoReconciler));

    let topics = vec![topic("Moves"), topic("Copies"), topic("Drops")];
    let merged = coordinator
        .apply(merge_into("ownership"), topics, Some(existing))
        .await
        .unwrap();

    let history = store.merge_history("ownership").await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(
        history[0].source_topic_titles,
        vec!["Moves".to_string(), "Copies".to_string(), "Drops".to_string()]
    );
    assert_eq!(history[0].merge_strategy, MergeStrategy::AppendOnly);
    assert!(merged.content.contains("--- Merged from: Copies ---"));
    assert_eq!(store.commit_count(), 1);
}

#[tokio::test]
async fn test_merge_unions_keywords_and_sources() {
    let store = InMemoryStore::new();
    seeded_document(&store, "ownership", vec![1.0, 0.0]);
    let coordinator = coordinator(&store, ScriptedEmbedder::new(), Arc::new(NoReconciler));

    let merged = coordinator
        .apply(merge_into("ownership"), vec![topic("Moves"), topic("Moves")], None)
        .await
        .unwrap();

    assert_eq!(merged.keywords, vec!["ownership".to_string(), "moves".to_string()]);
    assert_eq!(
        merged.source_urls,
        vec![
            "https://docs.example.org/ownership".to_string(),
            "https://docs.example.org/moves".to_string(),
        ]
    );
}

#[tokio::test]
async fn test_failed_commit_leaves_chunks_untouched() {
    let store = InMemoryStore::new();
    let existing = seeded_document(&store, "ownership", vec![1.0, 0.0]);
    let before_doc = store.get_document("ownership").await.unwrap().unwrap();
    let before_chunks = store.get_chunks("ownership").await.unwrap();
    let coordinator = coordinator(&store, ScriptedEmbedder::new(), Arc::new(NoReconciler));

    store.fail_next_commit();
    let result = coordinator
        .apply(merge_into("ownership"), vec![topic("Moves")], Some(existing))
        .await;

    assert!(matches!(result, Err(ConsistencyError::Store(_))));
    assert_eq!(store.get_chunks("ownership").await.unwrap(), before_chunks);
    assert_eq!(store.get_document("ownership").await.unwrap().unwrap(), before_doc);
    assert!(store.merge_history("ownership").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_merge_replaces_every_chunk() {
    let store = InMemoryStore::new();
    seeded_document(&store, "ownership", vec![1.0, 0.0]);
    let before = store.get_chunks("ownership").await.unwrap();
    let embedder = ScriptedEmbedder::new();
    let generation = embedder.bump_generation();
    let coordinator = coordinator(
        &store,
        embedder,
        Arc::new(RewritingReconciler {
            content: "Ownership in one page. Values have a single owner that frees them. \
                      Moves transfer ownership and copies duplicate plain data."
                .to_string(),
            summary: "Ownership, moves and copies.".to_string(),
        }),
    );

    let merged = coordinator
        .apply(merge_into("ownership"), vec![topic("Moves")], None)
        .await
        .unwrap();

    let after = store.get_chunks("ownership").await.unwrap();
    assert!(!after.is_empty());
    for chunk in &after {
        assert_eq!(chunk.embedding, vec![1.0, generation as f32]);
        assert!(merged.content.contains(&chunk.content));
        assert!(!before.contains(chunk));
    }
    verify_chunk_set(&merged, &after).unwrap();
    assert_eq!(merged.summary, "Ownership, moves and copies.");

    let history = store.merge_history("ownership").await.unwrap();
    assert_eq!(history[0].merge_strategy, MergeStrategy::Reorganize);
}

#[tokio::test]
async fn test_implausible_reconciliation_falls_back_to_append() {
    let store = InMemoryStore::new();
    seeded_document(&store, "ownership", vec![1.0, 0.0]);
    let coordinator = coordinator(
        &store,
        ScriptedEmbedder::new(),
        Arc::new(RewritingReconciler {
            content: "ok".to_string(),
            summary: "ignored".to_string(),
        }),
    );

    let merged = coordinator
        .apply(merge_into("ownership"), vec![topic("Moves")], None)
        .await
        .unwrap();

    assert!(merged.content.starts_with("Every value has one owner."));
    assert!(merged.content.contains("--- Merged from: Moves ---"));
    let history = store.merge_history("ownership").await.unwrap();
    assert_eq!(history[0].merge_strategy, MergeStrategy::AppendOnly);
}

#[tokio::test]
async fn test_total_embedding_failure_commits_nothing() {
    let store = InMemoryStore::new();
    let embedder = ScriptedEmbedder::new();
    embedder.fail_all(true);
    let coordinator = coordinator(&store, embedder, Arc::new(NoReconciler));

    let result = coordinator.apply(create(), vec![topic("Traits")], None).await;

    assert!(matches!(
        result,
        Err(ConsistencyError::Violation(
            ConsistencyViolation::NoEmbeddedChunks { .. }
        ))
    ));
    assert_eq!(store.document_count(), 0);
    assert_eq!(store.commit_count(), 0);
}

#[tokio::test]
async fn test_create_persists_document_and_chunks_together() {
    let store = InMemoryStore::new();
    let coordinator = coordinator(&store, ScriptedEmbedder::new(), Arc::new(NoReconciler));

    let created = coordinator
        .apply(create(), vec![topic("Traits")], None)
        .await
        .unwrap();

    let stored = store.get_document(&created.id).await.unwrap().unwrap();
    let chunks = store.get_chunks(&created.id).await.unwrap();
    assert_eq!(stored.title, "Traits");
    assert!(!chunks.is_empty());
    verify_chunk_set(&stored, &chunks).unwrap();
    assert!(store.merge_history(&created.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_same_title_creates_distinct_ids() {
    let store = InMemoryStore::new();
    let coordinator = coordinator(&store, ScriptedEmbedder::new(), Arc::new(NoReconciler));

    let a = coordinator.apply(create(), vec![topic("Traits")], None).await.unwrap();
    let b = coordinator.apply(create(), vec![topic("Traits")], None).await.unwrap();

    assert_ne!(a.id, b.id);
    assert_eq!(store.document_count(), 2);
}

#[tokio::test]
async fn test_cancelled_merge_leaves_no_trace() {
    let store = InMemoryStore::new();
    seeded_document(&store, "ownership", vec![1.0, 0.0]);
    let before = store.get_chunks("ownership").await.unwrap();
    let embedder = ScriptedEmbedder::new();
    embedder.stall_batches(true);
    let coordinator = coordinator(&store, embedder.clone(), Arc::new(NoReconciler));

    let attempt = tokio::time::timeout(
        Duration::from_millis(50),
        coordinator.apply(merge_into("ownership"), vec![topic("Moves")], None),
    )
    .await;
    assert!(attempt.is_err(), "merge should still be waiting on embeddings");

    assert_eq!(store.get_chunks("ownership").await.unwrap(), before);
    assert_eq!(store.commit_count(), 0);

    // The dropped attempt released the document lock.
    embedder.stall_batches(false);
    coordinator
        .apply(merge_into("ownership"), vec![topic("Moves")], None)
        .await
        .unwrap();
    assert_eq!(store.merge_history("ownership").await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_concurrent_merges_into_one_document_serialize() {
    let store = InMemoryStore::new();
    seeded_document(&store, "ownership", vec![1.0, 0.0]);
    let coordinator = coordinator(&store, ScriptedEmbedder::new(), Arc::new(NoReconciler));

    let titles = ["Moves", "Copies", "Drops", "Clones"];
    let handles: Vec<_> = titles
        .iter()
        .map(|title| {
            let coordinator = coordinator.clone();
            let topic = topic(title);
            tokio::spawn(async move {
                coordinator
                    .apply(merge_into("ownership"), vec![topic], None)
                    .await
            })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let document = store.get_document("ownership").await.unwrap().unwrap();
    for title in titles {
        assert!(
            document.content.contains(&format!("--- Merged from: {} ---", title)),
            "lost update for {}",
            title
        );
    }
    assert_eq!(store.merge_history("ownership").await.unwrap().len(), 4);
    let chunks = store.get_chunks("ownership").await.unwrap();
    verify_chunk_set(&document, &chunks).unwrap();
}

#[tokio::test]
async fn test_merge_into_missing_document_fails() {
    let store = InMemoryStore::new();
    let coordinator = coordinator(&store, ScriptedEmbedder::new(), Arc::new(NoReconciler));

    let result = coordinator
        .apply(merge_into("ghost"), vec![topic("Moves")], None)
        .await;

    assert!(matches!(result, Err(ConsistencyError::DocumentNotFound(id)) if id == "ghost"));
}

#[tokio::test]
async fn test_verify_decision_is_rejected() {
    let store = InMemoryStore::new();
    let coordinator = coordinator(&store, ScriptedEmbedder::new(), Arc::new(NoReconciler));

    let result = coordinator
        .apply(
            Decision::Verify {
                candidate_document_id: "ownership".to_string(),
                similarity: 0.6,
            },
            vec![topic("Moves")],
            None,
        )
        .await;

    assert!(matches!(result, Err(ConsistencyError::InvalidRequest(_))));
}

#[tokio::test]
async fn test_chunk_that_fails_to_embed_is_dropped() {
    let store = InMemoryStore::new();
    let embedder = ScriptedEmbedder::new();
    embedder.script_containing(MARKER, None);
    let coordinator = coordinator(&store, embedder, Arc::new(NoReconciler));

    let created = coordinator
        .apply(create(), vec![topic_with_marked_sentence("Traits", MARKER)], None)
        .await
        .unwrap();

    let stored = store.get_document(&created.id).await.unwrap().unwrap();
    let chunks = store.get_chunks(&created.id).await.unwrap();
    assert_eq!(chunks.len(), clean_chunk_count(&stored.content));
    assert!(chunks.iter().all(|c| !c.content.contains(MARKER)));
    assert!(chunks.iter().enumerate().all(|(i, c)| c.chunk_index as usize == i));
    verify_chunk_set(&stored, &chunks).unwrap();
}

#[tokio::test]
async fn test_chunk_with_unusable_vector_is_dropped() {
    let store = InMemoryStore::new();
    let embedder = ScriptedEmbedder::new();
    embedder.script_containing(MARKER, Some(Vec::new()));
    let coordinator = coordinator(&store, embedder, Arc::new(NoReconciler));

    let created = coordinator
        .apply(create(), vec![topic_with_marked_sentence("Traits", MARKER)], None)
        .await
        .unwrap();

    let stored = store.get_document(&created.id).await.unwrap().unwrap();
    let chunks = store.get_chunks(&created.id).await.unwrap();
    assert_eq!(chunks.len(), clean_chunk_count(&stored.content));
    assert!(chunks.iter().all(|c| c.embedding.len() == 2));
    verify_chunk_set(&stored, &chunks).unwrap();
}

#[tokio::test]
async fn test_chunk_of_other_dimension_is_dropped() {
    let store = InMemoryStore::new();
    let embedder = ScriptedEmbedder::new();
    embedder.script_containing(MARKER, Some(vec![0.2, 0.3, 0.4]));
    let coordinator = coordinator(&store, embedder, Arc::new(NoReconciler));

    let created = coordinator
        .apply(create(), vec![topic_with_marked_sentence("Traits", MARKER)], None)
        .await
        .unwrap();

    let chunks = store.get_chunks(&created.id).await.unwrap();
    assert_eq!(chunks.len(), clean_chunk_count(&created.content));
    verify_chunk_set(&created, &chunks).unwrap();
}

#[tokio::test]
async fn test_merge_keeps_history_when_a_chunk_is_dropped() {
    let store = InMemoryStore::new();
    seeded_document(&store, "ownership", vec![1.0, 0.0]);
    let embedder = ScriptedEmbedder::new();
    embedder.script_containing(MARKER, None);
    let coordinator = coordinator(&store, embedder, Arc::new(NoReconciler));

    let merged = coordinator
        .apply(
            merge_into("ownership"),
            vec![topic_with_marked_sentence("Traits", MARKER)],
            None,
        )
        .await
        .unwrap();

    let chunks = store.get_chunks("ownership").await.unwrap();
    assert_eq!(chunks.len(), clean_chunk_count(&merged.content));
    assert!(chunks.iter().enumerate().all(|(i, c)| c.chunk_index as usize == i));
    verify_chunk_set(&merged, &chunks).unwrap();

    let history = store.merge_history("ownership").await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].source_topic_titles, vec!["Traits".to_string()]);
}

#[tokio::test]
async fn test_precomputed_embedding_of_other_dimension_is_replaced() {
    let store = InMemoryStore::new();
    let coordinator = coordinator(&store, ScriptedEmbedder::new(), Arc::new(NoReconciler));

    let created = coordinator
        .apply(
            create(),
            vec![topic_with_embedding("Traits", vec![0.1, 0.2, 0.3])],
            None,
        )
        .await
        .unwrap();

    assert_eq!(created.embedding, vec![1.0, 0.0]);
    let chunks = store.get_chunks(&created.id).await.unwrap();
    verify_chunk_set(&created, &chunks).unwrap();
}

#[tokio::test]
async fn test_reconciliation_that_drops_most_content_falls_back_to_append() {
    let store = InMemoryStore::new();
    seeded_document(&store, "ownership", vec![1.0, 0.0]);
    let coordinator = coordinator(
        &store,
        ScriptedEmbedder::new(),
        Arc::new(RewritingReconciler {
            content: "Ownership summarized. Values have owners, and moves transfer them cleanly."
                .to_string(),
            summary: "Ownership in brief.".to_string(),
        }),
    );

    let mut long = topic("Moves");
    long.content = "A move hands the value to a new owner and invalidates the old binding. "
        .repeat(40);
    let merged = coordinator
        .apply(merge_into("ownership"), vec![long], None)
        .await
        .unwrap();

    assert!(merged.content.starts_with("Every value has one owner."));
    assert!(merged.content.contains("--- Merged from: Moves ---"));
    assert_eq!(merged.summary, "How Rust tracks who owns a value.");
    let history = store.merge_history("ownership").await.unwrap();
    assert_eq!(history[0].merge_strategy, MergeStrategy::AppendOnly);
}
