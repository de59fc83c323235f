//! Batch ingestion: decide every topic, then apply creates and grouped merges.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::{error, info};

use super::coordinator::ConsistencyCoordinator;
use super::decision::DecisionEngine;
use crate::error::StoreError;
use crate::models::{Decision, Document, DocumentSummary, Topic};
use crate::store::Store;

/// Candidate ids standing in for documents created earlier in the same batch.
const PENDING_PREFIX: &str = "pending:";

fn pending_id(slot: usize) -> String {
    format!("{}{}", PENDING_PREFIX, slot)
}

fn pending_slot(id: &str) -> Option<usize> {
    id.strip_prefix(PENDING_PREFIX)?.parse().ok()
}

/// The final decision for one topic of a batch.
#[derive(Debug, Clone, Serialize)]
pub struct TopicDecision {
    pub title: String,
    pub decision: Decision,
    /// Title of the batch topic whose new document this topic joins.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub joins_new_document: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MergedDocument {
    pub document_id: String,
    pub topic_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestFailure {
    pub topics: Vec<String>,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestReport {
    pub decisions: Vec<TopicDecision>,
    pub created: Vec<String>,
    pub merged: Vec<MergedDocument>,
    pub failures: Vec<IngestFailure>,
}

impl IngestReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Where the decided topics of a batch go.
#[derive(Debug, Default)]
struct Plan {
    decisions: Vec<TopicDecision>,
    /// Existing target id and the topic indices merging into it, first-seen order.
    merges: Vec<(String, Vec<usize>)>,
    /// Topic index of each new document, with the topic indices that join it.
    creates: Vec<(usize, Vec<usize>)>,
}

pub struct Ingestor {
    store: Arc<dyn Store>,
    engine: DecisionEngine,
    coordinator: ConsistencyCoordinator,
}

impl Ingestor {
    pub fn new(
        store: Arc<dyn Store>,
        engine: DecisionEngine,
        coordinator: ConsistencyCoordinator,
    ) -> Self {
        Self {
            store,
            engine,
            coordinator,
        }
    }

    /// Decide every topic without writing anything.
    ///
    /// Topics decided as Create become candidates for the topics after them,
    /// so two similar new topics end up in one new document.
    pub async fn plan(&self, topics: &mut [Topic]) -> Result<Vec<TopicDecision>, StoreError> {
        Ok(self.build_plan(topics).await?.decisions)
    }

    async fn build_plan(&self, topics: &mut [Topic]) -> Result<Plan, StoreError> {
        let mut candidates = self.store.list_candidates().await?;
        let mut plan = Plan::default();
        let mut merge_slots: HashMap<String, usize> = HashMap::new();

        for idx in 0..topics.len() {
            self.engine.embed_topic(&mut topics[idx]).await;
            let topic = &topics[idx];
            let decision = self.engine.decide_final(topic, &candidates).await;
            let mut joins_new_document = None;

            match &decision {
                Decision::Merge {
                    target_document_id, ..
                } => match pending_slot(target_document_id)
                    .and_then(|slot| plan.creates.get_mut(slot))
                {
                    Some((owner, joiners)) => {
                        joins_new_document = Some(topics[*owner].title.clone());
                        joiners.push(idx);
                    }
                    None => {
                        let slot = *merge_slots
                            .entry(target_document_id.clone())
                            .or_insert_with(|| {
                                plan.merges.push((target_document_id.clone(), Vec::new()));
                                plan.merges.len() - 1
                            });
                        plan.merges[slot].1.push(idx);
                    }
                },
                Decision::Create { .. } => {
                    candidates.push(DocumentSummary {
                        id: pending_id(plan.creates.len()),
                        title: topic.title.clone(),
                        summary: topic.summary.clone(),
                        embedding: topic.embedding.clone(),
                    });
                    plan.creates.push((idx, Vec::new()));
                }
                Decision::Verify { .. } => {}
            }

            plan.decisions.push(TopicDecision {
                title: topic.title.clone(),
                decision,
                joins_new_document,
            });
        }

        Ok(plan)
    }

    /// Decide and persist a batch of topics.
    ///
    /// Each create and each merge group commits on its own; a failed group is
    /// reported and the rest of the batch still runs.
    pub async fn ingest(&self, mut topics: Vec<Topic>) -> Result<IngestReport, StoreError> {
        let plan = self.build_plan(&mut topics).await?;
        let mut slots: Vec<Option<Topic>> = topics.into_iter().map(Some).collect();
        let mut report = IngestReport {
            decisions: plan.decisions.clone(),
            ..Default::default()
        };

        for (target, members) in &plan.merges {
            let (group, titles) = take_topics(&mut slots, members);
            let decision = merge_decision(&plan.decisions, members, target);
            match self.coordinator.apply(decision, group, None).await {
                Ok(doc) => report.merged.push(MergedDocument {
                    document_id: doc.id,
                    topic_count: titles.len(),
                }),
                Err(e) => {
                    error!(target = %target, error = %e, "merge failed");
                    report.failures.push(IngestFailure {
                        topics: titles,
                        error: e.to_string(),
                    });
                }
            }
        }

        for (owner, joiners) in &plan.creates {
            let (group, titles) = take_topics(&mut slots, &[*owner]);
            let created = match self
                .coordinator
                .apply(plan.decisions[*owner].decision.clone(), group, None)
                .await
            {
                Ok(doc) => doc,
                Err(e) => {
                    error!(error = %e, "create failed");
                    let mut topics = titles;
                    topics.extend(joiners.iter().map(|&i| plan.decisions[i].title.clone()));
                    report.failures.push(IngestFailure {
                        topics,
                        error: e.to_string(),
                    });
                    continue;
                }
            };
            report.created.push(created.id.clone());

            if !joiners.is_empty() {
                self.merge_joiners(&mut slots, &plan, joiners, created, &mut report)
                    .await;
            }
        }

        info!(
            created = report.created.len(),
            merged = report.merged.len(),
            failed = report.failures.len(),
            "ingest finished"
        );
        Ok(report)
    }

    async fn merge_joiners(
        &self,
        slots: &mut [Option<Topic>],
        plan: &Plan,
        joiners: &[usize],
        created: Document,
        report: &mut IngestReport,
    ) {
        let (group, titles) = take_topics(slots, joiners);
        let decision = merge_decision(&plan.decisions, joiners, &created.id);
        let id = created.id.clone();
        match self.coordinator.apply(decision, group, Some(created)).await {
            Ok(_) => report.merged.push(MergedDocument {
                document_id: id,
                topic_count: titles.len(),
            }),
            Err(e) => {
                error!(target = %id, error = %e, "merge into new document failed");
                report.failures.push(IngestFailure {
                    topics: titles,
                    error: e.to_string(),
                });
            }
        }
    }
}

fn take_topics(slots: &mut [Option<Topic>], indices: &[usize]) -> (Vec<Topic>, Vec<String>) {
    let topics: Vec<Topic> = indices.iter().filter_map(|&i| slots[i].take()).collect();
    let titles = topics.iter().map(|t| t.title.clone()).collect();
    (topics, titles)
}

/// One Merge decision standing for a whole group, carrying its best similarity.
fn merge_decision(decisions: &[TopicDecision], members: &[usize], target: &str) -> Decision {
    let (similarity, confidence) = members
        .iter()
        .filter_map(|&i| match &decisions[i].decision {
            Decision::Merge {
                similarity,
                confidence,
                ..
            } => Some((*similarity, *confidence)),
            _ => None,
        })
        .fold((0.0f32, 0.0f32), |(s, c), (si, ci)| (s.max(si), c.max(ci)));

    Decision::Merge {
        target_document_id: target.to_string(),
        similarity,
        confidence,
        reasoning: format!("{} topic(s) merged in one pass", members.len()),
    }
}
