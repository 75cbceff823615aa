//! The Retriever component: predicate build → candidate fetch →
//! containment filter → score → sort+cap.

use tracing::instrument;

use crate::config::{RetrievalConfig, ScoringConfig};
use crate::error::{MemoricError, Result};
use crate::scoring::{QueryContext, ScoringEngine};
use crate::store::{ListFilter, MetadataFilter, StorageBackend};
use crate::types::{EventKind, LifecycleEvent, MemoryRecord, Tier};

/// How far a retrieval query is allowed to range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Thread,
    Topic,
    User,
    Global,
}

/// Input to [`Retriever::retrieve`].
#[derive(Debug, Clone)]
pub struct Query {
    pub user_id: String,
    pub scope: Scope,
    /// Namespace a `Scope::Global` query is restricted to. Ignored by every
    /// other scope.
    pub namespace: String,
    pub thread_id: Option<String>,
    pub topic: Option<String>,
    pub entities: Vec<String>,
    pub metadata: MetadataFilter,
    pub limit: usize,
    pub include_summarized: bool,
    /// Whether the caller is entitled to `Scope::Global` — decided by the
    /// Manager's capability check, not by the Retriever.
    pub allow_global: bool,
}

impl Default for Query {
    fn default() -> Self {
        Self {
            user_id: String::new(),
            scope: Scope::Thread,
            namespace: crate::types::default_namespace(),
            thread_id: None,
            topic: None,
            entities: Vec::new(),
            metadata: MetadataFilter::new(),
            limit: 10,
            include_summarized: false,
            allow_global: false,
        }
    }
}

/// A record paired with its score.
#[derive(Debug, Clone)]
pub struct ScoredRecord {
    pub record: MemoryRecord,
    pub score: f64,
}

pub struct Retriever<'a> {
    store: &'a dyn StorageBackend,
    scoring: ScoringEngine,
    config: RetrievalConfig,
}

impl<'a> Retriever<'a> {
    pub fn new(store: &'a dyn StorageBackend, scoring_config: ScoringConfig, config: RetrievalConfig) -> Self {
        Self {
            store,
            scoring: ScoringEngine::new(scoring_config),
            config,
        }
    }

    fn candidate_limit(&self, limit: usize) -> usize {
        (limit * self.config.candidate_multiplier).max(self.config.candidate_floor)
    }

    fn fetch_candidates(&self, query: &Query, scope: Scope) -> Result<Vec<MemoryRecord>> {
        let mut filter = ListFilter::new();
        filter.exclude_summarized = !query.include_summarized;
        filter.limit = self.candidate_limit(query.limit);

        match scope {
            Scope::Thread => {
                filter.thread_id = query.thread_id.clone();
            }
            Scope::Topic => {
                if let Some(topic) = &query.topic {
                    filter.metadata = MetadataFilter::new().with(
                        crate::types::reserved_keys::TOPIC,
                        crate::types::MetadataValue::string(topic.clone()),
                    );
                }
            }
            Scope::User | Scope::Global => {}
        }

        if scope == Scope::Global {
            self.store.list_by_namespace(&query.namespace, &filter)
        } else {
            self.store.list(&query.user_id, &filter)
        }
    }

    /// Maps each clustered record's id to its cluster's `occurrences`. A
    /// record belonging to more than one cluster takes the largest value.
    fn occurrences_by_record(&self, user_id: &str) -> Result<std::collections::HashMap<crate::types::MemoryId, f64>> {
        let clusters = self.store.list_clusters(user_id)?;
        let mut occurrences = std::collections::HashMap::new();
        for cluster in &clusters {
            for id in &cluster.memory_ids {
                let entry = occurrences.entry(*id).or_insert(0.0_f64);
                *entry = entry.max(cluster.occurrences as f64);
            }
        }
        Ok(occurrences)
    }

    /// Runs the five-step pipeline. Thread scope with no results falls back
    /// to topic scope if configured.
    #[instrument(skip(self, query), fields(user_id = %query.user_id))]
    pub fn retrieve(&self, query: &Query) -> Result<Vec<ScoredRecord>> {
        if query.scope == Scope::Global && !query.allow_global {
            return Err(MemoricError::ScopeUnauthorized(
                "global scope requires a capability token".to_string(),
            ));
        }

        let mut candidates = self.fetch_candidates(query, query.scope)?;
        if candidates.is_empty() && query.scope == Scope::Thread {
            if let Some(fallback_scope) = self.config.fallback {
                let fallback = match fallback_scope {
                    crate::config::ScopeKind::Thread => Scope::Thread,
                    crate::config::ScopeKind::Topic => Scope::Topic,
                    crate::config::ScopeKind::User => Scope::User,
                    crate::config::ScopeKind::Global => Scope::Global,
                };
                candidates = self.fetch_candidates(query, fallback)?;
            }
        }

        let candidates: Vec<MemoryRecord> = candidates
            .into_iter()
            .filter(|record| crate::store::filter::matches(&record.metadata, &query.metadata))
            .collect();

        let ctx = QueryContext {
            query_topic: query.topic.clone(),
            query_entities: query.entities.clone(),
        };

        // `occurrences` comes from a joined cluster when the record belongs
        // to one, else the flat default of 1 applies.
        let occurrences_by_id = self.occurrences_by_record(&query.user_id)?;

        let mut scored: Vec<ScoredRecord> = candidates
            .into_iter()
            .map(|record| {
                let occurrences = occurrences_by_id.get(&record.id).copied().unwrap_or(1.0);
                let score = self.scoring.score_with_occurrences(&record, &ctx, occurrences).score;
                ScoredRecord { record, score }
            })
            .collect();

        scored.sort_by(|a, b| {
            crate::scoring::compare_scored((&a.record, a.score), (&b.record, b.score))
        });
        scored.truncate(query.limit);

        let _ = self.store.append_event(
            LifecycleEvent::new(EventKind::Retrieved, query.user_id.clone())
                .with_metadata(retrieval_event_metadata(scored.len())),
        );

        Ok(scored)
    }
}

fn retrieval_event_metadata(count: usize) -> crate::types::Metadata {
    let mut metadata = crate::types::Metadata::new();
    metadata.insert("count".to_string(), crate::types::MetadataValue::Number(count as f64));
    metadata
}

/// Scope refinement property: `|thread| <= |topic| <= |user|` for any
/// fixed query, given identical other filters.
pub fn assert_scope_refinement(thread_count: usize, topic_count: usize, user_count: usize) -> bool {
    thread_count <= topic_count && topic_count <= user_count
}
