//! The Memory Manager facade: the one entry point most callers use,
//! resolving request-shape aliases before anything reaches `store` or
//! `retriever`.

use std::time::Instant;

use crate::config::Config;
use crate::enrich::{enrich_or_default, Enricher, HeuristicEnricher};
use crate::error::Result;
use crate::events::{EventSink, NoopEventSink};
use crate::policy::{PolicyExecutor, PolicyRunReport};
use crate::retriever::{Query, Retriever, Scope, ScoredRecord};
use crate::store::{ListFilter, MetadataFilter, NewMemory, StorageBackend};
use crate::text::{summarizer_from_config, trimmer_from_config};
use crate::types::{MemoryId, MemoryRecord, Metadata, Tier};

/// Minimal stand-in for the out-of-scope Auth/RBAC layer: the Manager
/// accepts this only to decide whether `Scope::Global` is allowed, never to
/// issue or validate tokens itself.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capability {
    global_scope: bool,
}

impl Capability {
    pub const NONE: Capability = Capability { global_scope: false };
    pub const GLOBAL_SCOPE: Capability = Capability { global_scope: true };

    pub fn allows_global(&self) -> bool {
        self.global_scope
    }
}

/// Input to [`MemoryManager::save`]. `message` is an alias for `content`;
/// when both are given, `content` wins.
#[derive(Debug, Clone, Default)]
pub struct SaveRequest {
    pub user_id: String,
    pub namespace: Option<String>,
    pub thread_id: Option<String>,
    pub session_id: Option<String>,
    pub content: Option<String>,
    pub message: Option<String>,
    pub metadata: Metadata,
    pub tier: Option<Tier>,
}

impl SaveRequest {
    fn resolved_content(&self) -> Result<String> {
        self.content
            .clone()
            .or_else(|| self.message.clone())
            .ok_or_else(|| crate::error::MemoricError::InvalidArgument("save request requires content or message".to_string()))
    }
}

/// Input to [`MemoryManager::retrieve`]. `max_results` is an alias for
/// `top_k`; `top_k` wins when both are given.
#[derive(Debug, Clone, Default)]
pub struct RetrieveRequest {
    pub user_id: String,
    pub scope: Option<Scope>,
    /// Namespace a `Scope::Global` request is restricted to; defaults to
    /// the global namespace. Ignored by every other scope.
    pub namespace: Option<String>,
    pub thread_id: Option<String>,
    pub topic: Option<String>,
    pub entities: Vec<String>,
    pub metadata: MetadataFilter,
    pub top_k: Option<usize>,
    pub max_results: Option<usize>,
    pub include_summarized: bool,
}

impl RetrieveRequest {
    fn resolved_limit(&self, default_top_k: usize) -> usize {
        self.top_k.or(self.max_results).unwrap_or(default_top_k)
    }
}

fn default_scope(config: &crate::config::RetrievalConfig) -> Scope {
    match config.scope {
        crate::config::ScopeKind::Thread => Scope::Thread,
        crate::config::ScopeKind::Topic => Scope::Topic,
        crate::config::ScopeKind::User => Scope::User,
        crate::config::ScopeKind::Global => Scope::Global,
    }
}

/// The most common `topic` metadata value across a result set, used as the
/// aggregate topic in [`RetrievedContext`] when the caller didn't request one.
fn dominant_topic(results: &[ScoredRecord]) -> Option<String> {
    let mut counts: std::collections::HashMap<&str, usize> = std::collections::HashMap::new();
    for scored in results {
        if let Some(topic) = scored
            .record
            .metadata
            .get(crate::types::reserved_keys::TOPIC)
            .and_then(|v| v.as_str())
        {
            *counts.entry(topic).or_insert(0) += 1;
        }
    }
    counts.into_iter().max_by_key(|(_, count)| *count).map(|(topic, _)| topic.to_string())
}

/// Structured result of [`MemoryManager::retrieve_context`].
#[derive(Debug, Clone, Default)]
pub struct RetrievedContext {
    pub thread_context: Vec<String>,
    pub related_history: Vec<String>,
    pub metadata: RetrieveContextMetadata,
}

/// Aggregate metadata accompanying a [`RetrievedContext`].
#[derive(Debug, Clone, Default)]
pub struct RetrieveContextMetadata {
    pub thread_id: Option<String>,
    pub user_id: String,
    pub topic: Option<String>,
    pub total_memories: usize,
    pub thread_memories: usize,
    pub related_memories: usize,
}

/// Facade over the Store, Retriever, Policy Executor, Enricher, and Text
/// Processors. This is the type most callers construct directly.
pub struct MemoryManager<'a> {
    store: &'a dyn StorageBackend,
    config: Config,
    enricher: Box<dyn Enricher>,
    events: Box<dyn EventSink>,
}

impl<'a> MemoryManager<'a> {
    pub fn new(store: &'a dyn StorageBackend, config: Config) -> Self {
        Self {
            store,
            config,
            enricher: Box::new(HeuristicEnricher::new()),
            events: Box::new(NoopEventSink),
        }
    }

    pub fn with_enricher(mut self, enricher: Box<dyn Enricher>) -> Self {
        self.enricher = enricher;
        self
    }

    pub fn with_event_sink(mut self, events: Box<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Creates a record, running metadata enrichment first.
    /// Enrichment failure never blocks the save — it degrades to the
    /// caller-supplied metadata unchanged.
    pub fn save(&self, request: SaveRequest) -> Result<MemoryRecord> {
        let content = request.resolved_content()?;
        let metadata = if self.config.enrichment.enabled {
            enrich_or_default(self.enricher.as_ref(), &content, &request.metadata)
        } else {
            request.metadata
        };

        self.store.create(NewMemory {
            user_id: request.user_id,
            namespace: request.namespace.unwrap_or_else(crate::types::default_namespace),
            thread_id: request.thread_id,
            session_id: request.session_id,
            content,
            metadata,
            tier: request.tier.unwrap_or_default(),
            related_threads: Vec::new(),
        })
    }

    /// Retrieves scored records via the five-step pipeline.
    pub fn retrieve(&self, request: RetrieveRequest, capability: Capability) -> Result<Vec<ScoredRecord>> {
        let retriever = Retriever::new(self.store, self.config.scoring.clone(), self.config.retrieval.clone());
        let limit = request.resolved_limit(self.config.retrieval.default_top_k);
        let query = Query {
            user_id: request.user_id,
            scope: request.scope.unwrap_or_else(|| default_scope(&self.config.retrieval)),
            namespace: request.namespace.unwrap_or_else(crate::types::default_namespace),
            thread_id: request.thread_id,
            topic: request.topic,
            entities: request.entities,
            metadata: request.metadata,
            limit,
            include_summarized: request.include_summarized || self.config.retrieval.include_summarized,
            allow_global: capability.allows_global(),
        };
        retriever.retrieve(&query)
    }

    /// Calls `retrieve`, then partitions the results into `thread_context`
    /// (records belonging to the requested thread) and `related_history`
    /// (everything else in scope), for assembling an LLM prompt.
    pub fn retrieve_context(&self, request: RetrieveRequest, capability: Capability) -> Result<RetrievedContext> {
        let requested_thread_id = request.thread_id.clone();
        let user_id = request.user_id.clone();
        let requested_topic = request.topic.clone();
        let results = self.retrieve(request, capability)?;

        let mut thread_context = Vec::new();
        let mut related_history = Vec::new();
        for scored in &results {
            let in_thread = requested_thread_id.is_some() && scored.record.thread_id == requested_thread_id;
            if in_thread {
                thread_context.push(scored.record.content.clone());
            } else {
                related_history.push(scored.record.content.clone());
            }
        }

        let topic = requested_topic.or_else(|| dominant_topic(&results));
        let metadata = RetrieveContextMetadata {
            thread_id: requested_thread_id,
            user_id,
            topic,
            total_memories: results.len(),
            thread_memories: thread_context.len(),
            related_memories: related_history.len(),
        };

        Ok(RetrievedContext {
            thread_context,
            related_history,
            metadata,
        })
    }

    /// Runs all policy phases for every user, batched, deadline-aware.
    pub fn run_policies(&self, deadline: Option<Instant>) -> PolicyRunReport {
        let executor = PolicyExecutor::new(
            self.store,
            self.config.policies.clone(),
            self.config.tiers.clone(),
            trimmer_from_config(&self.config.trimmer),
            summarizer_from_config(&self.config.summarizer),
            self.events.as_ref(),
        );
        executor.run(deadline)
    }

    /// Forward-only tier promotion for a single record.
    pub fn promote_tier(&self, user_id: &str, id: MemoryId, target: Tier) -> Result<MemoryRecord> {
        let mut record = self
            .store
            .get(user_id, id)?
            .ok_or_else(|| crate::error::MemoricError::NotFound(format!("memory {id} not found")))?;
        record.promote_to(target)?;
        record.updated_at = chrono::Utc::now();
        self.store.update(&record)?;
        Ok(record)
    }

    /// Runs only the cluster-rebuild phase for one user, bypassing the
    /// other four phases — useful for callers that want fresh clusters
    /// without paying for a full policy run.
    pub fn rebuild_clusters(&self, user_id: &str) -> Result<usize> {
        let executor = PolicyExecutor::new(
            self.store,
            self.config.policies.clone(),
            self.config.tiers.clone(),
            trimmer_from_config(&self.config.trimmer),
            summarizer_from_config(&self.config.summarizer),
            self.events.as_ref(),
        );
        let mut report = PolicyRunReport::default();
        executor.rebuild_clusters(user_id, &mut report)?;
        Ok(report.clustered)
    }

    pub fn get_tier_stats(&self, user_id: &str) -> Result<TierStats> {
        let short_term = self.store.count_by_tier(user_id, Tier::ShortTerm)?;
        let mid_term = self.store.count_by_tier(user_id, Tier::MidTerm)?;
        let long_term = self.store.count_by_tier(user_id, Tier::LongTerm)?;
        Ok(TierStats {
            short_term,
            mid_term,
            long_term,
            short_term_utilization: self.utilization(Tier::ShortTerm, short_term),
            mid_term_utilization: self.utilization(Tier::MidTerm, mid_term),
            long_term_utilization: self.utilization(Tier::LongTerm, long_term),
        })
    }

    /// `count / capacity` for a tier with a configured capacity; `None` when
    /// the tier has no capacity limit.
    fn utilization(&self, tier: Tier, count: usize) -> Option<f64> {
        let capacity = self.config.tier_settings(tier)?.capacity?;
        if capacity == 0 {
            return Some(f64::INFINITY);
        }
        Some(count as f64 / capacity as f64)
    }

    /// Diagnostic snapshot for operational tooling: per-tier counts and
    /// utilization, the timestamp of the most recent policy run, and the
    /// current cluster count. Bypasses scoring entirely.
    pub fn inspect(&self, user_id: &str) -> Result<InspectionReport> {
        let tier_stats = self.get_tier_stats(user_id)?;
        let cluster_count = self.store.list_clusters(user_id)?.len();
        // `run_policies` logs its completion under the "system" user_id,
        // since one run spans every user rather than this one.
        let last_policy_run = self
            .store
            .recent_events("system", 50)?
            .into_iter()
            .find(|event| event.kind == crate::types::EventKind::PolicyRun)
            .map(|event| event.timestamp);
        Ok(InspectionReport {
            tier_stats,
            last_policy_run,
            cluster_count,
        })
    }

    /// Lists a user's records as stored, bypassing scoring — the underlying
    /// accessor `inspect()`'s diagnostic snapshot is built on top of.
    pub fn list_records(&self, user_id: &str, filter: ListFilter) -> Result<Vec<MemoryRecord>> {
        self.store.list(user_id, &filter)
    }
}

/// Per-tier record counts and capacity utilization for a user.
#[derive(Debug, Clone, Copy, Default)]
pub struct TierStats {
    pub short_term: usize,
    pub mid_term: usize,
    pub long_term: usize,
    pub short_term_utilization: Option<f64>,
    pub mid_term_utilization: Option<f64>,
    pub long_term_utilization: Option<f64>,
}

/// Result of [`MemoryManager::inspect`].
#[derive(Debug, Clone, Default)]
pub struct InspectionReport {
    pub tier_stats: TierStats,
    pub last_policy_run: Option<chrono::DateTime<chrono::Utc>>,
    pub cluster_count: usize,
}
