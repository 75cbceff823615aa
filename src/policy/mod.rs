//! The Policy Executor: five ordered, idempotent, per-user
//! fault-isolated phases — migrate, trim, summarize, thread-summarize,
//! cluster rebuild.

use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Instant;

use chrono::Utc;
use tracing::{error, warn};

use crate::config::{PolicyConfig, TierSettings};
use crate::events::EventSink;
use crate::store::{ListFilter, StorageBackend};
use crate::text::{Summarizer, Trimmer};
use crate::types::{reserved_keys, EventKind, LifecycleEvent, MemoryCluster, MemoryRecord, MetadataValue, Tier};

/// All tiers in lifecycle order, for phases that iterate "for each tier".
const TIERS: [Tier; 3] = [Tier::ShortTerm, Tier::MidTerm, Tier::LongTerm];

/// Outcome of a single [`PolicyExecutor::run`] call.
#[derive(Debug, Clone, Default)]
pub struct PolicyRunReport {
    pub migrated: usize,
    pub trimmed: usize,
    pub summarized: usize,
    pub thread_summarized: usize,
    pub clustered: usize,
    /// True when the deadline was hit before every user/phase completed.
    pub partial: bool,
}

/// Serializes concurrent policy runs for the same user; different users
/// proceed in parallel. Not required for correctness (every phase is
/// idempotent) but avoids duplicate work.
#[derive(Default)]
struct UserLocks {
    locked: Mutex<HashSet<String>>,
}

impl UserLocks {
    fn try_acquire(&self, user_id: &str) -> bool {
        self.locked.lock().unwrap_or_else(|e| e.into_inner()).insert(user_id.to_string())
    }

    fn release(&self, user_id: &str) {
        self.locked.lock().unwrap_or_else(|e| e.into_inner()).remove(user_id);
    }
}

pub struct PolicyExecutor<'a> {
    store: &'a dyn StorageBackend,
    config: PolicyConfig,
    tiers: Vec<TierSettings>,
    trimmer: Box<dyn Trimmer>,
    summarizer: Box<dyn Summarizer>,
    events: &'a dyn EventSink,
    locks: UserLocks,
}

impl<'a> PolicyExecutor<'a> {
    pub fn new(
        store: &'a dyn StorageBackend,
        config: PolicyConfig,
        tiers: Vec<TierSettings>,
        trimmer: Box<dyn Trimmer>,
        summarizer: Box<dyn Summarizer>,
        events: &'a dyn EventSink,
    ) -> Self {
        Self {
            store,
            config,
            tiers,
            trimmer,
            summarizer,
            events,
            locks: UserLocks::default(),
        }
    }

    fn tier_settings(&self, tier: Tier) -> Option<&TierSettings> {
        self.tiers.iter().find(|settings| settings.name == tier.as_str())
    }

    fn deadline_exceeded(deadline: Option<Instant>) -> bool {
        deadline.map(|d| Instant::now() >= d).unwrap_or(false)
    }

    /// Runs all five phases for every user with at least one record,
    /// batched by `config.batch_size`, checking `deadline` between users.
    pub fn run(&self, deadline: Option<Instant>) -> PolicyRunReport {
        let mut report = PolicyRunReport::default();
        let user_ids = match self.store.distinct_user_ids() {
            Ok(ids) => ids,
            Err(err) => {
                error!(error = %err, "failed to list users for policy run");
                report.partial = true;
                return report;
            }
        };

        for batch in user_ids.chunks(self.config.batch_size.max(1)) {
            for user_id in batch {
                if Self::deadline_exceeded(deadline) {
                    report.partial = true;
                    return report;
                }
                if !self.locks.try_acquire(user_id) {
                    continue;
                }
                self.run_for_user(user_id, &mut report);
                self.locks.release(user_id);
            }
        }

        let _ = self.store.append_event(
            LifecycleEvent::new(EventKind::PolicyRun, "system").with_metadata(report_metadata(&report)),
        );
        self.events.emit(LifecycleEvent::new(EventKind::PolicyRun, "system").with_metadata(report_metadata(&report)));

        report
    }

    /// A single user's failure in any phase is logged and skipped; it must
    /// never abort the run for other users.
    fn run_for_user(&self, user_id: &str, report: &mut PolicyRunReport) {
        if let Err(err) = self.migrate(user_id, report) {
            warn!(user_id, error = %err, phase = "migrate", "policy phase failed for user");
        }
        if let Err(err) = self.trim(user_id, report) {
            warn!(user_id, error = %err, phase = "trim", "policy phase failed for user");
        }
        if let Err(err) = self.summarize(user_id, report) {
            warn!(user_id, error = %err, phase = "summarize", "policy phase failed for user");
        }
        if self.config.thread.enabled {
            if let Err(err) = self.thread_summarize(user_id, report) {
                warn!(user_id, error = %err, phase = "thread_summarize", "policy phase failed for user");
            }
        }
        if self.config.clustering.enabled {
            if let Err(err) = self.rebuild_clusters(user_id, report) {
                warn!(user_id, error = %err, phase = "cluster", "policy phase failed for user");
            }
        }
    }

    fn is_exempt(&self, record: &MemoryRecord) -> bool {
        self.config.exempt_high_importance && record.importance_norm() >= 0.8
    }

    /// Phase 1: move records forward a tier once they've aged past the
    /// configured threshold. Idempotent — a record already at or past its
    /// target tier is left untouched.
    fn migrate(&self, user_id: &str, report: &mut PolicyRunReport) -> crate::error::Result<()> {
        for policy in &self.config.migrate {
            let mut filter = ListFilter::new();
            filter.tier = Some(policy.from);
            filter.limit = 10_000;
            let records = self.store.list(user_id, &filter)?;
            let now = Utc::now();
            for mut record in records {
                if record.tier != policy.from {
                    continue;
                }
                let age_days = (now - record.created_at).num_days();
                if age_days < policy.when_age_days {
                    continue;
                }
                record.promote_to(policy.to)?;
                record.updated_at = now;
                self.store.update(&record)?;
                let _ = self.store.append_event(
                    LifecycleEvent::new(EventKind::Migrated, user_id).with_resource(record.id.to_string()),
                );
                report.migrated += 1;
            }
        }
        self.enforce_retention(user_id)?;
        Ok(())
    }

    /// Expiry- and capacity-based deletion, keyed off `storage.tiers[]`.
    /// Unlike trim/summarize, importance exemption does not apply here —
    /// a record's lifecycle end is independent of whether it was ever
    /// trimmed or summarized.
    fn enforce_retention(&self, user_id: &str) -> crate::error::Result<()> {
        for tier in TIERS {
            let Some(settings) = self.tier_settings(tier) else {
                continue;
            };
            let mut filter = ListFilter::new();
            filter.tier = Some(tier);
            filter.limit = 10_000;
            let mut records = self.store.list(user_id, &filter)?;
            records.retain(|r| r.tier == tier);

            if let Some(expiry_days) = settings.expiry_days {
                let now = Utc::now();
                let (expired, rest): (Vec<_>, Vec<_>) =
                    records.into_iter().partition(|r| (now - r.created_at).num_days() >= expiry_days);
                for record in expired {
                    self.delete_record(user_id, record.id)?;
                }
                records = rest;
            }

            if let Some(capacity) = settings.capacity {
                if records.len() > capacity {
                    records.sort_by_key(|r| r.updated_at);
                    let excess = records.len() - capacity;
                    for record in records.into_iter().take(excess) {
                        self.delete_record(user_id, record.id)?;
                    }
                }
            }
        }
        Ok(())
    }

    fn delete_record(&self, user_id: &str, id: crate::types::MemoryId) -> crate::error::Result<()> {
        if self.store.delete(user_id, id)? {
            let _ = self
                .store
                .append_event(LifecycleEvent::new(EventKind::Deleted, user_id).with_resource(id.to_string()));
        }
        Ok(())
    }

    /// Phase 2: shorten over-long content for records not exempted by
    /// importance, for each tier whose `trim.max_chars` is configured.
    /// Idempotent via the `trimmed` metadata flag.
    fn trim(&self, user_id: &str, report: &mut PolicyRunReport) -> crate::error::Result<()> {
        for tier in TIERS {
            let max_chars = match self.tier_settings(tier).and_then(|s| s.trim.max_chars) {
                Some(n) if n > 0 => n,
                _ => continue,
            };
            let mut filter = ListFilter::new();
            filter.tier = Some(tier);
            filter.limit = 10_000;
            let records = self.store.list(user_id, &filter)?;
            for mut record in records {
                if self.is_exempt(&record) {
                    continue;
                }
                if record
                    .metadata
                    .get(reserved_keys::TRIMMED)
                    .and_then(MetadataValue::as_bool)
                    .unwrap_or(false)
                {
                    continue;
                }
                if record.content.chars().count() <= max_chars {
                    continue;
                }
                record.content = self.trimmer.trim(&record.content, max_chars);
                record.metadata.insert(reserved_keys::TRIMMED.to_string(), MetadataValue::Bool(true));
                record.updated_at = Utc::now();
                self.store.update(&record)?;
                let _ = self.store.append_event(
                    LifecycleEvent::new(EventKind::Trimmed, user_id).with_resource(record.id.to_string()),
                );
                report.trimmed += 1;
            }
        }
        Ok(())
    }

    /// Phase 3: summarize long-idle content, for each tier whose
    /// `summarize.min_chars` is configured. Idempotent via the
    /// `summarized` metadata flag.
    fn summarize(&self, user_id: &str, report: &mut PolicyRunReport) -> crate::error::Result<()> {
        for tier in TIERS {
            let settings = match self.tier_settings(tier) {
                Some(s) => s,
                None => continue,
            };
            let min_chars = match settings.summarize.min_chars {
                Some(n) => n,
                None => continue,
            };
            let target_chars = settings.summarize.target_chars;
            let mut filter = ListFilter::new();
            filter.tier = Some(tier);
            filter.limit = 10_000;
            let records = self.store.list(user_id, &filter)?;
            for mut record in records {
                if self.is_exempt(&record) || record.summarized() {
                    continue;
                }
                if record.content.chars().count() < min_chars {
                    continue;
                }
                record.content = self.summarizer.summarize(&record.content, target_chars);
                record.set_summarized(true);
                record.updated_at = Utc::now();
                self.store.update(&record)?;
                let _ = self.store.append_event(
                    LifecycleEvent::new(EventKind::Summarized, user_id).with_resource(record.id.to_string()),
                );
                report.summarized += 1;
            }
        }
        Ok(())
    }

    /// Phase 4: collapse a thread with enough records into a single
    /// `thread_summary` record. Idempotent: a thread already carrying a
    /// summary record for its current member set is skipped.
    fn thread_summarize(&self, user_id: &str, report: &mut PolicyRunReport) -> crate::error::Result<()> {
        let mut filter = ListFilter::new();
        filter.limit = 10_000;
        let records = self.store.list(user_id, &filter)?;

        let mut by_thread: std::collections::HashMap<String, Vec<MemoryRecord>> = std::collections::HashMap::new();
        for record in records {
            if record.is_thread_summary() {
                continue;
            }
            if let Some(thread_id) = record.thread_id.clone() {
                by_thread.entry(thread_id).or_default().push(record);
            }
        }

        for (thread_id, mut members) in by_thread {
            if members.len() < self.config.thread.min_records {
                continue;
            }
            members.sort_by_key(|r| r.id);
            let source_ids: Vec<i64> = members.iter().map(|r| r.id).collect();

            let already_summarized = self
                .store
                .list(
                    user_id,
                    &ListFilter {
                        thread_id: Some(thread_id.clone()),
                        limit: 100,
                        ..ListFilter::new()
                    },
                )?
                .into_iter()
                .any(|r| r.is_thread_summary() && r.source_ids() == source_ids);
            if already_summarized {
                continue;
            }

            let combined: String = members.iter().map(|r| r.content.as_str()).collect::<Vec<_>>().join("\n");
            let summary_text = self.summarizer.summarize(&combined, self.config.thread.max_chars);

            let mut metadata = crate::types::Metadata::new();
            metadata.insert(reserved_keys::KIND.to_string(), MetadataValue::string("thread_summary"));
            metadata.insert(
                reserved_keys::SOURCE_IDS.to_string(),
                MetadataValue::Array(source_ids.iter().map(|id| MetadataValue::Number(*id as f64)).collect()),
            );

            self.store.create(crate::store::NewMemory {
                user_id: user_id.to_string(),
                namespace: members[0].namespace.clone(),
                thread_id: Some(thread_id.clone()),
                session_id: None,
                content: summary_text,
                metadata,
                tier: Tier::LongTerm,
                related_threads: vec![],
            })?;

            for mut member in members {
                member.set_summarized(true);
                member.updated_at = chrono::Utc::now();
                self.store.update(&member)?;
            }

            let _ = self
                .store
                .append_event(LifecycleEvent::new(EventKind::ThreadSummarized, user_id).with_resource(thread_id));
            report.thread_summarized += 1;
        }
        Ok(())
    }

    /// Phase 5: rebuild `(topic, category)` clusters from current records.
    /// Always idempotent — a rerun with unchanged inputs upserts the same
    /// row. Public so callers (e.g. the Manager) can trigger just
    /// this phase without paying for the full five-phase run.
    pub fn rebuild_clusters(&self, user_id: &str, report: &mut PolicyRunReport) -> crate::error::Result<()> {
        let mut filter = ListFilter::new();
        filter.limit = 10_000;
        let records = self.store.list(user_id, &filter)?;

        let mut groups: std::collections::HashMap<(String, String), Vec<&MemoryRecord>> =
            std::collections::HashMap::new();
        for record in &records {
            if let (Some(topic), Some(category)) = (record.topic(), record.category()) {
                groups.entry((topic.to_string(), category.to_string())).or_default().push(record);
            }
        }

        for ((topic, category), members) in groups {
            if members.len() < self.config.clustering.min_cluster_size {
                continue;
            }
            let memory_ids: std::collections::HashSet<i64> = members.iter().map(|r| r.id).collect();
            let first_seen = members.iter().map(|r| r.created_at).min().unwrap_or_else(Utc::now);
            let last_seen = members.iter().map(|r| r.updated_at).max().unwrap_or_else(Utc::now);
            let summary = format!("{} related memories about {} ({})", members.len(), topic, category);

            let cluster = MemoryCluster {
                id: 0,
                user_id: user_id.to_string(),
                topic,
                category,
                memory_ids,
                summary,
                first_seen,
                last_seen,
                last_built_at: Utc::now(),
                occurrences: members.len() as i64,
            };
            self.store.upsert_cluster(&cluster)?;
            report.clustered += 1;
        }
        Ok(())
    }
}

fn report_metadata(report: &PolicyRunReport) -> crate::types::Metadata {
    let mut metadata = crate::types::Metadata::new();
    metadata.insert("migrated".to_string(), MetadataValue::Number(report.migrated as f64));
    metadata.insert("trimmed".to_string(), MetadataValue::Number(report.trimmed as f64));
    metadata.insert("summarized".to_string(), MetadataValue::Number(report.summarized as f64));
    metadata.insert(
        "thread_summarized".to_string(),
        MetadataValue::Number(report.thread_summarized as f64),
    );
    metadata.insert("clustered".to_string(), MetadataValue::Number(report.clustered as f64));
    metadata
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::NoopEventSink;
    use crate::store::{NewMemory, SqliteStore};
    use crate::text::{NoopSummarizer, NoopTrimmer};
    use chrono::Duration;

    fn executor(store: &dyn StorageBackend, events: &dyn EventSink) -> PolicyExecutor<'_> {
        PolicyExecutor::new(
            store,
            PolicyConfig::default(),
            crate::config::Config::default().tiers,
            Box::new(NoopTrimmer),
            Box::new(NoopSummarizer),
            events,
        )
    }

    #[test]
    fn migrate_moves_aged_records_forward() {
        let store = SqliteStore::open_in_memory().unwrap();
        let record = store
            .create(NewMemory {
                user_id: "u1".to_string(),
                namespace: "global".to_string(),
                thread_id: None,
                session_id: None,
                content: "hi".to_string(),
                metadata: crate::types::Metadata::new(),
                tier: Tier::ShortTerm,
                related_threads: vec![],
            })
            .unwrap();

        let mut aged = record.clone();
        aged.created_at = Utc::now() - Duration::days(10);
        store.update(&aged).unwrap();

        let events = NoopEventSink;
        let exec = executor(&store, &events);
        let report = exec.run(None);
        assert_eq!(report.migrated, 1);

        let updated = store.get("u1", record.id).unwrap().unwrap();
        assert_eq!(updated.tier, Tier::MidTerm);
    }

    #[test]
    fn policy_run_is_idempotent_for_clustering() {
        let store = SqliteStore::open_in_memory().unwrap();
        for i in 0..3 {
            let mut metadata = crate::types::Metadata::new();
            metadata.insert("topic".to_string(), MetadataValue::string("Billing"));
            metadata.insert("category".to_string(), MetadataValue::string("support"));
            store
                .create(NewMemory {
                    user_id: "u1".to_string(),
                    namespace: "global".to_string(),
                    thread_id: None,
                    session_id: None,
                    content: format!("memory {i}"),
                    metadata,
                    tier: Tier::ShortTerm,
                    related_threads: vec![],
                })
                .unwrap();
        }

        let events = NoopEventSink;
        let exec = executor(&store, &events);
        exec.run(None);
        exec.run(None);

        let clusters = store.list_clusters("u1").unwrap();
        assert_eq!(clusters.len(), 1);
    }

    #[test]
    fn deadline_in_the_past_marks_run_partial() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .create(NewMemory {
                user_id: "u1".to_string(),
                namespace: "global".to_string(),
                thread_id: None,
                session_id: None,
                content: "hi".to_string(),
                metadata: crate::types::Metadata::new(),
                tier: Tier::ShortTerm,
                related_threads: vec![],
            })
            .unwrap();

        let events = NoopEventSink;
        let exec = executor(&store, &events);
        let report = exec.run(Some(Instant::now()));
        assert!(report.partial);
    }
}
