//! Core data model for Memoric: memory records, clusters, and lifecycle events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::error::{MemoricError, Result};

/// Unique identifier for a memory record.
pub type MemoryId = i64;

/// Unique identifier for a memory cluster.
pub type ClusterId = i64;

/// Reserved metadata keys with spec-defined meaning.
pub mod reserved_keys {
    pub const TOPIC: &str = "topic";
    pub const CATEGORY: &str = "category";
    pub const ENTITIES: &str = "entities";
    pub const IMPORTANCE: &str = "importance";
    pub const ROLE: &str = "role";
    pub const KIND: &str = "kind";
    pub const SOURCE_IDS: &str = "source_ids";
    pub const SUMMARIZED: &str = "summarized";
    pub const TRIMMED: &str = "trimmed";
    pub const TOPICS: &str = "topics";
}

/// A semi-structured JSON-like value for memory metadata.
///
/// Modeled as a tagged union rather than reusing `serde_json::Value`
/// directly so the containment predicate in [`crate::store::filter`] can be
/// pattern-matched exhaustively; conversions to/from `serde_json::Value`
/// are provided for ingest/egress at the API boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Array(Vec<MetadataValue>),
    Object(HashMap<String, MetadataValue>),
}

impl MetadataValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetadataValue::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MetadataValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            MetadataValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[MetadataValue]> {
        match self {
            MetadataValue::Array(v) => Some(v.as_slice()),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&HashMap<String, MetadataValue>> {
        match self {
            MetadataValue::Object(m) => Some(m),
            _ => None,
        }
    }

    pub fn string(s: impl Into<String>) -> Self {
        MetadataValue::String(s.into())
    }

    pub fn array_of_strings<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        MetadataValue::Array(items.into_iter().map(|s| MetadataValue::string(s)).collect())
    }
}

impl From<serde_json::Value> for MetadataValue {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => MetadataValue::Null,
            serde_json::Value::Bool(b) => MetadataValue::Bool(b),
            serde_json::Value::Number(n) => MetadataValue::Number(n.as_f64().unwrap_or(0.0)),
            serde_json::Value::String(s) => MetadataValue::String(s),
            serde_json::Value::Array(a) => {
                MetadataValue::Array(a.into_iter().map(MetadataValue::from).collect())
            }
            serde_json::Value::Object(o) => MetadataValue::Object(
                o.into_iter().map(|(k, v)| (k, MetadataValue::from(v))).collect(),
            ),
        }
    }
}

impl From<MetadataValue> for serde_json::Value {
    fn from(v: MetadataValue) -> Self {
        match v {
            MetadataValue::Null => serde_json::Value::Null,
            MetadataValue::Bool(b) => serde_json::Value::Bool(b),
            MetadataValue::Number(n) => serde_json::json!(n),
            MetadataValue::String(s) => serde_json::Value::String(s),
            MetadataValue::Array(a) => {
                serde_json::Value::Array(a.into_iter().map(Into::into).collect())
            }
            MetadataValue::Object(o) => serde_json::Value::Object(
                o.into_iter().map(|(k, v)| (k, v.into())).collect(),
            ),
        }
    }
}

pub type Metadata = HashMap<String, MetadataValue>;

/// Lifetime tier of a memory record. Ordered: `ShortTerm < MidTerm < LongTerm`.
///
/// The declaration order backs `PartialOrd`/`Ord` so tier comparisons read
/// naturally (`tier_new >= tier_old`) without a hand-written rank table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    #[default]
    ShortTerm,
    MidTerm,
    LongTerm,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::ShortTerm => "short_term",
            Tier::MidTerm => "mid_term",
            Tier::LongTerm => "long_term",
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "short_term" => Ok(Tier::ShortTerm),
            "mid_term" => Ok(Tier::MidTerm),
            "long_term" => Ok(Tier::LongTerm),
            _ => Err(format!("Unknown tier: {}", s)),
        }
    }
}

/// A single memory record — the atomic unit of the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub id: MemoryId,
    pub user_id: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    pub thread_id: Option<String>,
    pub session_id: Option<String>,
    pub content: String,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub tier: Tier,
    #[serde(default)]
    pub related_threads: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub fn default_namespace() -> String {
    "global".to_string()
}

/// How importance is expressed in metadata (enum bucket or raw number).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ImportanceLevel {
    Low,
    Medium,
    High,
}

impl ImportanceLevel {
    pub fn as_norm(&self) -> f64 {
        match self {
            ImportanceLevel::Low => 0.25,
            ImportanceLevel::Medium => 0.5,
            ImportanceLevel::High => 0.85,
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "low" => Some(ImportanceLevel::Low),
            "medium" => Some(ImportanceLevel::Medium),
            "high" => Some(ImportanceLevel::High),
            _ => None,
        }
    }
}

impl MemoryRecord {
    /// Attempt a forward tier move. Backward moves are rejected.
    pub fn promote_to(&mut self, target: Tier) -> Result<()> {
        if target < self.tier {
            return Err(MemoricError::InvalidArgument(format!(
                "cannot demote record {} from {} to {}",
                self.id, self.tier, target
            )));
        }
        self.tier = target;
        Ok(())
    }

    pub fn topic(&self) -> Option<&str> {
        self.metadata.get(reserved_keys::TOPIC).and_then(MetadataValue::as_str)
    }

    pub fn category(&self) -> Option<&str> {
        self.metadata.get(reserved_keys::CATEGORY).and_then(MetadataValue::as_str)
    }

    pub fn entities(&self) -> Vec<String> {
        self.metadata
            .get(reserved_keys::ENTITIES)
            .and_then(MetadataValue::as_array)
            .map(|arr| arr.iter().filter_map(MetadataValue::as_str).map(String::from).collect())
            .unwrap_or_default()
    }

    pub fn role(&self) -> Option<&str> {
        self.metadata.get(reserved_keys::ROLE).and_then(MetadataValue::as_str)
    }

    pub fn kind(&self) -> &str {
        self.metadata
            .get(reserved_keys::KIND)
            .and_then(MetadataValue::as_str)
            .unwrap_or("record")
    }

    pub fn is_thread_summary(&self) -> bool {
        self.kind() == "thread_summary"
    }

    pub fn source_ids(&self) -> Vec<MemoryId> {
        self.metadata
            .get(reserved_keys::SOURCE_IDS)
            .and_then(MetadataValue::as_array)
            .map(|arr| arr.iter().filter_map(MetadataValue::as_f64).map(|n| n as MemoryId).collect())
            .unwrap_or_default()
    }

    pub fn summarized(&self) -> bool {
        self.metadata
            .get(reserved_keys::SUMMARIZED)
            .and_then(MetadataValue::as_bool)
            .unwrap_or(false)
    }

    pub fn set_summarized(&mut self, value: bool) {
        self.metadata.insert(reserved_keys::SUMMARIZED.to_string(), MetadataValue::Bool(value));
    }

    /// `importance_norm` per the scoring formula: enum mapped to a
    /// fixed value, numeric clamped to [0,1], absent defaults to 0.5.
    pub fn importance_norm(&self) -> f64 {
        match self.metadata.get(reserved_keys::IMPORTANCE) {
            Some(MetadataValue::Number(n)) => n.clamp(0.0, 1.0),
            Some(MetadataValue::String(s)) => {
                ImportanceLevel::parse(s).map(|l| l.as_norm()).unwrap_or(0.5)
            }
            _ => 0.5,
        }
    }
}

/// Aggregated long-term knowledge derived from records sharing a topic and
/// category. Clusters are derived state: rebuilding them is always
/// idempotent for unchanged inputs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryCluster {
    pub id: ClusterId,
    pub user_id: String,
    pub topic: String,
    pub category: String,
    pub memory_ids: HashSet<MemoryId>,
    pub summary: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub last_built_at: DateTime<Utc>,
    pub occurrences: i64,
}

/// Kinds of lifecycle events emitted by the Policy Executor and Manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Created,
    Retrieved,
    Migrated,
    Trimmed,
    Summarized,
    ThreadSummarized,
    Clustered,
    Deleted,
    PolicyRun,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Created => "created",
            EventKind::Retrieved => "retrieved",
            EventKind::Migrated => "migrated",
            EventKind::Trimmed => "trimmed",
            EventKind::Summarized => "summarized",
            EventKind::ThreadSummarized => "thread_summarized",
            EventKind::Clustered => "clustered",
            EventKind::Deleted => "deleted",
            EventKind::PolicyRun => "policy_run",
        }
    }
}

/// An append-only lifecycle event. The store's `append_event` is
/// best-effort: a failure to persist one must never fail the originating
/// operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleEvent {
    pub kind: EventKind,
    pub user_id: String,
    pub resource_id: Option<String>,
    #[serde(default)]
    pub metadata: Metadata,
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    pub error: Option<String>,
}

impl LifecycleEvent {
    pub fn new(kind: EventKind, user_id: impl Into<String>) -> Self {
        Self {
            kind,
            user_id: user_id.into(),
            resource_id: None,
            metadata: Metadata::new(),
            timestamp: Utc::now(),
            success: true,
            error: None,
        }
    }

    pub fn with_resource(mut self, resource_id: impl Into<String>) -> Self {
        self.resource_id = Some(resource_id.into());
        self
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn failed(mut self, error: impl Into<String>) -> Self {
        self.success = false;
        self.error = Some(error.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_ordering_is_forward_only() {
        assert!(Tier::ShortTerm < Tier::MidTerm);
        assert!(Tier::MidTerm < Tier::LongTerm);
        assert!(Tier::ShortTerm < Tier::LongTerm);
    }

    #[test]
    fn promote_rejects_demotion() {
        let mut record = test_record();
        record.tier = Tier::LongTerm;
        let err = record.promote_to(Tier::ShortTerm).unwrap_err();
        assert_eq!(err.kind(), "InvalidArgument");
    }

    #[test]
    fn promote_allows_forward_and_same_tier() {
        let mut record = test_record();
        assert!(record.promote_to(Tier::MidTerm).is_ok());
        assert_eq!(record.tier, Tier::MidTerm);
        assert!(record.promote_to(Tier::MidTerm).is_ok());
    }

    #[test]
    fn importance_norm_reads_enum_and_numeric() {
        let mut record = test_record();
        record
            .metadata
            .insert("importance".to_string(), MetadataValue::string("high"));
        assert_eq!(record.importance_norm(), 0.85);

        record
            .metadata
            .insert("importance".to_string(), MetadataValue::Number(1.5));
        assert_eq!(record.importance_norm(), 1.0);

        record.metadata.remove("importance");
        assert_eq!(record.importance_norm(), 0.5);
    }

    fn test_record() -> MemoryRecord {
        MemoryRecord {
            id: 1,
            user_id: "u1".to_string(),
            namespace: default_namespace(),
            thread_id: None,
            session_id: None,
            content: "hello".to_string(),
            metadata: Metadata::new(),
            tier: Tier::ShortTerm,
            related_threads: vec![],
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }
}
