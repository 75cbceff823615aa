//! The Store component: a [`StorageBackend`] trait plus the bundled
//! SQLite implementation, split so the interface can gain other backends
//! without touching callers.

pub mod filter;
pub mod migrations;
pub mod sqlite;

use crate::error::Result;
use crate::types::{LifecycleEvent, MemoryCluster, MemoryId, MemoryRecord, Metadata, Tier};

pub use filter::MetadataFilter;
pub use sqlite::SqliteStore;

/// Input to [`StorageBackend::create`]. Separate from [`MemoryRecord`] so
/// callers never have to fabricate an id or timestamps.
#[derive(Debug, Clone)]
pub struct NewMemory {
    pub user_id: String,
    pub namespace: String,
    pub thread_id: Option<String>,
    pub session_id: Option<String>,
    pub content: String,
    pub metadata: Metadata,
    pub tier: Tier,
    pub related_threads: Vec<String>,
}

/// Narrows a `list` query. `user_id` is always required — the store never
/// exposes a cross-user listing path.
#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    pub namespace: Option<String>,
    pub thread_id: Option<String>,
    pub tier: Option<Tier>,
    pub metadata: MetadataFilter,
    pub exclude_summarized: bool,
    pub limit: usize,
    pub offset: usize,
}

impl ListFilter {
    pub fn new() -> Self {
        Self {
            limit: 100,
            ..Default::default()
        }
    }
}

/// Persistence contract for memory records, clusters, and the audit trail.
/// Implementations must enforce the `user_id` scope on every query — there
/// is no operation in this trait that can read or write across users.
pub trait StorageBackend: Send + Sync {
    fn create(&self, input: NewMemory) -> Result<MemoryRecord>;

    fn get(&self, user_id: &str, id: MemoryId) -> Result<Option<MemoryRecord>>;

    fn update(&self, record: &MemoryRecord) -> Result<()>;

    fn delete(&self, user_id: &str, id: MemoryId) -> Result<bool>;

    fn list(&self, user_id: &str, filter: &ListFilter) -> Result<Vec<MemoryRecord>>;

    /// Default delegates to repeated [`StorageBackend::create`] calls;
    /// backends may override with a single transaction for atomicity.
    fn batch_create(&self, inputs: Vec<NewMemory>) -> Result<Vec<MemoryRecord>> {
        inputs.into_iter().map(|input| self.create(input)).collect()
    }

    /// Best-effort: a failure here must never be surfaced as a failure of
    /// the originating operation. Callers should log and discard
    /// the error rather than propagate it up to the user-facing call.
    fn append_event(&self, event: LifecycleEvent) -> Result<()>;

    fn recent_events(&self, user_id: &str, limit: usize) -> Result<Vec<LifecycleEvent>>;

    fn upsert_cluster(&self, cluster: &MemoryCluster) -> Result<()>;

    fn list_clusters(&self, user_id: &str) -> Result<Vec<MemoryCluster>>;

    fn count_by_tier(&self, user_id: &str, tier: Tier) -> Result<usize>;

    /// Distinct `user_id`s with at least one record, for batched policy runs.
    fn distinct_user_ids(&self) -> Result<Vec<String>>;

    /// The one deliberate exception to the no-cross-user rule above: lists
    /// records across every user within a single `namespace`, for
    /// `Scope::Global` retrieval. `filter.namespace` is ignored in favor of
    /// the `namespace` argument.
    fn list_by_namespace(&self, namespace: &str, filter: &ListFilter) -> Result<Vec<MemoryRecord>>;
}
