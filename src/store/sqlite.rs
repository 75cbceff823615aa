//! SQLite-backed [`StorageBackend`].
//!
//! Holds a bounded pool of connections, round-robined across callers, with
//! WAL mode enabled for on-disk databases so readers don't block writers.

use std::path::Path;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{Connection, OpenFlags, Row};
use tracing::{instrument, warn};

use super::migrations::{run_migrations, SCHEMA_VERSION};
use super::{ListFilter, NewMemory, StorageBackend};
use crate::error::{MemoricError, Result};
use crate::types::{LifecycleEvent, MemoryCluster, MemoryId, MemoryRecord, Metadata, Tier};

pub const DEFAULT_POOL_SIZE: usize = 5;
pub const MAX_POOL_SIZE: usize = 10;

pub struct SqliteStore {
    pool: Vec<Arc<Mutex<Connection>>>,
    next: AtomicUsize,
}

impl SqliteStore {
    /// Opens (creating if absent) the database at `path` with a pool of
    /// `pool_size` connections, clamped to [1, [`MAX_POOL_SIZE`]].
    pub fn open(path: &str, pool_size: usize) -> Result<Self> {
        let pool_size = pool_size.clamp(1, MAX_POOL_SIZE);
        let mut pool = Vec::with_capacity(pool_size);
        for _ in 0..pool_size {
            pool.push(Arc::new(Mutex::new(Self::create_connection(path)?)));
        }
        {
            let conn = pool[0].lock();
            run_migrations(&conn)?;
        }
        Ok(Self {
            pool,
            next: AtomicUsize::new(0),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::open(":memory:", 1)
    }

    fn create_connection(path: &str) -> Result<Connection> {
        let conn = if path == ":memory:" {
            Connection::open_in_memory()?
        } else {
            if let Some(parent) = Path::new(path).parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX;
            Connection::open_with_flags(path, flags)?
        };
        Self::configure_pragmas(&conn, path == ":memory:")?;
        Ok(conn)
    }

    fn configure_pragmas(conn: &Connection, in_memory: bool) -> Result<()> {
        if in_memory {
            conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        } else {
            conn.execute_batch(
                r#"
                PRAGMA journal_mode=WAL;
                PRAGMA synchronous=NORMAL;
                PRAGMA busy_timeout=30000;
                PRAGMA foreign_keys=ON;
                "#,
            )?;
        }
        Ok(())
    }

    fn checkout(&self) -> Arc<Mutex<Connection>> {
        let index = self.next.fetch_add(1, Ordering::Relaxed) % self.pool.len();
        self.pool[index].clone()
    }

    fn with_connection<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let handle = self.checkout();
        let conn = handle.lock();
        f(&conn)
    }

    fn with_transaction<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let handle = self.checkout();
        let mut conn = handle.lock();
        let tx = conn.transaction()?;
        let result = f(&tx)?;
        tx.commit()?;
        Ok(result)
    }

    pub fn schema_version(&self) -> i32 {
        SCHEMA_VERSION
    }

    /// VACUUM/ANALYZE maintenance, never required for correctness.
    pub fn optimize(&self) -> Result<()> {
        self.with_connection(|conn| {
            conn.execute_batch("PRAGMA optimize; VACUUM;")?;
            Ok(())
        })
    }

    pub fn health_check(&self) -> Result<()> {
        self.with_connection(|conn| {
            conn.query_row("SELECT 1", [], |_| Ok(()))?;
            Ok(())
        })
    }

    /// Runs a fully-built `SELECT * FROM memories ...` query and applies the
    /// containment predicate to every row, shared by `list` and
    /// `list_by_namespace`.
    fn run_list_query(
        &self,
        sql: &str,
        params: Vec<Box<dyn rusqlite::ToSql>>,
        metadata_filter: &super::filter::MetadataFilter,
    ) -> Result<Vec<MemoryRecord>> {
        self.with_connection(|conn| {
            let mut stmt = conn.prepare(sql)?;
            let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();
            let rows = stmt.query_map(param_refs.as_slice(), row_to_record)?;
            let mut records = Vec::new();
            for row in rows {
                let record = row?;
                if super::filter::matches(&record.metadata, metadata_filter) {
                    records.push(record);
                }
            }
            Ok(records)
        })
    }
}

fn row_to_record(row: &Row) -> rusqlite::Result<MemoryRecord> {
    let metadata_json: String = row.get("metadata")?;
    let related_json: String = row.get("related_threads")?;
    let tier_str: String = row.get("tier")?;

    let metadata: Metadata = parse_metadata(&metadata_json);
    let related_threads: Vec<String> = serde_json::from_str(&related_json).unwrap_or_default();
    let tier = Tier::from_str(&tier_str).unwrap_or_default();

    Ok(MemoryRecord {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        namespace: row.get("namespace")?,
        thread_id: row.get("thread_id")?,
        session_id: row.get("session_id")?,
        content: row.get("content")?,
        metadata,
        tier,
        related_threads,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

fn parse_metadata(raw: &str) -> Metadata {
    serde_json::from_str::<serde_json::Value>(raw)
        .ok()
        .and_then(|v| v.as_object().cloned())
        .map(|obj| {
            obj.into_iter()
                .map(|(k, v)| (k, crate::types::MetadataValue::from(v)))
                .collect()
        })
        .unwrap_or_default()
}

/// Appends the `namespace`/`thread_id`/`tier`/`exclude_summarized`/
/// `LIMIT..OFFSET` predicates shared by [`StorageBackend::list`] and
/// [`StorageBackend::list_by_namespace`]. `namespace_override` lets
/// `list_by_namespace` skip `filter.namespace` since the namespace is
/// already pinned by its own argument.
fn push_common_predicates(
    sql: &mut String,
    params: &mut Vec<Box<dyn rusqlite::ToSql>>,
    filter: &ListFilter,
    namespace_override: Option<&str>,
) {
    if let Some(ns) = namespace_override {
        sql.push_str(" AND namespace = ?");
        params.push(Box::new(ns.to_string()));
    }
    if let Some(thread) = &filter.thread_id {
        sql.push_str(" AND thread_id = ?");
        params.push(Box::new(thread.clone()));
    }
    if let Some(tier) = filter.tier {
        sql.push_str(" AND tier = ?");
        params.push(Box::new(tier.as_str().to_string()));
    }
    if filter.exclude_summarized {
        sql.push_str(" AND json_extract(metadata, '$.summarized') IS NOT 1");
    }
    sql.push_str(" ORDER BY updated_at DESC, id DESC LIMIT ? OFFSET ?");
    params.push(Box::new(filter.limit as i64));
    params.push(Box::new(filter.offset as i64));
}

fn metadata_to_json(metadata: &Metadata) -> String {
    let obj: serde_json::Map<String, serde_json::Value> = metadata
        .iter()
        .map(|(k, v)| (k.clone(), serde_json::Value::from(v.clone())))
        .collect();
    serde_json::Value::Object(obj).to_string()
}

impl StorageBackend for SqliteStore {
    #[instrument(skip(self, input), fields(user_id = %input.user_id))]
    fn create(&self, input: NewMemory) -> Result<MemoryRecord> {
        let now = Utc::now();
        let metadata_json = metadata_to_json(&input.metadata);
        let related_json = serde_json::to_string(&input.related_threads)?;

        self.with_connection(|conn| {
            conn.execute(
                "INSERT INTO memories
                 (user_id, namespace, thread_id, session_id, content, metadata, tier, related_threads, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)",
                rusqlite::params![
                    input.user_id,
                    input.namespace,
                    input.thread_id,
                    input.session_id,
                    input.content,
                    metadata_json,
                    input.tier.as_str(),
                    related_json,
                    now,
                ],
            )?;
            let id = conn.last_insert_rowid();
            Ok(MemoryRecord {
                id,
                user_id: input.user_id.clone(),
                namespace: input.namespace.clone(),
                thread_id: input.thread_id.clone(),
                session_id: input.session_id.clone(),
                content: input.content.clone(),
                metadata: input.metadata.clone(),
                tier: input.tier,
                related_threads: input.related_threads.clone(),
                created_at: now,
                updated_at: now,
            })
        })
    }

    fn get(&self, user_id: &str, id: MemoryId) -> Result<Option<MemoryRecord>> {
        self.with_connection(|conn| {
            let mut stmt = conn.prepare("SELECT * FROM memories WHERE id = ?1 AND user_id = ?2")?;
            let mut rows = stmt.query(rusqlite::params![id, user_id])?;
            match rows.next()? {
                Some(row) => Ok(Some(row_to_record(row)?)),
                None => Ok(None),
            }
        })
    }

    fn update(&self, record: &MemoryRecord) -> Result<()> {
        let metadata_json = metadata_to_json(&record.metadata);
        let related_json = serde_json::to_string(&record.related_threads)?;
        self.with_connection(|conn| {
            let changed = conn.execute(
                "UPDATE memories SET namespace = ?1, thread_id = ?2, session_id = ?3, content = ?4,
                 metadata = ?5, tier = ?6, related_threads = ?7, updated_at = ?8
                 WHERE id = ?9 AND user_id = ?10",
                rusqlite::params![
                    record.namespace,
                    record.thread_id,
                    record.session_id,
                    record.content,
                    metadata_json,
                    record.tier.as_str(),
                    related_json,
                    record.updated_at,
                    record.id,
                    record.user_id,
                ],
            )?;
            if changed == 0 {
                return Err(MemoricError::NotFound(format!("memory {} not found for user", record.id)));
            }
            Ok(())
        })
    }

    fn delete(&self, user_id: &str, id: MemoryId) -> Result<bool> {
        self.with_connection(|conn| {
            let changed = conn.execute(
                "DELETE FROM memories WHERE id = ?1 AND user_id = ?2",
                rusqlite::params![id, user_id],
            )?;
            Ok(changed > 0)
        })
    }

    fn list(&self, user_id: &str, filter: &ListFilter) -> Result<Vec<MemoryRecord>> {
        let (metadata_sql, metadata_binds) = super::filter::to_sql_prefilter(&filter.metadata);

        let mut sql = format!("SELECT * FROM memories WHERE user_id = ? AND ({})", metadata_sql);
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(user_id.to_string())];
        for bind in &metadata_binds {
            params.push(Box::new(bind.clone()));
        }
        push_common_predicates(&mut sql, &mut params, filter, filter.namespace.as_deref());
        self.run_list_query(&sql, params, &filter.metadata)
    }

    fn list_by_namespace(&self, namespace: &str, filter: &ListFilter) -> Result<Vec<MemoryRecord>> {
        let (metadata_sql, metadata_binds) = super::filter::to_sql_prefilter(&filter.metadata);

        let mut sql = format!("SELECT * FROM memories WHERE namespace = ? AND ({})", metadata_sql);
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(namespace.to_string())];
        for bind in &metadata_binds {
            params.push(Box::new(bind.clone()));
        }
        push_common_predicates(&mut sql, &mut params, filter, None);
        self.run_list_query(&sql, params, &filter.metadata)
    }

    fn batch_create(&self, inputs: Vec<NewMemory>) -> Result<Vec<MemoryRecord>> {
        let now = Utc::now();
        self.with_transaction(|conn| {
            let mut created = Vec::with_capacity(inputs.len());
            for input in &inputs {
                let metadata_json = metadata_to_json(&input.metadata);
                let related_json = serde_json::to_string(&input.related_threads)?;
                conn.execute(
                    "INSERT INTO memories
                     (user_id, namespace, thread_id, session_id, content, metadata, tier, related_threads, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)",
                    rusqlite::params![
                        input.user_id,
                        input.namespace,
                        input.thread_id,
                        input.session_id,
                        input.content,
                        metadata_json,
                        input.tier.as_str(),
                        related_json,
                        now,
                    ],
                )?;
                let id = conn.last_insert_rowid();
                created.push(MemoryRecord {
                    id,
                    user_id: input.user_id.clone(),
                    namespace: input.namespace.clone(),
                    thread_id: input.thread_id.clone(),
                    session_id: input.session_id.clone(),
                    content: input.content.clone(),
                    metadata: input.metadata.clone(),
                    tier: input.tier,
                    related_threads: input.related_threads.clone(),
                    created_at: now,
                    updated_at: now,
                });
            }
            Ok(created)
        })
    }

    fn append_event(&self, event: LifecycleEvent) -> Result<()> {
        let metadata_json = metadata_to_json(&event.metadata);
        let result = self.with_connection(|conn| {
            conn.execute(
                "INSERT INTO lifecycle_events (kind, user_id, resource_id, metadata, timestamp, success, error)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![
                    event.kind.as_str(),
                    event.user_id,
                    event.resource_id,
                    metadata_json,
                    event.timestamp,
                    event.success,
                    event.error,
                ],
            )?;
            Ok(())
        });
        if let Err(ref err) = result {
            warn!(error = %err, "failed to persist lifecycle event");
        }
        result
    }

    fn recent_events(&self, user_id: &str, limit: usize) -> Result<Vec<LifecycleEvent>> {
        self.with_connection(|conn| {
            let mut stmt = conn.prepare(
                "SELECT kind, user_id, resource_id, metadata, timestamp, success, error
                 FROM lifecycle_events WHERE user_id = ?1 ORDER BY id DESC LIMIT ?2",
            )?;
            let rows = stmt.query_map(rusqlite::params![user_id, limit as i64], |row| {
                let kind_str: String = row.get(0)?;
                let metadata_json: String = row.get(3)?;
                let timestamp: DateTime<Utc> = row.get(4)?;
                Ok(LifecycleEvent {
                    kind: parse_event_kind(&kind_str),
                    user_id: row.get(1)?,
                    resource_id: row.get(2)?,
                    metadata: parse_metadata(&metadata_json),
                    timestamp,
                    success: row.get(5)?,
                    error: row.get(6)?,
                })
            })?;
            rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
        })
    }

    fn upsert_cluster(&self, cluster: &MemoryCluster) -> Result<()> {
        let memory_ids_json = serde_json::to_string(&cluster.memory_ids.iter().collect::<Vec<_>>())?;
        let attempt = |conn: &Connection| -> Result<()> {
            conn.execute(
                "INSERT INTO clusters (user_id, topic, category, memory_ids, summary, first_seen, last_seen, last_built_at, occurrences)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                 ON CONFLICT(user_id, topic, category) DO UPDATE SET
                    memory_ids = excluded.memory_ids,
                    summary = excluded.summary,
                    last_seen = excluded.last_seen,
                    last_built_at = excluded.last_built_at,
                    occurrences = excluded.occurrences",
                rusqlite::params![
                    cluster.user_id,
                    cluster.topic,
                    cluster.category,
                    memory_ids_json,
                    cluster.summary,
                    cluster.first_seen,
                    cluster.last_seen,
                    cluster.last_built_at,
                    cluster.occurrences,
                ],
            )?;
            Ok(())
        };

        // A uniqueness violation under concurrent rebuilds is retried once
        // rather than surfaced to the caller.
        match self.with_connection(attempt) {
            Ok(()) => Ok(()),
            Err(MemoricError::Database(_)) => self.with_connection(attempt),
            Err(other) => Err(other),
        }
    }

    fn list_clusters(&self, user_id: &str) -> Result<Vec<MemoryCluster>> {
        self.with_connection(|conn| {
            let mut stmt = conn.prepare("SELECT * FROM clusters WHERE user_id = ?1")?;
            let rows = stmt.query_map(rusqlite::params![user_id], |row| {
                let memory_ids_json: String = row.get("memory_ids")?;
                let memory_ids: std::collections::HashSet<MemoryId> =
                    serde_json::from_str::<Vec<MemoryId>>(&memory_ids_json)
                        .unwrap_or_default()
                        .into_iter()
                        .collect();
                Ok(MemoryCluster {
                    id: row.get("id")?,
                    user_id: row.get("user_id")?,
                    topic: row.get("topic")?,
                    category: row.get("category")?,
                    memory_ids,
                    summary: row.get("summary")?,
                    first_seen: row.get("first_seen")?,
                    last_seen: row.get("last_seen")?,
                    last_built_at: row.get("last_built_at")?,
                    occurrences: row.get("occurrences")?,
                })
            })?;
            rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
        })
    }

    fn count_by_tier(&self, user_id: &str, tier: Tier) -> Result<usize> {
        self.with_connection(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM memories WHERE user_id = ?1 AND tier = ?2",
                rusqlite::params![user_id, tier.as_str()],
                |row| row.get(0),
            )?;
            Ok(count as usize)
        })
    }

    fn distinct_user_ids(&self) -> Result<Vec<String>> {
        self.with_connection(|conn| {
            let mut stmt = conn.prepare("SELECT DISTINCT user_id FROM memories")?;
            let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
            rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
        })
    }
}

fn parse_event_kind(raw: &str) -> crate::types::EventKind {
    use crate::types::EventKind;
    match raw {
        "created" => EventKind::Created,
        "retrieved" => EventKind::Retrieved,
        "migrated" => EventKind::Migrated,
        "trimmed" => EventKind::Trimmed,
        "summarized" => EventKind::Summarized,
        "thread_summarized" => EventKind::ThreadSummarized,
        "clustered" => EventKind::Clustered,
        "deleted" => EventKind::Deleted,
        _ => EventKind::PolicyRun,
    }
}
