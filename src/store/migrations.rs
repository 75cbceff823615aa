//! Versioned schema migrations: a `schema_version` table and sequential
//! `migrate_vN` functions applied in order.

use rusqlite::Connection;

use crate::error::Result;

pub const SCHEMA_VERSION: i32 = 1;

pub fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    let current_version: i32 = conn
        .query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |row| {
            row.get(0)
        })
        .unwrap_or(0);

    if current_version < 1 {
        migrate_v1(conn)?;
    }

    Ok(())
}

fn migrate_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS memories (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id TEXT NOT NULL,
            namespace TEXT NOT NULL DEFAULT 'global',
            thread_id TEXT,
            session_id TEXT,
            content TEXT NOT NULL,
            metadata TEXT NOT NULL DEFAULT '{}',
            tier TEXT NOT NULL DEFAULT 'short_term',
            related_threads TEXT NOT NULL DEFAULT '[]',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_memories_user_tier ON memories(user_id, tier);
        CREATE INDEX IF NOT EXISTS idx_memories_user_thread ON memories(user_id, thread_id);
        CREATE INDEX IF NOT EXISTS idx_memories_user_namespace ON memories(user_id, namespace);
        CREATE INDEX IF NOT EXISTS idx_memories_updated_at ON memories(updated_at);

        CREATE TABLE IF NOT EXISTS clusters (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id TEXT NOT NULL,
            topic TEXT NOT NULL,
            category TEXT NOT NULL,
            memory_ids TEXT NOT NULL DEFAULT '[]',
            summary TEXT NOT NULL DEFAULT '',
            first_seen TEXT NOT NULL,
            last_seen TEXT NOT NULL,
            last_built_at TEXT NOT NULL,
            occurrences INTEGER NOT NULL DEFAULT 0,
            UNIQUE(user_id, topic, category)
        );

        CREATE TABLE IF NOT EXISTS lifecycle_events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            kind TEXT NOT NULL,
            user_id TEXT NOT NULL,
            resource_id TEXT,
            metadata TEXT NOT NULL DEFAULT '{}',
            timestamp TEXT NOT NULL,
            success INTEGER NOT NULL DEFAULT 1,
            error TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_lifecycle_events_user ON lifecycle_events(user_id, timestamp);

        INSERT INTO schema_version (version) VALUES (1);
        "#,
    )?;
    Ok(())
}
