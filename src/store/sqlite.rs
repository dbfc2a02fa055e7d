//! SQLite-backed mirror store.
//!
//! Tables:
//! - `entities`: kind, id, payload (JSON), updated_at, one row per entity
//! - `sync_state`: category, last_sync_at, progress_marker, one row per category

use crate::directory::models::{Entity, EntityId, EntityKind, SyncState};
use crate::directory::traits::{DirectoryRepository, SyncStateStore};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;

/// SQLite implementation of [`DirectoryRepository`] and [`SyncStateStore`].
pub struct SqliteDirectoryStore {
    conn: Mutex<Connection>,
}

impl SqliteDirectoryStore {
    /// Open (or create) the mirror database at the given path.
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create mirror dir: {}", parent.display())
                })?;
            }
        }

        let conn = Connection::open(db_path)
            .with_context(|| format!("Failed to open mirror DB: {}", db_path.display()))?;

        // WAL mode for concurrent reads + crash safety
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous  = NORMAL;
             PRAGMA temp_store   = MEMORY;",
        )?;

        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Throwaway store, used by tests and by embedders that don't persist.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS entities (
                kind       TEXT NOT NULL,
                id         TEXT NOT NULL,
                payload    TEXT NOT NULL,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (kind, id)
            );
            CREATE TABLE IF NOT EXISTS sync_state (
                category        TEXT PRIMARY KEY,
                last_sync_at    INTEGER NOT NULL,
                progress_marker BLOB
            );",
        )?;
        Ok(())
    }

    /// Number of stored entities of a kind.
    pub fn count(&self, kind: EntityKind) -> Result<usize> {
        let conn = self.conn.lock();
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM entities WHERE kind = ?1",
            params![kind.as_str()],
            |row| row.get(0),
        )?;
        Ok(usize::try_from(n).unwrap_or(0))
    }
}

fn millis_to_datetime(ms: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(ms).unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

#[async_trait]
impl DirectoryRepository for SqliteDirectoryStore {
    async fn exists(&self, kind: EntityKind, id: &EntityId) -> Result<bool> {
        let conn = self.conn.lock();
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM entities WHERE kind = ?1 AND id = ?2",
                params![kind.as_str(), id.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    async fn get(&self, kind: EntityKind, id: &EntityId) -> Result<Option<Entity>> {
        let payload: Option<String> = {
            let conn = self.conn.lock();
            conn.query_row(
                "SELECT payload FROM entities WHERE kind = ?1 AND id = ?2",
                params![kind.as_str(), id.as_str()],
                |row| row.get(0),
            )
            .optional()?
        };

        payload
            .map(|json| {
                serde_json::from_str::<Entity>(&json)
                    .with_context(|| format!("Corrupt {} record for {id}", kind.as_str()))
            })
            .transpose()
    }

    async fn upsert(&self, entity: Entity) -> Result<()> {
        let payload = serde_json::to_string(&entity)?;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO entities (kind, id, payload, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(kind, id) DO UPDATE SET
                payload    = excluded.payload,
                updated_at = excluded.updated_at",
            params![
                entity.kind().as_str(),
                entity.id().as_str(),
                payload,
                Utc::now().timestamp_millis(),
            ],
        )?;
        Ok(())
    }

    async fn list_ids(&self, kind: EntityKind) -> Result<Vec<EntityId>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT id FROM entities WHERE kind = ?1 ORDER BY id")?;
        let rows = stmt.query_map(params![kind.as_str()], |row| row.get::<_, String>(0))?;

        let mut ids = Vec::new();
        for row in rows {
            ids.push(EntityId(row?));
        }
        Ok(ids)
    }
}

#[async_trait]
impl SyncStateStore for SqliteDirectoryStore {
    async fn get_sync_state(&self, category: &str) -> Result<Option<SyncState>> {
        let conn = self.conn.lock();
        let row: Option<(i64, Option<Vec<u8>>)> = conn
            .query_row(
                "SELECT last_sync_at, progress_marker FROM sync_state WHERE category = ?1",
                params![category],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        Ok(row.map(|(ms, progress_marker)| SyncState {
            category: category.to_string(),
            last_sync_at: millis_to_datetime(ms),
            progress_marker,
        }))
    }

    async fn put_sync_state(&self, state: SyncState) -> Result<()> {
        // SET expressions see the pre-update row, so the marker follows the
        // timestamp only when the new timestamp wins.
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO sync_state (category, last_sync_at, progress_marker)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(category) DO UPDATE SET
                progress_marker = CASE
                    WHEN excluded.last_sync_at >= sync_state.last_sync_at
                    THEN excluded.progress_marker
                    ELSE sync_state.progress_marker
                END,
                last_sync_at = MAX(sync_state.last_sync_at, excluded.last_sync_at)",
            params![
                state.category,
                state.last_sync_at.timestamp_millis(),
                state.progress_marker,
            ],
        )?;
        Ok(())
    }
}
