//! DuckDB-backed checkpoint store and record sink

use crate::decode::{Record, RecordKey};
use crate::error::{Error, Result};
use crate::sink::{RecordSink, UpsertSummary};
use crate::state::{Checkpoint, CheckpointStore};
use crate::types::{JsonObject, JsonValue};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use duckdb::{params, Connection};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::debug;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS checkpoints (
    collection_id TEXT PRIMARY KEY,
    "cursor" TEXT,
    is_complete BOOLEAN NOT NULL DEFAULT false,
    last_updated_at TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS records (
    record_id TEXT NOT NULL,
    collection_id TEXT NOT NULL,
    fields TEXT NOT NULL,
    data TEXT NOT NULL,
    collected_at TEXT NOT NULL,
    PRIMARY KEY (record_id, collection_id)
);
"#;

const SAVE_CHECKPOINT: &str = r#"
INSERT INTO checkpoints (collection_id, "cursor", is_complete, last_updated_at)
VALUES (?, ?, ?, ?)
ON CONFLICT (collection_id) DO UPDATE SET
    "cursor" = excluded."cursor",
    is_complete = excluded.is_complete,
    last_updated_at = excluded.last_updated_at
"#;

const UPSERT_RECORD: &str = r"
INSERT INTO records (record_id, collection_id, fields, data, collected_at)
VALUES (?, ?, ?, ?, ?)
ON CONFLICT (record_id, collection_id) DO UPDATE SET
    fields = excluded.fields,
    data = excluded.data,
    collected_at = excluded.collected_at
";

/// Checkpoints and records in one DuckDB database
///
/// Every operation runs on its own connection cloned from a shared handle, so
/// transactions of different collections run side by side and DuckDB's concurrency
/// control only serializes writers that touch the same rows.
#[derive(Clone)]
pub struct DuckDbStore {
    conn: Arc<Mutex<Connection>>,
    path: Option<PathBuf>,
}

impl DuckDbStore {
    /// Open (or create) a database file and ensure the tables exist
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(&path)
            .map_err(|e| Error::storage(format!("Failed to open {}: {e}", path.display())))?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            path: Some(path),
        };
        store.migrate()?;
        Ok(store)
    }

    /// Create a throwaway in-memory database
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::storage(format!("Failed to create DuckDB connection: {e}")))?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            path: None,
        };
        store.migrate()?;
        Ok(store)
    }

    /// Create the tables if they do not exist
    pub fn migrate(&self) -> Result<()> {
        let conn = self.connection()?;
        conn.execute_batch(SCHEMA)
            .map_err(|e| Error::storage(format!("Failed to create tables: {e}")))?;
        Ok(())
    }

    /// Database file, or `None` for an in-memory store
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// All records of one collection ordered by record id
    pub async fn records(&self, collection_id: &str) -> Result<Vec<Record>> {
        let collection_id = collection_id.to_string();
        self.blocking(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT record_id, collection_id, fields, data, collected_at \
                 FROM records WHERE collection_id = ? ORDER BY record_id",
            )?;
            let rows = stmt
                .query_map(params![collection_id], |row| {
                    Ok(RawRecord {
                        record_id: row.get(0)?,
                        collection_id: row.get(1)?,
                        fields: row.get(2)?,
                        data: row.get(3)?,
                        collected_at: row.get(4)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows.into_iter().map(RawRecord::into_record).collect()
        })
        .await
    }

    /// A fresh connection to the same database
    pub(super) fn connection(&self) -> Result<Connection> {
        let handle = self
            .conn
            .lock()
            .map_err(|_| Error::storage("DuckDB connection lock poisoned"))?;
        handle
            .try_clone()
            .map_err(|e| Error::storage(format!("Failed to clone DuckDB connection: {e}")))
    }

    /// Run a closure on its own connection on the blocking pool
    async fn blocking<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let store = self.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = store.connection()?;
            f(&mut conn)
        })
        .await
        .map_err(|e| Error::storage(format!("Storage task failed: {e}")))?
    }
}

impl std::fmt::Debug for DuckDbStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DuckDbStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Checkpoints
// ============================================================================

#[async_trait]
impl CheckpointStore for DuckDbStore {
    async fn load(&self, collection_id: &str) -> Result<Checkpoint> {
        let collection_id = collection_id.to_string();
        self.blocking(move |conn| {
            let mut stmt = conn.prepare(
                r#"SELECT "cursor", is_complete, last_updated_at FROM checkpoints WHERE collection_id = ?"#,
            )?;
            let mut rows = stmt.query_map(params![collection_id], |row| {
                Ok((
                    row.get::<_, Option<String>>(0)?,
                    row.get::<_, bool>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?;

            match rows.next() {
                Some(row) => {
                    let (cursor, is_complete, updated) = row?;
                    Ok(Checkpoint {
                        collection_id,
                        cursor,
                        is_complete,
                        last_updated_at: Some(parse_timestamp(&updated)?),
                    })
                }
                None => Ok(Checkpoint::new(collection_id)),
            }
        })
        .await
    }

    async fn save(
        &self,
        collection_id: &str,
        cursor: Option<&str>,
        is_complete: bool,
    ) -> Result<()> {
        let collection_id = collection_id.to_string();
        let cursor = cursor.map(ToString::to_string);
        self.blocking(move |conn| {
            conn.execute(
                SAVE_CHECKPOINT,
                params![collection_id, cursor, is_complete, Utc::now().to_rfc3339()],
            )
            .map_err(|e| Error::checkpoint(format!("Failed to save checkpoint: {e}")))?;
            Ok(())
        })
        .await
    }

    async fn reset(&self, collection_id: &str) -> Result<bool> {
        let collection_id = collection_id.to_string();
        self.blocking(move |conn| {
            let deleted = conn.execute(
                "DELETE FROM checkpoints WHERE collection_id = ?",
                params![collection_id],
            )?;
            Ok(deleted > 0)
        })
        .await
    }

    async fn list(&self) -> Result<Vec<Checkpoint>> {
        self.blocking(|conn| {
            let mut stmt = conn.prepare(
                r#"SELECT collection_id, "cursor", is_complete, last_updated_at FROM checkpoints ORDER BY collection_id"#,
            )?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, bool>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            rows.into_iter()
                .map(|(collection_id, cursor, is_complete, updated)| {
                    Ok(Checkpoint {
                        collection_id,
                        cursor,
                        is_complete,
                        last_updated_at: Some(parse_timestamp(&updated)?),
                    })
                })
                .collect()
        })
        .await
    }
}

// ============================================================================
// Records
// ============================================================================

#[async_trait]
impl RecordSink for DuckDbStore {
    async fn upsert(&self, records: &[Record]) -> Result<UpsertSummary> {
        if records.is_empty() {
            return Ok(UpsertSummary::default());
        }

        // A key repeated within one page keeps its last occurrence
        let latest: BTreeMap<&RecordKey, &Record> =
            records.iter().map(|r| (&r.key, r)).collect();
        let rows = latest
            .into_values()
            .map(RawRecord::from_record)
            .collect::<Result<Vec<_>>>()?;

        self.blocking(move |conn| {
            let tx = conn.transaction()?;
            let mut summary = UpsertSummary::default();
            {
                let mut exists = tx.prepare(
                    "SELECT COUNT(*) FROM records WHERE record_id = ? AND collection_id = ?",
                )?;
                let mut upsert = tx.prepare(UPSERT_RECORD)?;
                for row in &rows {
                    let existing: i64 = exists
                        .query_row(params![row.record_id, row.collection_id], |r| r.get(0))?;
                    upsert.execute(params![
                        row.record_id,
                        row.collection_id,
                        row.fields,
                        row.data,
                        row.collected_at,
                    ])?;
                    if existing > 0 {
                        summary.updated += 1;
                    } else {
                        summary.inserted += 1;
                    }
                }
            }
            tx.commit()?;
            debug!(
                inserted = summary.inserted,
                updated = summary.updated,
                "Upserted records"
            );
            Ok(summary)
        })
        .await
    }

    async fn get(&self, key: &RecordKey) -> Result<Option<Record>> {
        let key = key.clone();
        self.blocking(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT record_id, collection_id, fields, data, collected_at \
                 FROM records WHERE record_id = ? AND collection_id = ?",
            )?;
            let mut rows = stmt.query_map(params![key.record_id, key.collection_id], |row| {
                Ok(RawRecord {
                    record_id: row.get(0)?,
                    collection_id: row.get(1)?,
                    fields: row.get(2)?,
                    data: row.get(3)?,
                    collected_at: row.get(4)?,
                })
            })?;
            match rows.next() {
                Some(raw) => Ok(Some(raw?.into_record()?)),
                None => Ok(None),
            }
        })
        .await
    }

    async fn count(&self, collection_id: Option<&str>) -> Result<usize> {
        let collection_id = collection_id.map(ToString::to_string);
        self.blocking(move |conn| {
            let count: i64 = match collection_id {
                Some(id) => conn.query_row(
                    "SELECT COUNT(*) FROM records WHERE collection_id = ?",
                    params![id],
                    |row| row.get(0),
                )?,
                None => conn.query_row("SELECT COUNT(*) FROM records", [], |row| row.get(0))?,
            };
            Ok(count as usize)
        })
        .await
    }
}

// ============================================================================
// Row Conversion
// ============================================================================

/// A record as stored: JSON columns as text, timestamp as RFC 3339
struct RawRecord {
    record_id: String,
    collection_id: String,
    fields: String,
    data: String,
    collected_at: String,
}

impl RawRecord {
    fn from_record(record: &Record) -> Result<Self> {
        Ok(Self {
            record_id: record.key.record_id.clone(),
            collection_id: record.key.collection_id.clone(),
            fields: serde_json::to_string(&record.fields)?,
            data: serde_json::to_string(&record.payload)?,
            collected_at: record.collected_at.to_rfc3339(),
        })
    }

    fn into_record(self) -> Result<Record> {
        let fields: JsonObject = serde_json::from_str(&self.fields)?;
        let payload: JsonValue = serde_json::from_str(&self.data)?;
        Ok(Record {
            key: RecordKey::new(self.record_id, self.collection_id),
            fields,
            payload,
            collected_at: parse_timestamp(&self.collected_at)?,
        })
    }
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::storage(format!("Invalid stored timestamp '{value}': {e}")))
}
