//! History Ledger
//!
//! Append-only record of successful share runs. Rows are inserted once,
//! never updated, and removed individually, by id set, or all at once.
//! The pipeline itself never touches the ledger; callers build a
//! [`NewHistoryEntry`] from a finished run and insert it.

use crate::conversion_api::EncodeResult;
use crate::inspector::SourceImage;
use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, Connection, Row};
use serde::Serialize;
use shared_utils::{ensure_dir_exists, Result, ShareError};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

const SCHEMA_VERSION: i64 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryEntry {
    pub id: i64,
    pub source_uri: String,
    pub file_name: String,
    pub original_byte_length: u64,
    pub width: u32,
    pub height: u32,
    pub timestamp: DateTime<Utc>,
    /// Present whenever an output file was produced.
    pub compressed_byte_length: Option<u64>,
}

/// A row about to be inserted; the ledger assigns the id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewHistoryEntry {
    pub source_uri: String,
    pub file_name: String,
    pub original_byte_length: u64,
    pub width: u32,
    pub height: u32,
    pub timestamp: DateTime<Utc>,
    pub compressed_byte_length: Option<u64>,
}

impl NewHistoryEntry {
    pub fn from_conversion(
        source_uri: &str,
        source: &SourceImage,
        result: &EncodeResult,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            source_uri: source_uri.to_string(),
            file_name: source.file_name.clone(),
            original_byte_length: source.byte_length,
            width: source.width,
            height: source.height,
            timestamp: now,
            compressed_byte_length: Some(result.output_byte_length),
        }
    }
}

pub trait HistoryLedger: Send + Sync {
    /// Store `entry` and return its id.
    fn insert(&self, entry: &NewHistoryEntry) -> Result<i64>;

    /// Every entry, newest first. Calling again re-reads current state.
    fn list_all(&self) -> Result<Vec<HistoryEntry>>;

    /// Remove the given ids; unknown ids are ignored. Returns rows removed.
    fn delete_by_ids(&self, ids: &BTreeSet<i64>) -> Result<usize>;

    fn delete_all(&self) -> Result<usize>;

    fn delete(&self, id: i64) -> Result<bool> {
        Ok(self.delete_by_ids(&BTreeSet::from([id]))? > 0)
    }
}

fn db_err(context: &str) -> impl Fn(rusqlite::Error) -> ShareError + '_ {
    move |e| ShareError::History(format!("{}: {}", context, e))
}

/// SQLite-backed ledger.
pub struct SqliteLedger {
    conn: Mutex<Connection>,
}

impl SqliteLedger {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            ensure_dir_exists(parent).map_err(|e| ShareError::History(format!("{:#}", e)))?;
        }
        let conn = Connection::open(path).map_err(db_err("Failed to open history database"))?;
        info!(path = ?path, "Opened history ledger");
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_err("Failed to open in-memory database"))?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| ShareError::History("History connection lock poisoned".to_string()))
    }
}

fn init_schema(conn: &Connection) -> Result<()> {
    let version: i64 = conn
        .query_row("PRAGMA user_version", [], |row| row.get(0))
        .map_err(db_err("Failed to read schema version"))?;

    if version > SCHEMA_VERSION {
        return Err(ShareError::History(format!(
            "History database schema {} is newer than supported {}",
            version, SCHEMA_VERSION
        )));
    }

    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS history (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            source_uri TEXT NOT NULL,
            file_name TEXT NOT NULL,
            original_size INTEGER NOT NULL,
            width INTEGER NOT NULL,
            height INTEGER NOT NULL,
            timestamp INTEGER NOT NULL,
            compressed_size INTEGER
        );
        CREATE INDEX IF NOT EXISTS idx_history_timestamp ON history(timestamp DESC);",
    )
    .map_err(db_err("Failed to create history table"))?;

    if version < SCHEMA_VERSION {
        conn.execute_batch(&format!("PRAGMA user_version = {};", SCHEMA_VERSION))
            .map_err(db_err("Failed to write schema version"))?;
        debug!(from = version, to = SCHEMA_VERSION, "History schema initialized");
    }
    Ok(())
}

fn row_to_entry(row: &Row<'_>) -> rusqlite::Result<HistoryEntry> {
    let millis: i64 = row.get(6)?;
    let timestamp = DateTime::from_timestamp_millis(millis)
        .ok_or(rusqlite::Error::IntegralValueOutOfRange(6, millis))?;
    Ok(HistoryEntry {
        id: row.get(0)?,
        source_uri: row.get(1)?,
        file_name: row.get(2)?,
        original_byte_length: row.get::<_, i64>(3)?.max(0) as u64,
        width: row.get(4)?,
        height: row.get(5)?,
        timestamp,
        compressed_byte_length: row.get::<_, Option<i64>>(7)?.map(|v| v.max(0) as u64),
    })
}

impl HistoryLedger for SqliteLedger {
    fn insert(&self, entry: &NewHistoryEntry) -> Result<i64> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO history
                (source_uri, file_name, original_size, width, height, timestamp, compressed_size)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                entry.source_uri,
                entry.file_name,
                entry.original_byte_length as i64,
                entry.width,
                entry.height,
                entry.timestamp.timestamp_millis(),
                entry.compressed_byte_length.map(|v| v as i64),
            ],
        )
        .map_err(db_err("Failed to insert history entry"))?;
        let id = conn.last_insert_rowid();
        debug!(id, file = %entry.file_name, "History entry inserted");
        Ok(id)
    }

    fn list_all(&self) -> Result<Vec<HistoryEntry>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, source_uri, file_name, original_size, width, height, timestamp, compressed_size
                 FROM history
                 ORDER BY timestamp DESC, id DESC",
            )
            .map_err(db_err("Failed to prepare history query"))?;
        let entries = stmt
            .query_map([], row_to_entry)
            .map_err(db_err("Failed to query history"))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err("Failed to read history row"))?;
        Ok(entries)
    }

    fn delete_by_ids(&self, ids: &BTreeSet<i64>) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let placeholders = vec!["?"; ids.len()].join(", ");
        let sql = format!("DELETE FROM history WHERE id IN ({})", placeholders);
        let conn = self.lock()?;
        let removed = conn
            .execute(&sql, params_from_iter(ids.iter()))
            .map_err(db_err("Failed to delete history entries"))?;
        info!(requested = ids.len(), removed, "History entries deleted");
        Ok(removed)
    }

    fn delete_all(&self) -> Result<usize> {
        let conn = self.lock()?;
        let removed = conn
            .execute("DELETE FROM history", [])
            .map_err(db_err("Failed to clear history"))?;
        info!(removed, "History cleared");
        Ok(removed)
    }
}
