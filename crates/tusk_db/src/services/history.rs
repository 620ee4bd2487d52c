//! Local SQLite store for query history.
//!
//! Drivers hand every executed statement to a [`HistoryRecorder`] after it
//! completes. [`HistoryStore`] is the on-disk implementation.
//!
//! # Data Directory Locations
//!
//! - **macOS**: `~/Library/Application Support/dev.tusk.Tusk`
//! - **Windows**: `%APPDATA%\tusk\Tusk`
//! - **Linux**: `~/.local/share/tusk`
//! - **Debug builds**: `./tusk_data` in current directory

use crate::error::{TuskError, TuskResult};
use crate::models::QueryHistoryEntry;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection};
use std::path::{Path, PathBuf};
use uuid::Uuid;

const HISTORY_COLUMNS: &str =
    "history_id, connection_id, sql_text, execution_time_ms, row_count, error_message, executed_at";

/// Receives one entry per executed statement.
pub trait HistoryRecorder: Send + Sync {
    /// Persist an entry.
    fn record(&self, entry: &QueryHistoryEntry) -> TuskResult<()>;
}

/// Get the default data directory for the application.
pub fn default_data_dir() -> PathBuf {
    #[cfg(debug_assertions)]
    {
        PathBuf::from("./tusk_data")
    }

    #[cfg(not(debug_assertions))]
    {
        dirs::data_dir()
            .map(|d| {
                #[cfg(target_os = "macos")]
                {
                    d.join("dev.tusk.Tusk")
                }
                #[cfg(target_os = "windows")]
                {
                    d.join("tusk").join("Tusk")
                }
                #[cfg(not(any(target_os = "macos", target_os = "windows")))]
                {
                    d.join("tusk")
                }
            })
            .unwrap_or_else(|| PathBuf::from("./tusk_data"))
    }
}

/// Create the data directory if needed.
pub fn init_data_dir(path: &Path) -> TuskResult<()> {
    if path.exists() {
        if !path.is_dir() {
            return Err(TuskError::storage(
                format!("Data path exists but is not a directory: {}", path.display()),
                Some("Select a different location or remove the existing file"),
            ));
        }
        return Ok(());
    }

    std::fs::create_dir_all(path).map_err(|e| {
        TuskError::storage(
            format!("Failed to create data directory '{}': {}", path.display(), e),
            Some("Check permissions or select a different location"),
        )
    })?;

    tracing::info!(path = %path.display(), "Created data directory");
    Ok(())
}

/// SQLite-backed history store.
///
/// Thread-safe via internal Mutex. Uses WAL mode for file databases.
pub struct HistoryStore {
    connection: Mutex<Connection>,
}

impl HistoryStore {
    /// Open or create `history.db` in the given data directory.
    pub fn open(data_dir: &Path) -> TuskResult<Self> {
        init_data_dir(data_dir)?;
        Self::open_with_path(&data_dir.join("history.db"))
    }

    /// Open a store at a specific database path.
    pub fn open_with_path(db_path: &Path) -> TuskResult<Self> {
        let connection = Connection::open(db_path).map_err(|e| {
            TuskError::storage(
                format!("Failed to open history database '{}': {}", db_path.display(), e),
                Some("The database file may be corrupted. Try deleting it to start fresh."),
            )
        })?;
        Self::configure_connection(&connection)?;
        let store = Self::from_connection(connection)?;
        tracing::info!(path = %db_path.display(), "History store opened");
        Ok(store)
    }

    /// Open a throwaway in-memory store.
    pub fn open_in_memory() -> TuskResult<Self> {
        let connection = Connection::open_in_memory()
            .map_err(|e| TuskError::storage(format!("Failed to open history database: {e}"), None))?;
        Self::from_connection(connection)
    }

    fn from_connection(connection: Connection) -> TuskResult<Self> {
        let store = Self { connection: Mutex::new(connection) };
        store.run_migrations()?;
        Ok(store)
    }

    fn configure_connection(conn: &Connection) -> TuskResult<()> {
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA busy_timeout = 5000;
            PRAGMA temp_store = MEMORY;
            ",
        )
        .map_err(|e| TuskError::storage(format!("Failed to configure history database: {e}"), None))
    }

    fn run_migrations(&self) -> TuskResult<()> {
        const DOMAIN: &str = "history";
        let conn = self.connection.lock();

        conn.execute(
            "CREATE TABLE IF NOT EXISTS migrations (
                domain TEXT NOT NULL,
                step INTEGER NOT NULL,
                migration TEXT NOT NULL,
                PRIMARY KEY(domain, step)
            ) STRICT",
            [],
        )
        .map_err(|e| TuskError::storage(format!("Failed to create migrations table: {e}"), None))?;

        let current_step: i32 = conn
            .query_row(
                "SELECT COALESCE(MAX(step), 0) FROM migrations WHERE domain = ?",
                [DOMAIN],
                |row| row.get(0),
            )
            .map_err(|e| TuskError::storage(format!("Failed to read migration level: {e}"), None))?;

        if current_step < 1 {
            conn.execute_batch(
                "
                CREATE TABLE query_history (
                    history_id INTEGER PRIMARY KEY,
                    connection_id TEXT NOT NULL,
                    sql_text TEXT NOT NULL,
                    execution_time_ms INTEGER,
                    row_count INTEGER,
                    error_message TEXT,
                    executed_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
                ) STRICT;

                CREATE INDEX idx_query_history_connection ON query_history(connection_id, executed_at DESC);
                CREATE INDEX idx_query_history_executed ON query_history(executed_at DESC);
                ",
            )
            .map_err(|e| TuskError::storage(format!("Migration 1 failed: {e}"), None))?;

            conn.execute(
                "INSERT INTO migrations (domain, step, migration) VALUES (?, 1, 'query_history')",
                [DOMAIN],
            )
            .map_err(|e| TuskError::storage(format!("Failed to record migration: {e}"), None))?;

            tracing::info!("Applied history migration 1: query_history");
        }

        Ok(())
    }

    /// Add an entry, returning its ID.
    pub fn add(&self, entry: &QueryHistoryEntry) -> TuskResult<i64> {
        let conn = self.connection.lock();

        conn.execute(
            "INSERT INTO query_history (connection_id, sql_text, execution_time_ms, row_count, error_message, executed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                entry.connection_id.to_string(),
                entry.sql,
                entry.execution_time_ms,
                entry.row_count,
                entry.error_message,
                entry.executed_at.to_rfc3339(),
            ],
        )
        .map_err(|e| TuskError::storage(format!("Failed to add to history: {e}"), None))?;

        let id = conn.last_insert_rowid();
        tracing::trace!(history_id = id, connection_id = %entry.connection_id, "Statement added to history");
        Ok(id)
    }

    /// Most recent entries for one connection.
    pub fn load(&self, connection_id: Uuid, limit: usize) -> TuskResult<Vec<QueryHistoryEntry>> {
        let conn = self.connection.lock();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {HISTORY_COLUMNS} FROM query_history
                 WHERE connection_id = ?
                 ORDER BY executed_at DESC, history_id DESC
                 LIMIT ?"
            ))
            .map_err(|e| TuskError::storage(format!("Failed to prepare query: {e}"), None))?;

        Self::collect_entries(&mut stmt, params![connection_id.to_string(), limit as i64])
    }

    /// Most recent entries across all connections.
    pub fn load_all(&self, limit: usize) -> TuskResult<Vec<QueryHistoryEntry>> {
        let conn = self.connection.lock();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {HISTORY_COLUMNS} FROM query_history
                 ORDER BY executed_at DESC, history_id DESC
                 LIMIT ?"
            ))
            .map_err(|e| TuskError::storage(format!("Failed to prepare query: {e}"), None))?;

        Self::collect_entries(&mut stmt, params![limit as i64])
    }

    /// Entries whose SQL contains `text`, optionally limited to one connection.
    pub fn search(
        &self,
        text: &str,
        connection_id: Option<Uuid>,
        limit: usize,
    ) -> TuskResult<Vec<QueryHistoryEntry>> {
        let conn = self.connection.lock();
        let pattern = format!("%{text}%");

        match connection_id {
            Some(id) => {
                let mut stmt = conn
                    .prepare(&format!(
                        "SELECT {HISTORY_COLUMNS} FROM query_history
                         WHERE sql_text LIKE ? AND connection_id = ?
                         ORDER BY executed_at DESC, history_id DESC
                         LIMIT ?"
                    ))
                    .map_err(|e| TuskError::storage(format!("Failed to prepare query: {e}"), None))?;
                Self::collect_entries(&mut stmt, params![pattern, id.to_string(), limit as i64])
            }
            None => {
                let mut stmt = conn
                    .prepare(&format!(
                        "SELECT {HISTORY_COLUMNS} FROM query_history
                         WHERE sql_text LIKE ?
                         ORDER BY executed_at DESC, history_id DESC
                         LIMIT ?"
                    ))
                    .map_err(|e| TuskError::storage(format!("Failed to prepare query: {e}"), None))?;
                Self::collect_entries(&mut stmt, params![pattern, limit as i64])
            }
        }
    }

    fn collect_entries(
        stmt: &mut rusqlite::Statement,
        params: impl rusqlite::Params,
    ) -> TuskResult<Vec<QueryHistoryEntry>> {
        let rows = stmt
            .query_map(params, |row| {
                let connection_id: String = row.get(1)?;
                let executed_at: String = row.get(6)?;

                Ok(QueryHistoryEntry {
                    id: row.get(0)?,
                    connection_id: Uuid::parse_str(&connection_id).unwrap_or_default(),
                    sql: row.get(2)?,
                    execution_time_ms: row.get(3)?,
                    row_count: row.get(4)?,
                    error_message: row.get(5)?,
                    executed_at: DateTime::parse_from_rfc3339(&executed_at)
                        .map(|dt| dt.with_timezone(&Utc))
                        .unwrap_or_else(|_| Utc::now()),
                })
            })
            .map_err(|e| TuskError::storage(format!("Failed to query history: {e}"), None))?;

        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| TuskError::storage(format!("Failed to read history: {e}"), None))
    }

    /// Clear history for one connection.
    pub fn clear(&self, connection_id: Uuid) -> TuskResult<()> {
        let conn = self.connection.lock();
        conn.execute(
            "DELETE FROM query_history WHERE connection_id = ?",
            [connection_id.to_string()],
        )
        .map_err(|e| TuskError::storage(format!("Failed to clear history: {e}"), None))?;

        tracing::debug!(connection_id = %connection_id, "Query history cleared");
        Ok(())
    }

    /// Clear all history.
    pub fn clear_all(&self) -> TuskResult<()> {
        let conn = self.connection.lock();
        conn.execute("DELETE FROM query_history", [])
            .map_err(|e| TuskError::storage(format!("Failed to clear all history: {e}"), None))?;

        tracing::debug!("All query history cleared");
        Ok(())
    }
}

impl HistoryRecorder for HistoryStore {
    fn record(&self, entry: &QueryHistoryEntry) -> TuskResult<()> {
        self.add(entry).map(|_| ())
    }
}
