//! Query history models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::QueryResult;

/// Record of a previously executed statement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryHistoryEntry {
    /// Auto-increment ID from the history store (0 until stored)
    pub id: i64,
    /// Connection the statement ran on
    pub connection_id: Uuid,
    /// The executed SQL
    pub sql: String,
    /// Time to execute
    pub execution_time_ms: Option<i64>,
    /// Rows returned or affected
    pub row_count: Option<i64>,
    /// Error message if the statement failed
    pub error_message: Option<String>,
    /// Execution timestamp
    pub executed_at: DateTime<Utc>,
}

impl QueryHistoryEntry {
    /// Build an entry from a result, successful or failed.
    pub fn from_result(connection_id: Uuid, sql: impl Into<String>, result: &QueryResult) -> Self {
        Self {
            id: 0,
            connection_id,
            sql: sql.into(),
            execution_time_ms: Some(result.execution_time_ms as i64),
            row_count: if result.is_error() { None } else { Some(result.row_count as i64) },
            error_message: result.error_message().map(String::from),
            executed_at: Utc::now(),
        }
    }

    /// Build an entry for a statement that never produced a result.
    pub fn from_error(
        connection_id: Uuid,
        sql: impl Into<String>,
        error: impl std::fmt::Display,
    ) -> Self {
        Self {
            id: 0,
            connection_id,
            sql: sql.into(),
            execution_time_ms: None,
            row_count: None,
            error_message: Some(error.to_string()),
            executed_at: Utc::now(),
        }
    }

    /// Check if this entry represents a successful statement.
    pub fn is_success(&self) -> bool {
        self.error_message.is_none()
    }

    /// Check if this entry represents a failed statement.
    pub fn is_error(&self) -> bool {
        self.error_message.is_some()
    }

    /// First `max_chars` characters of the SQL, for list display.
    pub fn sql_preview(&self, max_chars: usize) -> &str {
        match self.sql.char_indices().nth(max_chars) {
            Some((end, _)) => &self.sql[..end],
            None => &self.sql,
        }
    }
}
