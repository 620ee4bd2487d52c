//! Query execution models.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use crate::error::TuskError;

/// A single result row, keyed by column name.
pub type Row = Map<String, JsonValue>;

/// A bound parameter value.
pub type QueryParam = JsonValue;

/// Type of SQL statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueryType {
    /// SELECT / WITH / SHOW / EXPLAIN returning rows
    Select,
    /// INSERT operation
    Insert,
    /// UPDATE operation
    Update,
    /// DELETE operation
    Delete,
    /// CREATE / ALTER / DROP / TRUNCATE / COMMENT
    Ddl,
    /// Anything else (SET, BEGIN, VACUUM, ...)
    Other,
}

impl QueryType {
    /// Detect the type of a SQL statement from its leading keyword.
    pub fn detect(sql: &str) -> Self {
        let keyword: String = crate::sql::leading_keyword(sql).to_uppercase();

        match keyword.as_str() {
            "SELECT" | "WITH" | "SHOW" | "EXPLAIN" | "VALUES" | "TABLE" | "PRAGMA" => Self::Select,
            "INSERT" | "REPLACE" => Self::Insert,
            "UPDATE" => Self::Update,
            "DELETE" => Self::Delete,
            "CREATE" | "ALTER" | "DROP" | "TRUNCATE" | "COMMENT" | "RENAME" => Self::Ddl,
            _ => Self::Other,
        }
    }

    /// Whether statements of this type report affected rows.
    pub fn is_dml(&self) -> bool {
        matches!(self, Self::Insert | Self::Update | Self::Delete)
    }
}

/// Column metadata from query results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    /// Column name
    pub name: String,
    /// Canonical type name (e.g. "INTEGER", "JSONB")
    pub data_type: String,
    /// Engine-native type identifier (PostgreSQL OID, SQLite declared type)
    pub type_id: String,
}

/// A statement failure captured into a result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryError {
    /// The engine's verbatim error text
    pub message: String,
    /// SQLSTATE or engine error code
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Additional detail
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// Actionable hint
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    /// Position in the statement (1-indexed)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<u32>,
}

impl QueryError {
    /// Create an error carrying only a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into(), code: None, detail: None, hint: None, position: None }
    }
}

impl From<&TuskError> for QueryError {
    fn from(err: &TuskError) -> Self {
        match err {
            TuskError::Query { message, code, detail, hint, position } => Self {
                message: message.clone(),
                code: code.clone(),
                detail: detail.clone(),
                hint: hint.clone().or_else(|| err.hint().map(String::from)),
                position: *position,
            },
            other => Self {
                message: other.to_string(),
                code: None,
                detail: None,
                hint: other.hint().map(String::from),
                position: None,
            },
        }
    }
}

impl std::fmt::Display for QueryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

/// Results from executing one statement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResult {
    /// Column metadata
    pub columns: Vec<ColumnInfo>,
    /// Result rows, in server order
    pub rows: Vec<Row>,
    /// Rows returned, or rows affected for DML without RETURNING
    pub row_count: u64,
    /// Rows affected (DML only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub affected_rows: Option<u64>,
    /// Wall-clock execution time in milliseconds
    pub execution_time_ms: u64,
    /// Type of statement
    pub query_type: QueryType,
    /// Set when the statement failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<QueryError>,
}

impl QueryResult {
    /// Result for a statement that returned rows.
    pub fn with_rows(
        columns: Vec<ColumnInfo>,
        rows: Vec<Row>,
        query_type: QueryType,
        execution_time_ms: u64,
    ) -> Self {
        Self {
            columns,
            row_count: rows.len() as u64,
            rows,
            affected_rows: None,
            execution_time_ms,
            query_type,
            error: None,
        }
    }

    /// Result for a statement that changed rows but returned none.
    pub fn with_affected(affected: u64, query_type: QueryType, execution_time_ms: u64) -> Self {
        Self {
            columns: Vec::new(),
            rows: Vec::new(),
            row_count: affected,
            affected_rows: Some(affected),
            execution_time_ms,
            query_type,
            error: None,
        }
    }

    /// Result for a failed statement.
    pub fn failed(error: QueryError, query_type: QueryType, execution_time_ms: u64) -> Self {
        Self {
            columns: Vec::new(),
            rows: Vec::new(),
            row_count: 0,
            affected_rows: None,
            execution_time_ms,
            query_type,
            error: Some(error),
        }
    }

    /// Check if the statement failed.
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Get the error message if the statement failed.
    pub fn error_message(&self) -> Option<&str> {
        self.error.as_ref().map(|e| e.message.as_str())
    }

    /// Check if the result is empty.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Get column names.
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Convert a failed result back into an error.
    pub fn into_result(self) -> Result<Self, TuskError> {
        match self.error {
            Some(error) => Err(TuskError::query_with_details(
                error.message,
                error.code,
                error.detail,
                error.hint,
                error.position,
            )),
            None => Ok(self),
        }
    }
}

/// Results from executing a multi-statement script.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultiQueryResult {
    /// One result per statement, in submission order
    pub results: Vec<QueryResult>,
    /// Sum of the statements' execution times in milliseconds
    pub total_execution_time_ms: u64,
}

impl MultiQueryResult {
    /// Build from per-statement results.
    pub fn from_results(results: Vec<QueryResult>) -> Self {
        let total_execution_time_ms = results.iter().map(|r| r.execution_time_ms).sum();
        Self { results, total_execution_time_ms }
    }

    /// Number of statements that failed.
    pub fn error_count(&self) -> usize {
        self.results.iter().filter(|r| r.is_error()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_type_detection() {
        assert_eq!(QueryType::detect("SELECT * FROM users"), QueryType::Select);
        assert_eq!(QueryType::detect("  select 1"), QueryType::Select);
        assert_eq!(QueryType::detect("WITH c AS (SELECT 1) SELECT * FROM c"), QueryType::Select);
        assert_eq!(QueryType::detect("-- note\nINSERT INTO t VALUES (1)"), QueryType::Insert);
        assert_eq!(QueryType::detect("/* x */ UPDATE t SET a = 1"), QueryType::Update);
        assert_eq!(QueryType::detect("DELETE FROM t"), QueryType::Delete);
        assert_eq!(QueryType::detect("CREATE TABLE t (id INT)"), QueryType::Ddl);
        assert_eq!(QueryType::detect("BEGIN"), QueryType::Other);
        assert_eq!(QueryType::detect(""), QueryType::Other);
    }

    #[test]
    fn test_multi_result_sums_execution_time() {
        let ok = QueryResult::with_rows(Vec::new(), Vec::new(), QueryType::Select, 4);
        let failed = QueryResult::failed(QueryError::new("boom"), QueryType::Select, 3);
        let multi = MultiQueryResult::from_results(vec![ok, failed]);
        assert_eq!(multi.total_execution_time_ms, 7);
        assert_eq!(multi.error_count(), 1);
    }

    #[test]
    fn test_failed_result_converts_back_to_query_error() {
        let mut error = QueryError::new("column \"x\" does not exist");
        error.code = Some("42703".to_string());
        let result = QueryResult::failed(error, QueryType::Select, 1);
        let err = result.into_result().unwrap_err();
        assert_eq!(err.code(), Some("42703"));
        assert!(err.is_statement_error());
    }

    #[test]
    fn test_error_is_omitted_from_json_on_success() {
        let result = QueryResult::with_affected(3, QueryType::Update, 2);
        let json = serde_json::to_value(&result).unwrap();
        assert!(json.get("error").is_none());
        assert_eq!(json["affected_rows"], 3);
        assert_eq!(json["row_count"], 3);
    }
}
