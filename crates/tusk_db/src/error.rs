//! Error types for the Tusk driver layer.
//!
//! Only connection and precondition failures escape as `Err`. Statement
//! failures are folded into [`QueryError`](crate::models::QueryError) inside
//! the returned result so batches can keep going.

use thiserror::Error;

use crate::models::EngineType;

/// Main error type for the driver layer.
#[derive(Debug, Error)]
pub enum TuskError {
    /// A connection could not be established or was lost.
    #[error("Connection error: {message}")]
    Connection {
        /// Human-readable error message.
        message: String,
        /// Actionable hint for the user.
        hint: Option<String>,
        /// Optional underlying error source.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// TLS setup or handshake failure.
    #[error("SSL error: {message}")]
    Ssl {
        /// Human-readable error message.
        message: String,
        /// Optional underlying error source.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Operation attempted on a handle that is not connected.
    #[error("Precondition failed: {message}")]
    Precondition {
        /// What the caller did wrong.
        message: String,
    },

    /// A statement failed. Carries the engine's verbatim message.
    #[error("{message}")]
    Query {
        /// Engine error message.
        message: String,
        /// SQLSTATE or engine error code.
        code: Option<String>,
        /// Additional detail from the engine.
        detail: Option<String>,
        /// Engine-provided hint.
        hint: Option<String>,
        /// Position in the statement (1-indexed).
        position: Option<u32>,
    },

    /// The factory has no driver for this engine.
    #[error("Unsupported engine: {engine}")]
    UnsupportedEngine {
        /// Engine that was requested.
        engine: EngineType,
    },

    /// Local history storage error.
    #[error("Storage error: {message}")]
    Storage {
        /// Human-readable error message.
        message: String,
        /// Actionable hint for the user.
        hint: Option<String>,
        /// Optional underlying error source.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Unexpected internal error.
    #[error("Internal error: {message}")]
    Internal {
        /// Human-readable error message.
        message: String,
        /// Optional underlying error source.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

/// Result alias used throughout the crate.
pub type TuskResult<T> = Result<T, TuskError>;

impl TuskError {
    // ========== Constructors ==========

    /// Create a new connection error.
    pub fn connection(message: impl Into<String>) -> Self {
        let message = message.into();
        let hint = Some(connection_hint(&message).to_string());
        Self::Connection { message, hint, source: None }
    }

    /// Create a connection error with a custom hint.
    pub fn connection_with_hint(message: impl Into<String>, hint: impl Into<String>) -> Self {
        Self::Connection { message: message.into(), hint: Some(hint.into()), source: None }
    }

    /// Create a new connection error with source.
    pub fn connection_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        let message = message.into();
        let hint = Some(connection_hint(&message).to_string());
        Self::Connection { message, hint, source: Some(Box::new(source)) }
    }

    /// Create a new SSL error.
    pub fn ssl(message: impl Into<String>) -> Self {
        Self::Ssl { message: message.into(), source: None }
    }

    /// Create a new SSL error with source.
    pub fn ssl_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Ssl { message: message.into(), source: Some(Box::new(source)) }
    }

    /// Create a precondition error.
    pub fn precondition(message: impl Into<String>) -> Self {
        Self::Precondition { message: message.into() }
    }

    /// Create a "not connected" precondition error.
    pub fn not_connected(connection_name: &str) -> Self {
        Self::precondition(format!("Connection '{connection_name}' is not connected"))
    }

    /// Create a statement error with only a message.
    pub fn query(message: impl Into<String>) -> Self {
        Self::Query { message: message.into(), code: None, detail: None, hint: None, position: None }
    }

    /// Create a statement error with full engine details.
    pub fn query_with_details(
        message: impl Into<String>,
        code: Option<String>,
        detail: Option<String>,
        hint: Option<String>,
        position: Option<u32>,
    ) -> Self {
        Self::Query { message: message.into(), code, detail, hint, position }
    }

    /// Create a new storage error.
    pub fn storage(message: impl Into<String>, hint: Option<&str>) -> Self {
        Self::Storage { message: message.into(), hint: hint.map(String::from), source: None }
    }

    /// Create a new internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into(), source: None }
    }

    // ========== Methods ==========

    /// Whether the error means the transport is gone.
    pub fn is_connection_lost(&self) -> bool {
        matches!(self, Self::Connection { .. })
    }

    /// Whether the error is a statement-level failure.
    pub fn is_statement_error(&self) -> bool {
        matches!(self, Self::Query { .. })
    }

    /// Get the error category name.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Connection { .. } => "Connection",
            Self::Ssl { .. } => "SSL",
            Self::Precondition { .. } => "Precondition",
            Self::Query { .. } => "Query",
            Self::UnsupportedEngine { .. } => "Engine",
            Self::Storage { .. } => "Storage",
            Self::Internal { .. } => "Internal",
        }
    }

    /// Get actionable hint for the user.
    pub fn hint(&self) -> Option<&str> {
        match self {
            Self::Connection { hint, .. } => hint.as_deref(),
            Self::Ssl { .. } => Some("Verify SSL certificate configuration"),
            Self::Precondition { .. } => Some("Connect before running this operation"),
            Self::Query { hint, code, .. } => {
                hint.as_deref().or_else(|| code.as_deref().and_then(hint_for_sqlstate))
            }
            Self::UnsupportedEngine { .. } => Some("This engine is not available in this build"),
            Self::Storage { hint, .. } => hint.as_deref(),
            Self::Internal { .. } => Some("Please report this issue"),
        }
    }

    /// Get the SQLSTATE / engine error code (if applicable).
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Query { code, .. } => code.as_deref(),
            _ => None,
        }
    }

    /// Get position in query (if applicable).
    pub fn position(&self) -> Option<u32> {
        match self {
            Self::Query { position, .. } => *position,
            _ => None,
        }
    }

    /// Convert to user-displayable error info.
    pub fn to_error_info(&self) -> ErrorInfo {
        let technical_detail = match self {
            Self::Query { detail, code, position, .. } => {
                let mut parts = Vec::new();
                if let Some(code) = code {
                    parts.push(format!("Code: {code}"));
                }
                if let Some(pos) = position {
                    parts.push(format!("Position: {pos}"));
                }
                if let Some(detail) = detail {
                    parts.push(format!("Detail: {detail}"));
                }
                if parts.is_empty() {
                    None
                } else {
                    Some(parts.join("\n"))
                }
            }
            _ => None,
        };

        ErrorInfo {
            error_type: format!("{} Error", self.category()),
            message: self.to_string(),
            hint: self.hint().map(String::from),
            code: self.code().map(String::from),
            position: self.position(),
            technical_detail,
        }
    }
}

/// User-displayable error information.
#[derive(Debug, Clone)]
pub struct ErrorInfo {
    /// Category name (e.g., "Connection Error").
    pub error_type: String,
    /// User-friendly message.
    pub message: String,
    /// Actionable suggestion.
    pub hint: Option<String>,
    /// SQLSTATE or engine code.
    pub code: Option<String>,
    /// Position in the statement.
    pub position: Option<u32>,
    /// Technical detail for "Show Details" expansion.
    pub technical_detail: Option<String>,
}

/// Hint for common SQLSTATE codes.
fn hint_for_sqlstate(code: &str) -> Option<&'static str> {
    // https://www.postgresql.org/docs/current/errcodes-appendix.html
    match code {
        "08000" | "08003" | "08006" => {
            Some("Check that the database server is running and accepting connections")
        }
        "08001" => Some("Unable to connect. Verify host, port, and network connectivity"),
        "28000" => Some("Invalid authorization. Check username and password"),
        "28P01" => Some("Password authentication failed. Verify your password is correct"),
        "3D000" => Some("Database does not exist. Check the database name"),
        "3F000" => Some("Schema does not exist. Check the schema name"),
        "42601" => Some("SQL syntax error. Check your query syntax"),
        "42501" => Some("Permission denied. You may not have access to this object"),
        "42P01" => Some("Table does not exist. Check the table name and schema"),
        "42703" => Some("Column does not exist. Check column names in your query"),
        "42883" => Some("Function does not exist. Check the function name and argument types"),
        "42P07" => Some("An object with this name already exists"),
        "23505" => Some("A row with this key already exists"),
        "23503" => Some("The row is referenced by, or references, a missing foreign key"),
        "53300" => Some("Too many connections. Try again later or increase max_connections"),
        "57014" => Some("The statement was cancelled"),
        _ => None,
    }
}

/// Hint for a connection failure, based on its message.
fn connection_hint(message: &str) -> &'static str {
    let lower = message.to_lowercase();

    if lower.contains("connection refused") {
        "Check that the server is running and accepting connections on the specified host and port"
    } else if lower.contains("timeout") || lower.contains("timed out") {
        "The connection timed out. Check network connectivity and firewall settings"
    } else if lower.contains("ssl") || lower.contains("tls") || lower.contains("certificate") {
        "SSL/TLS error. Check SSL settings and certificate configuration"
    } else if lower.contains("authentication") || lower.contains("password") {
        "Authentication failed. Verify your username and password"
    } else if lower.contains("unable to open") || lower.contains("no such file") {
        "Check that the database file exists and is readable"
    } else {
        "Check that the database server is running"
    }
}

// ========== Error Conversions ==========

/// Convert from tokio_postgres::Error, keeping PostgreSQL error metadata.
impl From<tokio_postgres::Error> for TuskError {
    fn from(err: tokio_postgres::Error) -> Self {
        if let Some(db_err) = err.as_db_error() {
            let message = db_err.message().to_string();
            let code = db_err.code().code();

            if ends_session(code) {
                let hint = hint_for_sqlstate(code).unwrap_or("Check connection settings");
                return TuskError::Connection {
                    message,
                    hint: Some(hint.to_string()),
                    source: Some(Box::new(err)),
                };
            }

            let position = db_err.position().map(|p| match p {
                tokio_postgres::error::ErrorPosition::Original(pos) => *pos,
                tokio_postgres::error::ErrorPosition::Internal { position, .. } => *position,
            });

            return TuskError::Query {
                message,
                code: Some(code.to_string()),
                detail: db_err.detail().map(String::from),
                hint: db_err.hint().map(String::from),
                position,
            };
        }

        if err.is_closed() {
            return TuskError::connection_with_source("Connection closed", err);
        }

        // Protocol-level failures with no server error (e.g. a parameter that fails to encode)
        // are statement failures unless the message points at the transport.
        let message = err.to_string();
        let lower = message.to_lowercase();
        if lower.contains("connection") || lower.contains("i/o") || lower.contains("timeout") {
            TuskError::connection_with_source(message, err)
        } else {
            TuskError::query(message)
        }
    }
}

/// Connection exceptions (class 08) end the session. Authorization
/// failures (class 28) only reach this conversion after the handshake,
/// where they belong to one statement; the connect path reports its own
/// failures as connection errors.
fn ends_session(code: &str) -> bool {
    code.starts_with("08")
}

/// Convert from rusqlite::Error. Statement failures stay statement failures.
impl From<rusqlite::Error> for TuskError {
    fn from(err: rusqlite::Error) -> Self {
        let message = err.to_string();
        match &err {
            rusqlite::Error::SqliteFailure(ffi_err, msg) => {
                let code = format!("{:?}", ffi_err.code);
                match ffi_err.code {
                    rusqlite::ffi::ErrorCode::CannotOpen
                    | rusqlite::ffi::ErrorCode::NotADatabase => {
                        TuskError::connection_with_source(message, err)
                    }
                    _ => TuskError::Query {
                        message: msg.clone().unwrap_or(message),
                        code: Some(code),
                        detail: None,
                        hint: None,
                        position: None,
                    },
                }
            }
            _ => TuskError::query(message),
        }
    }
}

/// Convert from std::io::Error to TuskError.
impl From<std::io::Error> for TuskError {
    fn from(err: std::io::Error) -> Self {
        TuskError::Storage {
            message: err.to_string(),
            hint: Some("Check file permissions and disk space".to_string()),
            source: Some(Box::new(err)),
        }
    }
}

/// Convert from serde_json::Error to TuskError.
impl From<serde_json::Error> for TuskError {
    fn from(err: serde_json::Error) -> Self {
        TuskError::Internal {
            message: format!("Failed to decode catalog row: {err}"),
            source: Some(Box::new(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_error_falls_back_to_sqlstate_hint() {
        let error = TuskError::query_with_details(
            "relation \"users\" does not exist",
            Some("42P01".to_string()),
            None,
            None,
            Some(15),
        );
        let info = error.to_error_info();
        assert_eq!(info.error_type, "Query Error");
        assert_eq!(info.code.as_deref(), Some("42P01"));
        assert_eq!(info.position, Some(15));
        assert!(info.hint.unwrap().contains("does not exist"));
        assert!(info.technical_detail.unwrap().contains("Code: 42P01"));
    }

    #[test]
    fn test_server_hint_wins_over_generated_hint() {
        let error = TuskError::query_with_details(
            "syntax error",
            Some("42601".to_string()),
            None,
            Some("Did you forget a comma?".to_string()),
            None,
        );
        assert_eq!(error.hint(), Some("Did you forget a comma?"));
    }

    #[test]
    fn test_connection_hint_from_message() {
        let refused = TuskError::connection("connection refused");
        assert!(refused.hint().unwrap().contains("running"));

        let tls = TuskError::connection("TLS handshake failed");
        assert!(tls.hint().unwrap().contains("SSL"));
        assert!(tls.is_connection_lost());
    }

    #[test]
    fn test_only_connection_exceptions_end_the_session() {
        assert!(ends_session("08006"));
        assert!(ends_session("08P01"));
        assert!(!ends_session("28000"));
        assert!(!ends_session("28P01"));
        assert!(!ends_session("42501"));
    }

    #[test]
    fn test_auth_failure_while_connecting_stays_connection_error() {
        let error = TuskError::connection(
            "Failed to establish connection: password authentication failed for user \"app\"",
        );
        assert!(error.is_connection_lost());
        assert!(error.hint().unwrap().contains("password"));
    }

    #[test]
    fn test_auth_failure_after_connect_keeps_sqlstate_hint() {
        let error = TuskError::query_with_details(
            "permission denied to set session authorization",
            Some("28000".to_string()),
            None,
            None,
            None,
        );
        assert!(error.is_statement_error());
        assert!(error.hint().unwrap().contains("authorization"));
    }

    #[test]
    fn test_precondition_message_names_connection() {
        let error = TuskError::not_connected("prod");
        assert_eq!(error.category(), "Precondition");
        assert!(error.to_string().contains("'prod'"));
        assert!(!error.is_statement_error());
    }

    #[test]
    fn test_rusqlite_statement_failure_is_query_error() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        let err = conn.execute("SELECT * FROM missing_table", []).unwrap_err();
        let error = TuskError::from(err);
        assert!(error.is_statement_error());
        assert!(error.to_string().contains("missing_table"));
    }
}
