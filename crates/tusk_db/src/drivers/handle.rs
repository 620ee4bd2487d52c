//! State shared by every driver: config, status, current schema, history.

use parking_lot::RwLock;
use std::sync::Arc;

use crate::error::{TuskError, TuskResult};
use crate::models::{
    ConnectionConfig, ConnectionStatus, EngineType, QueryHistoryEntry, QueryResult,
};
use crate::services::HistoryRecorder;
use crate::sql::SqlDialect;

/// Engine-independent part of a connection handle.
pub struct DriverCore {
    config: ConnectionConfig,
    dialect: SqlDialect,
    status: RwLock<ConnectionStatus>,
    current_schema: RwLock<String>,
    history: RwLock<Option<Arc<dyn HistoryRecorder>>>,
}

impl DriverCore {
    /// Create the core for a config. Fails for engines without a SQL dialect.
    pub fn new(config: ConnectionConfig) -> TuskResult<Self> {
        let dialect = SqlDialect::for_engine(config.engine)
            .ok_or(TuskError::UnsupportedEngine { engine: config.engine })?;
        let current_schema = config.engine.default_schema().to_string();

        Ok(Self {
            config,
            dialect,
            status: RwLock::new(ConnectionStatus::Disconnected),
            current_schema: RwLock::new(current_schema),
            history: RwLock::new(None),
        })
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn engine(&self) -> EngineType {
        self.config.engine
    }

    pub fn dialect(&self) -> SqlDialect {
        self.dialect
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status.read().clone()
    }

    pub fn set_status(&self, status: ConnectionStatus) {
        let mut current = self.status.write();
        if *current != status {
            tracing::debug!(
                connection_id = %self.config.id,
                from = ?*current,
                to = ?status,
                "Connection status changed"
            );
            *current = status;
        }
    }

    /// Precondition for every statement: the handle is usable.
    ///
    /// `Reconnecting` passes; the driver either recovers or fails the
    /// statement with a connection error.
    pub fn ensure_connected(&self) -> TuskResult<()> {
        match &*self.status.read() {
            ConnectionStatus::Connected | ConnectionStatus::Reconnecting => Ok(()),
            _ => Err(TuskError::not_connected(&self.config.name)),
        }
    }

    pub fn current_schema(&self) -> String {
        self.current_schema.read().clone()
    }

    pub fn set_current_schema(&self, schema: &str) {
        *self.current_schema.write() = schema.to_string();
        tracing::debug!(connection_id = %self.config.id, schema, "Current schema set");
    }

    /// `schema` if given, otherwise the current schema.
    pub fn scope(&self, schema: Option<&str>) -> String {
        match schema {
            Some(s) if !s.is_empty() => s.to_string(),
            _ => self.current_schema(),
        }
    }

    /// Quoted `schema.name`, defaulting to the current schema.
    pub fn qualified(&self, schema: Option<&str>, name: &str) -> String {
        self.dialect.qualified(Some(&self.scope(schema)), name)
    }

    pub fn set_history_recorder(&self, recorder: Arc<dyn HistoryRecorder>) {
        *self.history.write() = Some(recorder);
    }

    /// Hand a finished statement to the history recorder, if any.
    /// Failures are logged, never returned.
    pub fn record_history(&self, sql: &str, result: &QueryResult) {
        self.record(QueryHistoryEntry::from_result(self.config.id, sql, result));
    }

    /// Record a statement that ended in a connection-level error.
    pub fn record_failure(&self, sql: &str, error: &TuskError) {
        self.record(QueryHistoryEntry::from_error(self.config.id, sql, error));
    }

    fn record(&self, entry: QueryHistoryEntry) {
        let recorder = self.history.read().clone();
        if let Some(recorder) = recorder {
            if let Err(e) = recorder.record(&entry) {
                tracing::warn!(connection_id = %self.config.id, error = %e, "Failed to record history");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{QueryError, QueryType};
    use crate::services::HistoryStore;

    #[test]
    fn test_scope_defaults_to_current_schema() {
        let core = DriverCore::new(ConnectionConfig::postgres("t", "localhost", "db", "u")).unwrap();
        assert_eq!(core.scope(None), "public");
        core.set_current_schema("sales");
        assert_eq!(core.scope(None), "sales");
        assert_eq!(core.scope(Some("hr")), "hr");
        assert_eq!(core.qualified(None, "orders"), "\"sales\".\"orders\"");
    }

    #[test]
    fn test_precondition_until_connected() {
        let core = DriverCore::new(ConnectionConfig::sqlite("t", ":memory:")).unwrap();
        assert!(matches!(core.ensure_connected(), Err(TuskError::Precondition { .. })));
        core.set_status(ConnectionStatus::Connected);
        assert!(core.ensure_connected().is_ok());
        core.set_status(ConnectionStatus::error("boom"));
        assert!(core.ensure_connected().is_err());
    }

    #[test]
    fn test_non_sql_engine_is_unsupported() {
        let config = ConnectionConfig::new(EngineType::Redis, "r", "localhost", "0", "");
        assert!(matches!(DriverCore::new(config), Err(TuskError::UnsupportedEngine { .. })));
    }

    #[test]
    fn test_history_is_recorded() {
        let core = DriverCore::new(ConnectionConfig::sqlite("t", ":memory:")).unwrap();
        let store = Arc::new(HistoryStore::open_in_memory().unwrap());
        core.set_history_recorder(store.clone());

        let failed = QueryResult::failed(QueryError::new("no such table: x"), QueryType::Select, 1);
        core.record_history("SELECT * FROM x", &failed);

        let entries = store.load(core.config().id, 10).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].error_message.as_deref(), Some("no such table: x"));
    }
}
