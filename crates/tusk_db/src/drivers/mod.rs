//! Database drivers.
//!
//! [`DatabaseDriver`] is the one contract every engine implements: lifecycle,
//! execution, cancellation, introspection and schema mutation. Engine
//! implementations supply the transport-specific pieces; everything that is
//! the same across engines (precondition checks, multi-statement scripts,
//! history recording, unsupported-operation defaults) lives in provided
//! methods here.
//!
//! Use [`create_driver`] or [`connect`] to get a handle for a config.

pub mod cancel;
pub mod ddl;
pub mod handle;
pub mod postgres;
pub mod sqlite;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use crate::error::{TuskError, TuskResult};
use crate::models::{
    AddColumnRequest, AddForeignKeyRequest, AlterSequenceRequest, ColumnDetail,
    ConnectionConfig, ConnectionStatus, CreateExtensionRequest, CreateIndexRequest,
    CreateSequenceRequest, CreateTableRequest, CreateTriggerRequest, CreateUserRequest,
    CreateViewRequest, DatabaseInfo, DatabaseSchema, DdlOperationResult, DeleteRowRequest,
    DropColumnRequest, DropExtensionRequest, DropForeignKeyRequest, DropIndexRequest,
    DropSequenceRequest, DropTableRequest, DropTriggerRequest, DropUserRequest, DropViewRequest,
    EngineType, EnumInfo, ExtensionInfo, ForeignKeyInfo, IndexInfo, InsertRowRequest,
    MaterializedViewInfo, ModifyColumnRequest, MultiQueryResult, ObjectDefinition, PoolStatus,
    QueryError, QueryParam, QueryResult, QueryType, RefreshMaterializedViewRequest,
    RenameColumnRequest, RenameTableRequest, RenameViewRequest, RoutineInfo, SchemaInfo,
    SchemaObjectKind, SequenceInfo, TableInfo, TlsState, TriggerInfo, UpdateRowRequest, UserInfo,
    ViewInfo,
};
use crate::services::HistoryRecorder;
use crate::sql::StatementSplitter;

pub use self::cancel::{ActiveStatement, ArmedStatement, CancellationController};
pub use self::handle::DriverCore;
pub use self::postgres::PostgresDriver;
pub use self::sqlite::SqliteDriver;

/// Uniform driver contract.
///
/// A handle runs at most one statement at a time; callers serialize their
/// own calls. Only connection and precondition failures are returned as
/// `Err`; statement failures are captured in the returned result.
#[async_trait]
pub trait DatabaseDriver: Send + Sync {
    /// Shared state for this handle.
    fn core(&self) -> &DriverCore;

    // ========== Lifecycle ==========

    /// Open the transport. Leaves the handle in `Error` on failure.
    async fn connect(&self) -> TuskResult<()>;

    /// Release the transport. Idempotent.
    async fn disconnect(&self);

    /// Trivial round-trip. Never fails; `false` on any problem.
    async fn ping(&self) -> bool;

    /// Tear down and reopen the transport.
    async fn reconnect(&self) -> TuskResult<()> {
        self.disconnect().await;
        self.connect().await
    }

    /// Transport security that was negotiated.
    fn tls_state(&self) -> TlsState {
        TlsState::Plaintext
    }

    /// Pool usage, for pooled engines.
    fn pool_status(&self) -> Option<PoolStatus> {
        None
    }

    fn config(&self) -> &ConnectionConfig {
        self.core().config()
    }

    fn engine(&self) -> EngineType {
        self.core().engine()
    }

    fn status(&self) -> ConnectionStatus {
        self.core().status()
    }

    fn set_current_schema(&self, schema: &str) {
        self.core().set_current_schema(schema);
    }

    fn get_current_schema(&self) -> String {
        self.core().current_schema()
    }

    /// Send every executed statement to `recorder`.
    fn set_history_recorder(&self, recorder: Arc<dyn HistoryRecorder>) {
        self.core().set_history_recorder(recorder);
    }

    // ========== Execution ==========

    /// Run one statement without recording history.
    ///
    /// Statement failures are returned as `TuskError::Query`. `params` use
    /// `?` markers; engines with other marker styles rewrite them.
    async fn run_statement(&self, sql: &str, params: &[QueryParam]) -> TuskResult<QueryResult>;

    /// Run statements as one unit: all of them take effect or none do.
    ///
    /// Used for multi-statement DDL. Engines with transactional DDL run the
    /// batch in a transaction on one session; the default runs the
    /// statements in order and stops at the first failure.
    async fn run_atomically(&self, statements: &[(String, Vec<QueryParam>)]) -> TuskResult<()> {
        for (sql, params) in statements {
            self.run_statement(sql, params).await?;
        }
        Ok(())
    }

    /// Run one statement and record it in history.
    ///
    /// Malformed SQL yields a result with `error` set.
    async fn execute(&self, sql: &str, params: &[QueryParam]) -> TuskResult<QueryResult> {
        let core = self.core();
        core.ensure_connected()?;

        let started = Instant::now();
        let result = match self.run_statement(sql, params).await {
            Ok(result) => result,
            Err(e) if e.is_statement_error() => {
                tracing::debug!(connection_id = %core.config().id, error = %e, "Statement failed");
                QueryResult::failed(
                    QueryError::from(&e),
                    QueryType::detect(sql),
                    started.elapsed().as_millis() as u64,
                )
            }
            Err(e) => {
                core.record_failure(sql, &e);
                return Err(e);
            }
        };

        core.record_history(sql, &result);
        Ok(result)
    }

    /// Run a script statement by statement, in order.
    ///
    /// A failing statement does not stop the ones after it.
    async fn execute_multiple(&self, sql: &str) -> TuskResult<MultiQueryResult> {
        self.core().ensure_connected()?;

        let statements = StatementSplitter::split(sql);
        let mut results = Vec::with_capacity(statements.len());
        for statement in &statements {
            results.push(self.execute(statement, &[]).await?);
        }

        let multi = MultiQueryResult::from_results(results);
        tracing::debug!(
            connection_id = %self.core().config().id,
            statements = statements.len(),
            failed = multi.error_count(),
            total_ms = multi.total_execution_time_ms,
            "Script executed"
        );
        Ok(multi)
    }

    /// Ask the engine to stop the statement in flight.
    ///
    /// `true` means the signal was delivered, not that the statement stopped.
    async fn cancel(&self) -> bool;

    // ========== Introspection ==========

    async fn get_databases(&self) -> TuskResult<Vec<DatabaseInfo>> {
        Ok(Vec::new())
    }

    async fn get_schemas(&self) -> TuskResult<Vec<SchemaInfo>> {
        Ok(Vec::new())
    }

    async fn get_tables(&self, _schema: Option<&str>) -> TuskResult<Vec<TableInfo>> {
        Ok(Vec::new())
    }

    async fn get_columns(&self, _table: &str, _schema: Option<&str>) -> TuskResult<Vec<ColumnDetail>> {
        Ok(Vec::new())
    }

    async fn get_indexes(&self, _table: &str, _schema: Option<&str>) -> TuskResult<Vec<IndexInfo>> {
        Ok(Vec::new())
    }

    async fn get_foreign_keys(
        &self,
        _table: &str,
        _schema: Option<&str>,
    ) -> TuskResult<Vec<ForeignKeyInfo>> {
        Ok(Vec::new())
    }

    async fn get_sequences(&self, _schema: Option<&str>) -> TuskResult<Vec<SequenceInfo>> {
        Ok(Vec::new())
    }

    async fn get_views(&self, _schema: Option<&str>) -> TuskResult<Vec<ViewInfo>> {
        Ok(Vec::new())
    }

    async fn get_materialized_views(
        &self,
        _schema: Option<&str>,
    ) -> TuskResult<Vec<MaterializedViewInfo>> {
        Ok(Vec::new())
    }

    async fn get_extensions(&self) -> TuskResult<Vec<ExtensionInfo>> {
        Ok(Vec::new())
    }

    async fn get_enums(&self, _schema: Option<&str>) -> TuskResult<Vec<EnumInfo>> {
        Ok(Vec::new())
    }

    /// Triggers in a schema, optionally only those on `table`.
    async fn get_triggers(
        &self,
        _table: Option<&str>,
        _schema: Option<&str>,
    ) -> TuskResult<Vec<TriggerInfo>> {
        Ok(Vec::new())
    }

    async fn get_routines(&self, _schema: Option<&str>) -> TuskResult<Vec<RoutineInfo>> {
        Ok(Vec::new())
    }

    async fn get_users(&self) -> TuskResult<Vec<UserInfo>> {
        Ok(Vec::new())
    }

    async fn get_table_ddl(&self, table: &str, _schema: Option<&str>) -> TuskResult<ObjectDefinition> {
        Ok(ObjectDefinition::not_found(SchemaObjectKind::Table, table))
    }

    async fn get_view_ddl(&self, view: &str, _schema: Option<&str>) -> TuskResult<ObjectDefinition> {
        Ok(ObjectDefinition::not_found(SchemaObjectKind::View, view))
    }

    async fn get_materialized_view_ddl(
        &self,
        view: &str,
        _schema: Option<&str>,
    ) -> TuskResult<ObjectDefinition> {
        Ok(ObjectDefinition::not_found(SchemaObjectKind::MaterializedView, view))
    }

    async fn get_routine_definition(
        &self,
        routine: &str,
        _schema: Option<&str>,
    ) -> TuskResult<ObjectDefinition> {
        Ok(ObjectDefinition::not_found(SchemaObjectKind::Routine, routine))
    }

    async fn get_trigger_definition(
        &self,
        trigger: &str,
        _table: &str,
        _schema: Option<&str>,
    ) -> TuskResult<ObjectDefinition> {
        Ok(ObjectDefinition::not_found(SchemaObjectKind::Trigger, trigger))
    }

    /// Snapshot of one schema for a schema browser. Not cached.
    async fn load_schema(&self, schema: Option<&str>) -> TuskResult<DatabaseSchema> {
        let scope = self.core().scope(schema);
        let scope = Some(scope.as_str());

        let tables = self.get_tables(scope).await?;
        let mut table_columns = HashMap::with_capacity(tables.len());
        for table in &tables {
            let columns = self.get_columns(&table.name, scope).await?;
            table_columns.insert(table.name.clone(), columns);
        }

        Ok(DatabaseSchema {
            schema: self.core().scope(schema),
            views: self.get_views(scope).await?,
            materialized_views: self.get_materialized_views(scope).await?,
            sequences: self.get_sequences(scope).await?,
            enums: self.get_enums(scope).await?,
            routines: self.get_routines(scope).await?,
            tables,
            table_columns,
        })
    }

    // ========== Mutation ==========

    async fn add_column(&self, _request: &AddColumnRequest) -> TuskResult<DdlOperationResult> {
        Ok(DdlOperationResult::unsupported("Adding columns", self.engine()))
    }

    async fn modify_column(&self, _request: &ModifyColumnRequest) -> TuskResult<DdlOperationResult> {
        Ok(DdlOperationResult::unsupported("Modifying columns", self.engine()))
    }

    async fn drop_column(&self, _request: &DropColumnRequest) -> TuskResult<DdlOperationResult> {
        Ok(DdlOperationResult::unsupported("Dropping columns", self.engine()))
    }

    async fn rename_column(&self, _request: &RenameColumnRequest) -> TuskResult<DdlOperationResult> {
        Ok(DdlOperationResult::unsupported("Renaming columns", self.engine()))
    }

    async fn create_index(&self, _request: &CreateIndexRequest) -> TuskResult<DdlOperationResult> {
        Ok(DdlOperationResult::unsupported("Creating indexes", self.engine()))
    }

    async fn drop_index(&self, _request: &DropIndexRequest) -> TuskResult<DdlOperationResult> {
        Ok(DdlOperationResult::unsupported("Dropping indexes", self.engine()))
    }

    async fn add_foreign_key(&self, _request: &AddForeignKeyRequest) -> TuskResult<DdlOperationResult> {
        Ok(DdlOperationResult::unsupported("Adding foreign keys", self.engine()))
    }

    async fn drop_foreign_key(
        &self,
        _request: &DropForeignKeyRequest,
    ) -> TuskResult<DdlOperationResult> {
        Ok(DdlOperationResult::unsupported("Dropping foreign keys", self.engine()))
    }

    async fn create_table(&self, _request: &CreateTableRequest) -> TuskResult<DdlOperationResult> {
        Ok(DdlOperationResult::unsupported("Creating tables", self.engine()))
    }

    async fn drop_table(&self, _request: &DropTableRequest) -> TuskResult<DdlOperationResult> {
        Ok(DdlOperationResult::unsupported("Dropping tables", self.engine()))
    }

    async fn rename_table(&self, _request: &RenameTableRequest) -> TuskResult<DdlOperationResult> {
        Ok(DdlOperationResult::unsupported("Renaming tables", self.engine()))
    }

    async fn create_view(&self, _request: &CreateViewRequest) -> TuskResult<DdlOperationResult> {
        Ok(DdlOperationResult::unsupported("Creating views", self.engine()))
    }

    async fn drop_view(&self, _request: &DropViewRequest) -> TuskResult<DdlOperationResult> {
        Ok(DdlOperationResult::unsupported("Dropping views", self.engine()))
    }

    async fn rename_view(&self, _request: &RenameViewRequest) -> TuskResult<DdlOperationResult> {
        Ok(DdlOperationResult::unsupported("Renaming views", self.engine()))
    }

    async fn create_sequence(&self, _request: &CreateSequenceRequest) -> TuskResult<DdlOperationResult> {
        Ok(DdlOperationResult::unsupported("Sequences", self.engine()))
    }

    async fn alter_sequence(&self, _request: &AlterSequenceRequest) -> TuskResult<DdlOperationResult> {
        Ok(DdlOperationResult::unsupported("Sequences", self.engine()))
    }

    async fn drop_sequence(&self, _request: &DropSequenceRequest) -> TuskResult<DdlOperationResult> {
        Ok(DdlOperationResult::unsupported("Sequences", self.engine()))
    }

    async fn refresh_materialized_view(
        &self,
        _request: &RefreshMaterializedViewRequest,
    ) -> TuskResult<DdlOperationResult> {
        Ok(DdlOperationResult::unsupported("Materialized views", self.engine()))
    }

    async fn create_extension(
        &self,
        _request: &CreateExtensionRequest,
    ) -> TuskResult<DdlOperationResult> {
        Ok(DdlOperationResult::unsupported("Extensions", self.engine()))
    }

    async fn drop_extension(&self, _request: &DropExtensionRequest) -> TuskResult<DdlOperationResult> {
        Ok(DdlOperationResult::unsupported("Extensions", self.engine()))
    }

    async fn create_trigger(&self, _request: &CreateTriggerRequest) -> TuskResult<DdlOperationResult> {
        Ok(DdlOperationResult::unsupported("Creating triggers", self.engine()))
    }

    async fn drop_trigger(&self, _request: &DropTriggerRequest) -> TuskResult<DdlOperationResult> {
        Ok(DdlOperationResult::unsupported("Dropping triggers", self.engine()))
    }

    async fn create_user(&self, _request: &CreateUserRequest) -> TuskResult<DdlOperationResult> {
        Ok(DdlOperationResult::unsupported("User management", self.engine()))
    }

    async fn drop_user(&self, _request: &DropUserRequest) -> TuskResult<DdlOperationResult> {
        Ok(DdlOperationResult::unsupported("User management", self.engine()))
    }

    async fn insert_row(&self, _request: &InsertRowRequest) -> TuskResult<DdlOperationResult> {
        Ok(DdlOperationResult::unsupported("Inserting rows", self.engine()))
    }

    async fn delete_row(&self, _request: &DeleteRowRequest) -> TuskResult<DdlOperationResult> {
        Ok(DdlOperationResult::unsupported("Deleting rows", self.engine()))
    }

    async fn update_row(&self, _request: &UpdateRowRequest) -> TuskResult<DdlOperationResult> {
        Ok(DdlOperationResult::unsupported("Updating rows", self.engine()))
    }
}

/// Run a catalog query and decode each row into `T`.
pub(crate) async fn fetch_rows<D, T>(driver: &D, sql: &str, params: &[QueryParam]) -> TuskResult<Vec<T>>
where
    D: DatabaseDriver + ?Sized,
    T: DeserializeOwned,
{
    let result = driver.run_statement(sql, params).await?;
    result
        .rows
        .into_iter()
        .map(|row| serde_json::from_value(JsonValue::Object(row)).map_err(Into::into))
        .collect()
}

/// Run a single-column query and return that column as text.
pub(crate) async fn fetch_text<D>(
    driver: &D,
    sql: &str,
    params: &[QueryParam],
) -> TuskResult<Vec<Option<String>>>
where
    D: DatabaseDriver + ?Sized,
{
    let result = driver.run_statement(sql, params).await?;
    Ok(result
        .rows
        .into_iter()
        .map(|row| row.into_iter().next().and_then(|(_, v)| v.as_str().map(String::from)))
        .collect())
}

/// Build the driver for `config.engine`, without connecting.
pub fn create_driver(config: ConnectionConfig) -> TuskResult<Arc<dyn DatabaseDriver>> {
    config
        .validate()
        .map_err(|message| TuskError::connection_with_hint(message, "Check the connection settings"))?;

    match config.engine {
        EngineType::Postgres => Ok(Arc::new(PostgresDriver::new(config)?)),
        EngineType::Sqlite => Ok(Arc::new(SqliteDriver::new(config)?)),
        engine @ (EngineType::MySql
        | EngineType::MariaDb
        | EngineType::ClickHouse
        | EngineType::MongoDb
        | EngineType::Redis) => Err(TuskError::UnsupportedEngine { engine }),
    }
}

/// Build a driver and connect it.
pub async fn connect(config: ConnectionConfig) -> TuskResult<Arc<dyn DatabaseDriver>> {
    let driver = create_driver(config)?;
    driver.connect().await?;
    Ok(driver)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_factory_rejects_unimplemented_engines() {
        for engine in [EngineType::MySql, EngineType::MariaDb, EngineType::ClickHouse] {
            let config = ConnectionConfig::new(engine, "x", "localhost", "db", "root");
            match create_driver(config) {
                Err(TuskError::UnsupportedEngine { engine: e }) => assert_eq!(e, engine),
                other => panic!("expected UnsupportedEngine, got {:?}", other.err()),
            }
        }
    }

    #[test]
    fn test_factory_validates_config() {
        let config = ConnectionConfig::postgres("pg", "", "db", "u");
        assert!(matches!(create_driver(config), Err(TuskError::Connection { .. })));
    }

    #[test]
    fn test_factory_builds_disconnected_handles() {
        let driver = create_driver(ConnectionConfig::sqlite("mem", ":memory:")).unwrap();
        assert_eq!(driver.engine(), EngineType::Sqlite);
        assert_eq!(driver.status(), ConnectionStatus::Disconnected);
        assert_eq!(driver.get_current_schema(), "main");

        let driver = create_driver(ConnectionConfig::postgres("pg", "localhost", "db", "u")).unwrap();
        assert_eq!(driver.get_current_schema(), "public");
        assert_eq!(driver.tls_state(), TlsState::Plaintext);
    }

    #[tokio::test]
    async fn test_execute_on_disconnected_handle_is_precondition_error() {
        let driver = create_driver(ConnectionConfig::sqlite("mem", ":memory:")).unwrap();
        let err = driver.execute("SELECT 1", &[]).await.unwrap_err();
        assert!(matches!(err, TuskError::Precondition { .. }));
        assert!(driver.execute_multiple("SELECT 1; SELECT 2").await.is_err());
        assert!(!driver.cancel().await);
    }
}
