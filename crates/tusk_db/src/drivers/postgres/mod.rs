//! PostgreSQL driver.
//!
//! Statements run on clients from a deadpool pool. Before each statement the
//! client's backend pid is registered for cancellation and its search_path
//! is pointed at the handle's current schema. Cancellation runs
//! `pg_cancel_backend` on a second pooled client, which is why pools never
//! shrink below two.
//!
//! The work on a client runs in its own task. If the caller stops waiting,
//! the task keeps the pid armed until the server is done with the
//! statement, then returns the client to the pool.

mod connection;
mod decode;
pub(crate) mod ddl;
mod query;
mod schema;

use async_trait::async_trait;
use deadpool_postgres::{Object, Pool, PoolError};
use parking_lot::RwLock;
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tokio_postgres::types::ToSql;

use self::connection::Transport;
use self::query::TextParam;
use super::ddl::{insert_row, run_plan, delete_row, update_row};
use super::{fetch_rows, ArmedStatement, CancellationController, DatabaseDriver, DriverCore};
use crate::error::{TuskError, TuskResult};
use crate::models::{
    AddColumnRequest, AddForeignKeyRequest, AlterSequenceRequest, ColumnDetail, ConnectionConfig,
    ConnectionStatus, CreateExtensionRequest, CreateIndexRequest, CreateSequenceRequest,
    CreateTableRequest, CreateTriggerRequest, CreateUserRequest, CreateViewRequest, DatabaseInfo,
    DdlOperationResult, DeleteRowRequest, DropColumnRequest, DropExtensionRequest,
    DropForeignKeyRequest, DropIndexRequest, DropSequenceRequest, DropTableRequest,
    DropTriggerRequest, DropUserRequest, DropViewRequest, EnumInfo, ExtensionInfo,
    ForeignKeyInfo, IndexInfo, InsertRowRequest, MaterializedViewInfo, ModifyColumnRequest,
    ObjectDefinition, PoolStatus, QueryParam, QueryResult, QueryType,
    RefreshMaterializedViewRequest, RenameColumnRequest, RenameTableRequest, RenameViewRequest,
    RoutineInfo, SchemaInfo, SequenceInfo, TableInfo, TlsState, TriggerInfo, UpdateRowRequest,
    UserInfo, ViewInfo,
};
use crate::sql::rewrite_question_marks;

/// Backend pid plus search_path in one round trip.
const PREPARE_SESSION: &str = "SELECT pg_catalog.pg_backend_pid(), pg_catalog.set_config('search_path', $1, false)";

/// A PostgreSQL connection handle.
pub struct PostgresDriver {
    core: DriverCore,
    transport: RwLock<Option<Transport>>,
    cancel: Arc<CancellationController<i32>>,
}

impl PostgresDriver {
    /// Create a disconnected handle.
    pub fn new(config: ConnectionConfig) -> TuskResult<Self> {
        Ok(Self {
            core: DriverCore::new(config)?,
            transport: RwLock::new(None),
            cancel: Arc::new(CancellationController::new()),
        })
    }

    fn pool(&self) -> Option<Pool> {
        self.transport.read().as_ref().map(|t| t.pool.clone())
    }

    fn install(&self, transport: Transport) -> Pool {
        let pool = transport.pool.clone();
        if let Some(old) = self.transport.write().replace(transport) {
            old.pool.close();
        }
        pool
    }

    /// Get a pooled client, rebuilding the transport once if it is gone.
    async fn acquire(&self) -> TuskResult<Object> {
        let pool = self.pool().ok_or_else(|| TuskError::not_connected(&self.core.config().name))?;

        let reason = match pool.get().await {
            Ok(client) if !client.is_closed() => return Ok(client),
            Ok(_) => "pooled connection is closed".to_string(),
            Err(PoolError::Timeout(kind)) => {
                return Err(TuskError::connection_with_hint(
                    format!("Timed out waiting for a pooled connection ({kind:?})"),
                    "All pooled connections are busy. Retry, or raise pool_max_size",
                ));
            }
            Err(e) => e.to_string(),
        };

        let pool = self.recover(&reason).await?;
        pool.get()
            .await
            .map_err(|e| TuskError::connection(format!("Failed to get connection from pool: {e}")))
    }

    /// Replace a dead transport. Leaves the handle `Connected` or `Error`.
    async fn recover(&self, reason: &str) -> TuskResult<Pool> {
        let config = self.core.config();
        tracing::warn!(connection_id = %config.id, reason, "Connection lost, rebuilding transport");
        self.core.set_status(ConnectionStatus::Reconnecting);

        match connection::open(config).await {
            Ok(transport) => {
                let pool = self.install(transport);
                self.core.set_status(ConnectionStatus::Connected);
                tracing::info!(connection_id = %config.id, "Connection re-established");
                Ok(pool)
            }
            Err(e) => {
                if let Some(old) = self.transport.write().take() {
                    old.pool.close();
                }
                self.core.set_status(ConnectionStatus::error(e.to_string()));
                tracing::error!(connection_id = %config.id, error = %e, "Reconnect failed");
                Err(match e {
                    e @ TuskError::Connection { .. } => e,
                    other => TuskError::connection(other.to_string()),
                })
            }
        }
    }

    fn search_path(&self) -> String {
        format!("{}, public", self.core.dialect().quote_ident(&self.core.current_schema()))
    }

    /// Wait for a client task. A transport that died under it is rebuilt
    /// once before the error is returned.
    async fn settle<T>(&self, task: JoinHandle<(bool, TuskResult<T>)>) -> TuskResult<T> {
        let (closed, outcome) = task
            .await
            .map_err(|e| TuskError::internal(format!("PostgreSQL worker failed: {e}")))?;
        match outcome {
            Err(e) if closed && e.is_connection_lost() => {
                self.recover(&e.to_string()).await?;
                Err(e)
            }
            outcome => outcome,
        }
    }
}

/// Point the session at `search_path` and arm its backend pid.
async fn prepare_session(
    client: &Object,
    search_path: &str,
    cancel: &Arc<CancellationController<i32>>,
) -> TuskResult<ArmedStatement<i32>> {
    let session = client.query_one(PREPARE_SESSION, &[&search_path]).await?;
    let backend_pid: i32 = session.try_get(0)?;
    Ok(cancel.arm(backend_pid))
}

async fn run_one(
    client: &Object,
    search_path: &str,
    cancel: &Arc<CancellationController<i32>>,
    sql: &str,
    params: &[TextParam],
    query_type: QueryType,
    started: Instant,
) -> TuskResult<QueryResult> {
    let _armed = prepare_session(client, search_path, cancel).await?;
    let statement = client.prepare(sql).await?;
    query::run(client, &statement, params, query_type, started).await
}

async fn run_in_transaction(
    client: &mut Object,
    search_path: &str,
    cancel: &Arc<CancellationController<i32>>,
    statements: &[(String, Vec<TextParam>)],
) -> TuskResult<()> {
    let _armed = prepare_session(client, search_path, cancel).await?;
    let transaction = client.transaction().await?;
    for (sql, params) in statements {
        let params: Vec<&(dyn ToSql + Sync)> = params.iter().map(|p| p as &(dyn ToSql + Sync)).collect();
        if let Err(e) = transaction.execute(sql.as_str(), &params).await {
            if let Err(rollback) = transaction.rollback().await {
                tracing::debug!(error = %rollback, "Rollback of failed batch failed");
            }
            return Err(e.into());
        }
    }
    transaction.commit().await?;
    Ok(())
}

#[async_trait]
impl DatabaseDriver for PostgresDriver {
    fn core(&self) -> &DriverCore {
        &self.core
    }

    async fn connect(&self) -> TuskResult<()> {
        let config = self.core.config();
        if self.core.status().is_connected() && self.pool().is_some() {
            return Ok(());
        }

        self.core.set_status(ConnectionStatus::Connecting);
        match connection::open(config).await {
            Ok(transport) => {
                let tls_state = transport.tls_state;
                self.install(transport);
                self.core.set_status(ConnectionStatus::Connected);
                tracing::info!(
                    connection_id = %config.id,
                    url = %config.display_url(),
                    tls = ?tls_state,
                    "Connected"
                );
                Ok(())
            }
            Err(e) => {
                self.core.set_status(ConnectionStatus::error(e.to_string()));
                tracing::error!(connection_id = %config.id, error = %e, "Connection failed");
                Err(e)
            }
        }
    }

    async fn disconnect(&self) {
        if let Some(transport) = self.transport.write().take() {
            transport.pool.close();
            tracing::info!(connection_id = %self.core.config().id, "Disconnected");
        }
        self.cancel.reset();
        self.core.set_status(ConnectionStatus::Disconnected);
    }

    async fn ping(&self) -> bool {
        let Some(pool) = self.pool() else {
            return false;
        };
        match pool.get().await {
            Ok(client) => client.simple_query("SELECT 1").await.is_ok(),
            Err(e) => {
                tracing::debug!(connection_id = %self.core.config().id, error = %e, "Ping failed");
                false
            }
        }
    }

    fn tls_state(&self) -> TlsState {
        self.transport.read().as_ref().map(|t| t.tls_state).unwrap_or_default()
    }

    fn pool_status(&self) -> Option<PoolStatus> {
        self.pool().map(|pool| {
            let status = pool.status();
            PoolStatus {
                max_size: status.max_size,
                size: status.size,
                available: status.available as isize,
                waiting: status.waiting,
            }
        })
    }

    async fn run_statement(&self, sql: &str, params: &[QueryParam]) -> TuskResult<QueryResult> {
        self.core.ensure_connected()?;
        let started = Instant::now();
        let query_type = QueryType::detect(sql);
        let sql = if params.is_empty() { sql.to_string() } else { rewrite_question_marks(sql) };
        let params: Vec<TextParam> = params.iter().map(TextParam::from_json).collect();

        let client = self.acquire().await?;
        let search_path = self.search_path();
        let cancel = Arc::clone(&self.cancel);
        let task = tokio::spawn(async move {
            let outcome =
                run_one(&client, &search_path, &cancel, &sql, &params, query_type, started).await;
            (client.is_closed(), outcome)
        });
        self.settle(task).await
    }

    async fn run_atomically(&self, statements: &[(String, Vec<QueryParam>)]) -> TuskResult<()> {
        self.core.ensure_connected()?;
        let statements: Vec<(String, Vec<TextParam>)> = statements
            .iter()
            .map(|(sql, params)| {
                let sql = if params.is_empty() { sql.clone() } else { rewrite_question_marks(sql) };
                (sql, params.iter().map(TextParam::from_json).collect())
            })
            .collect();

        let mut client = self.acquire().await?;
        let search_path = self.search_path();
        let cancel = Arc::clone(&self.cancel);
        let task = tokio::spawn(async move {
            let outcome = run_in_transaction(&mut client, &search_path, &cancel, &statements).await;
            (client.is_closed(), outcome)
        });
        self.settle(task).await
    }

    async fn cancel(&self) -> bool {
        let Some(active) = self.cancel.current() else {
            return false;
        };
        let Some(pool) = self.pool() else {
            return false;
        };
        let connection_id = self.core.config().id;

        let client = match pool.get().await {
            Ok(client) => client,
            Err(e) => {
                tracing::warn!(%connection_id, error = %e, "No connection available to cancel on");
                return false;
            }
        };
        match client.query_one("SELECT pg_catalog.pg_cancel_backend($1)", &[&active.token]).await {
            Ok(row) => {
                let delivered = row.try_get::<_, bool>(0).unwrap_or(false);
                tracing::info!(%connection_id, backend_pid = active.token, delivered, "Cancel requested");
                delivered
            }
            Err(e) => {
                tracing::warn!(%connection_id, error = %e, "Cancel failed");
                false
            }
        }
    }

    // ========== Introspection ==========

    async fn get_databases(&self) -> TuskResult<Vec<DatabaseInfo>> {
        fetch_rows(self, schema::DATABASES, &[]).await
    }

    async fn get_schemas(&self) -> TuskResult<Vec<SchemaInfo>> {
        fetch_rows(self, schema::SCHEMAS, &[]).await
    }

    async fn get_tables(&self, schema: Option<&str>) -> TuskResult<Vec<TableInfo>> {
        fetch_rows(self, schema::TABLES, &[json!(self.core.scope(schema))]).await
    }

    async fn get_columns(&self, table: &str, schema: Option<&str>) -> TuskResult<Vec<ColumnDetail>> {
        fetch_rows(self, schema::COLUMNS, &[json!(self.core.scope(schema)), json!(table)]).await
    }

    async fn get_indexes(&self, table: &str, schema: Option<&str>) -> TuskResult<Vec<IndexInfo>> {
        fetch_rows(self, schema::INDEXES, &[json!(self.core.scope(schema)), json!(table)]).await
    }

    async fn get_foreign_keys(
        &self,
        table: &str,
        schema: Option<&str>,
    ) -> TuskResult<Vec<ForeignKeyInfo>> {
        fetch_rows(self, schema::FOREIGN_KEYS, &[json!(self.core.scope(schema)), json!(table)]).await
    }

    async fn get_sequences(&self, schema: Option<&str>) -> TuskResult<Vec<SequenceInfo>> {
        fetch_rows(self, schema::SEQUENCES, &[json!(self.core.scope(schema))]).await
    }

    async fn get_views(&self, schema: Option<&str>) -> TuskResult<Vec<ViewInfo>> {
        fetch_rows(self, schema::VIEWS, &[json!(self.core.scope(schema))]).await
    }

    async fn get_materialized_views(
        &self,
        schema: Option<&str>,
    ) -> TuskResult<Vec<MaterializedViewInfo>> {
        fetch_rows(self, schema::MATERIALIZED_VIEWS, &[json!(self.core.scope(schema))]).await
    }

    async fn get_extensions(&self) -> TuskResult<Vec<ExtensionInfo>> {
        fetch_rows(self, schema::EXTENSIONS, &[]).await
    }

    async fn get_enums(&self, schema: Option<&str>) -> TuskResult<Vec<EnumInfo>> {
        fetch_rows(self, schema::ENUMS, &[json!(self.core.scope(schema))]).await
    }

    async fn get_triggers(
        &self,
        table: Option<&str>,
        schema: Option<&str>,
    ) -> TuskResult<Vec<TriggerInfo>> {
        fetch_rows(self, schema::TRIGGERS, &[json!(self.core.scope(schema)), json!(table)]).await
    }

    async fn get_routines(&self, schema: Option<&str>) -> TuskResult<Vec<RoutineInfo>> {
        fetch_rows(self, schema::ROUTINES, &[json!(self.core.scope(schema))]).await
    }

    async fn get_users(&self) -> TuskResult<Vec<UserInfo>> {
        fetch_rows(self, schema::USERS, &[]).await
    }

    async fn get_table_ddl(&self, table: &str, schema: Option<&str>) -> TuskResult<ObjectDefinition> {
        self.table_definition(table, &self.core.scope(schema)).await
    }

    async fn get_view_ddl(&self, view: &str, schema: Option<&str>) -> TuskResult<ObjectDefinition> {
        self.view_definition(view, &self.core.scope(schema), false).await
    }

    async fn get_materialized_view_ddl(
        &self,
        view: &str,
        schema: Option<&str>,
    ) -> TuskResult<ObjectDefinition> {
        self.view_definition(view, &self.core.scope(schema), true).await
    }

    async fn get_routine_definition(
        &self,
        routine: &str,
        schema: Option<&str>,
    ) -> TuskResult<ObjectDefinition> {
        self.routine_definition(routine, &self.core.scope(schema)).await
    }

    async fn get_trigger_definition(
        &self,
        trigger: &str,
        table: &str,
        schema: Option<&str>,
    ) -> TuskResult<ObjectDefinition> {
        self.trigger_definition(trigger, table, &self.core.scope(schema)).await
    }

    // ========== Mutation ==========

    async fn add_column(&self, request: &AddColumnRequest) -> TuskResult<DdlOperationResult> {
        run_plan(self, ddl::add_column(&self.core, request)).await
    }

    async fn modify_column(&self, request: &ModifyColumnRequest) -> TuskResult<DdlOperationResult> {
        run_plan(self, ddl::modify_column(&self.core, request)).await
    }

    async fn drop_column(&self, request: &DropColumnRequest) -> TuskResult<DdlOperationResult> {
        run_plan(self, ddl::drop_column(&self.core, request)).await
    }

    async fn rename_column(&self, request: &RenameColumnRequest) -> TuskResult<DdlOperationResult> {
        run_plan(self, ddl::rename_column(&self.core, request)).await
    }

    async fn create_index(&self, request: &CreateIndexRequest) -> TuskResult<DdlOperationResult> {
        run_plan(self, ddl::create_index(&self.core, request)).await
    }

    async fn drop_index(&self, request: &DropIndexRequest) -> TuskResult<DdlOperationResult> {
        run_plan(self, ddl::drop_index(&self.core, request)).await
    }

    async fn add_foreign_key(&self, request: &AddForeignKeyRequest) -> TuskResult<DdlOperationResult> {
        run_plan(self, ddl::add_foreign_key(&self.core, request)).await
    }

    async fn drop_foreign_key(
        &self,
        request: &DropForeignKeyRequest,
    ) -> TuskResult<DdlOperationResult> {
        run_plan(self, ddl::drop_foreign_key(&self.core, request)).await
    }

    async fn create_table(&self, request: &CreateTableRequest) -> TuskResult<DdlOperationResult> {
        run_plan(self, ddl::create_table(&self.core, request)).await
    }

    async fn drop_table(&self, request: &DropTableRequest) -> TuskResult<DdlOperationResult> {
        run_plan(self, ddl::drop_table(&self.core, request)).await
    }

    async fn rename_table(&self, request: &RenameTableRequest) -> TuskResult<DdlOperationResult> {
        run_plan(self, ddl::rename_table(&self.core, request)).await
    }

    async fn create_view(&self, request: &CreateViewRequest) -> TuskResult<DdlOperationResult> {
        run_plan(self, ddl::create_view(&self.core, request)).await
    }

    async fn drop_view(&self, request: &DropViewRequest) -> TuskResult<DdlOperationResult> {
        run_plan(self, ddl::drop_view(&self.core, request)).await
    }

    async fn rename_view(&self, request: &RenameViewRequest) -> TuskResult<DdlOperationResult> {
        run_plan(self, ddl::rename_view(&self.core, request)).await
    }

    async fn create_sequence(&self, request: &CreateSequenceRequest) -> TuskResult<DdlOperationResult> {
        run_plan(self, ddl::create_sequence(&self.core, request)).await
    }

    async fn alter_sequence(&self, request: &AlterSequenceRequest) -> TuskResult<DdlOperationResult> {
        run_plan(self, ddl::alter_sequence(&self.core, request)).await
    }

    async fn drop_sequence(&self, request: &DropSequenceRequest) -> TuskResult<DdlOperationResult> {
        run_plan(self, ddl::drop_sequence(&self.core, request)).await
    }

    async fn refresh_materialized_view(
        &self,
        request: &RefreshMaterializedViewRequest,
    ) -> TuskResult<DdlOperationResult> {
        run_plan(self, ddl::refresh_materialized_view(&self.core, request)).await
    }

    async fn create_extension(
        &self,
        request: &CreateExtensionRequest,
    ) -> TuskResult<DdlOperationResult> {
        run_plan(self, ddl::create_extension(request)).await
    }

    async fn drop_extension(&self, request: &DropExtensionRequest) -> TuskResult<DdlOperationResult> {
        run_plan(self, ddl::drop_extension(request)).await
    }

    async fn create_trigger(&self, request: &CreateTriggerRequest) -> TuskResult<DdlOperationResult> {
        run_plan(self, ddl::create_trigger(&self.core, request)).await
    }

    async fn drop_trigger(&self, request: &DropTriggerRequest) -> TuskResult<DdlOperationResult> {
        run_plan(self, ddl::drop_trigger(&self.core, request)).await
    }

    async fn create_user(&self, request: &CreateUserRequest) -> TuskResult<DdlOperationResult> {
        run_plan(self, ddl::create_user(request)).await
    }

    async fn drop_user(&self, request: &DropUserRequest) -> TuskResult<DdlOperationResult> {
        run_plan(self, ddl::drop_user(request)).await
    }

    async fn insert_row(&self, request: &InsertRowRequest) -> TuskResult<DdlOperationResult> {
        let table = self.core.qualified(request.schema.as_deref(), &request.table);
        run_plan(self, insert_row(self.core.dialect(), &table, &request.values)).await
    }

    async fn delete_row(&self, request: &DeleteRowRequest) -> TuskResult<DdlOperationResult> {
        let table = self.core.qualified(request.schema.as_deref(), &request.table);
        run_plan(self, delete_row(self.core.dialect(), &table, &request.key)).await
    }

    async fn update_row(&self, request: &UpdateRowRequest) -> TuskResult<DdlOperationResult> {
        let table = self.core.qualified(request.schema.as_deref(), &request.table);
        run_plan(self, update_row(self.core.dialect(), &table, &request.key, &request.values)).await
    }
}
