//! SQLite driver.
//!
//! One `rusqlite::Connection` per handle, used from blocking tasks. The
//! connection's interrupt handle is kept outside the mutex so `cancel` can
//! reach a statement that is holding the lock. A statement stays armed for
//! cancellation until its blocking task returns, even when the caller has
//! stopped waiting for it.

mod connection;
mod ddl;
mod query;
mod schema;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use rusqlite::{Connection, InterruptHandle};
use std::sync::Arc;
use std::time::Instant;

use super::ddl::{delete_row, insert_row, run_plan, update_row};
use super::{CancellationController, DatabaseDriver, DriverCore};
use crate::error::{TuskError, TuskResult};
use crate::models::{
    AddColumnRequest, ColumnDetail, ConnectionConfig, ConnectionStatus, CreateIndexRequest,
    CreateTableRequest, CreateTriggerRequest, CreateViewRequest, DatabaseInfo,
    DdlOperationResult, DeleteRowRequest, DropColumnRequest, DropIndexRequest, DropTableRequest,
    DropTriggerRequest, DropViewRequest, ForeignKeyInfo, IndexInfo, InsertRowRequest,
    ObjectDefinition, QueryParam, QueryResult, RenameColumnRequest, RenameTableRequest,
    SchemaInfo, TableInfo, TriggerInfo, UpdateRowRequest, ViewInfo,
};

/// A SQLite connection handle.
pub struct SqliteDriver {
    core: DriverCore,
    connection: Arc<Mutex<Option<Connection>>>,
    interrupt: RwLock<Option<Arc<InterruptHandle>>>,
    cancel: Arc<CancellationController<Arc<InterruptHandle>>>,
}

impl SqliteDriver {
    /// Create a disconnected handle.
    pub fn new(config: ConnectionConfig) -> TuskResult<Self> {
        Ok(Self {
            core: DriverCore::new(config)?,
            connection: Arc::new(Mutex::new(None)),
            interrupt: RwLock::new(None),
            cancel: Arc::new(CancellationController::new()),
        })
    }

    /// Run `f` against the open connection on the blocking pool.
    async fn with_connection<T, F>(&self, f: F) -> TuskResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> TuskResult<T> + Send + 'static,
    {
        let connection = Arc::clone(&self.connection);
        let name = self.core.config().name.clone();
        tokio::task::spawn_blocking(move || {
            let guard = connection.lock();
            let connection = guard.as_ref().ok_or_else(|| TuskError::not_connected(&name))?;
            f(connection)
        })
        .await
        .map_err(|e| TuskError::internal(format!("SQLite worker failed: {e}")))?
    }

    fn interrupt_handle(&self) -> TuskResult<Arc<InterruptHandle>> {
        self.interrupt.read().clone().ok_or_else(|| TuskError::not_connected(&self.core.config().name))
    }
}

#[async_trait]
impl DatabaseDriver for SqliteDriver {
    fn core(&self) -> &DriverCore {
        &self.core
    }

    async fn connect(&self) -> TuskResult<()> {
        let config = self.core.config().clone();
        if self.core.status().is_connected() && self.interrupt.read().is_some() {
            return Ok(());
        }

        self.core.set_status(ConnectionStatus::Connecting);
        let opened = tokio::task::spawn_blocking({
            let config = config.clone();
            move || connection::open(&config)
        })
        .await
        .map_err(|e| TuskError::internal(format!("SQLite worker failed: {e}")))
        .and_then(|opened| opened);

        match opened {
            Ok(connection) => {
                *self.interrupt.write() = Some(Arc::new(connection.get_interrupt_handle()));
                *self.connection.lock() = Some(connection);
                self.core.set_status(ConnectionStatus::Connected);
                tracing::info!(connection_id = %config.id, url = %config.display_url(), "Connected");
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
        if let Some(interrupt) = self.interrupt.write().take() {
            if self.cancel.is_active() {
                interrupt.interrupt();
            }
        }
        self.cancel.reset();

        // Waits for a running statement to let go of the connection.
        let connection = Arc::clone(&self.connection);
        let closed = tokio::task::spawn_blocking(move || connection.lock().take().is_some()).await;
        if matches!(closed, Ok(true)) {
            tracing::info!(connection_id = %self.core.config().id, "Disconnected");
        }
        self.core.set_status(ConnectionStatus::Disconnected);
    }

    async fn ping(&self) -> bool {
        if self.interrupt.read().is_none() {
            return false;
        }
        self.with_connection(|c| Ok(c.query_row("SELECT 1", [], |_| Ok(()))?)).await.is_ok()
    }

    async fn run_statement(&self, sql: &str, params: &[QueryParam]) -> TuskResult<QueryResult> {
        self.core.ensure_connected()?;
        let started = Instant::now();
        let interrupt = self.interrupt_handle()?;
        let cancel = Arc::clone(&self.cancel);
        let sql = sql.to_string();
        let params = params.to_vec();

        self.with_connection(move |c| {
            let _armed = cancel.arm(interrupt);
            query::run(c, &sql, &params, started)
        })
        .await
    }

    async fn run_atomically(&self, statements: &[(String, Vec<QueryParam>)]) -> TuskResult<()> {
        self.core.ensure_connected()?;
        let interrupt = self.interrupt_handle()?;
        let cancel = Arc::clone(&self.cancel);
        let statements = statements.to_vec();
        let connection_id = self.core.config().id;

        self.with_connection(move |c| {
            let _armed = cancel.arm(interrupt);
            // A savepoint nests inside a transaction the user may have open.
            c.execute_batch("SAVEPOINT tusk_batch")?;
            for (sql, params) in &statements {
                if let Err(e) = query::run(c, sql, params, Instant::now()) {
                    if let Err(rollback) = c.execute_batch("ROLLBACK TO tusk_batch; RELEASE tusk_batch") {
                        tracing::warn!(%connection_id, error = %rollback, "Rollback of failed batch failed");
                    }
                    return Err(e);
                }
            }
            c.execute_batch("RELEASE tusk_batch")?;
            Ok(())
        })
        .await
    }

    async fn cancel(&self) -> bool {
        let Some(active) = self.cancel.current() else {
            return false;
        };
        active.token.interrupt();
        tracing::info!(
            connection_id = %self.core.config().id,
            statement_id = active.id,
            "Cancel requested"
        );
        true
    }

    // ========== Introspection ==========

    async fn get_databases(&self) -> TuskResult<Vec<DatabaseInfo>> {
        self.databases().await
    }

    async fn get_schemas(&self) -> TuskResult<Vec<SchemaInfo>> {
        self.schemas().await
    }

    async fn get_tables(&self, schema: Option<&str>) -> TuskResult<Vec<TableInfo>> {
        self.tables(&self.core.scope(schema)).await
    }

    async fn get_columns(&self, table: &str, schema: Option<&str>) -> TuskResult<Vec<ColumnDetail>> {
        self.columns(table, &self.core.scope(schema)).await
    }

    async fn get_indexes(&self, table: &str, schema: Option<&str>) -> TuskResult<Vec<IndexInfo>> {
        self.indexes(table, &self.core.scope(schema)).await
    }

    async fn get_foreign_keys(
        &self,
        table: &str,
        schema: Option<&str>,
    ) -> TuskResult<Vec<ForeignKeyInfo>> {
        self.foreign_keys(table, &self.core.scope(schema)).await
    }

    async fn get_views(&self, schema: Option<&str>) -> TuskResult<Vec<ViewInfo>> {
        self.views(&self.core.scope(schema)).await
    }

    async fn get_triggers(
        &self,
        table: Option<&str>,
        schema: Option<&str>,
    ) -> TuskResult<Vec<TriggerInfo>> {
        self.triggers(table, &self.core.scope(schema)).await
    }

    async fn get_table_ddl(&self, table: &str, schema: Option<&str>) -> TuskResult<ObjectDefinition> {
        self.table_definition(table, &self.core.scope(schema)).await
    }

    async fn get_view_ddl(&self, view: &str, schema: Option<&str>) -> TuskResult<ObjectDefinition> {
        self.view_definition(view, &self.core.scope(schema)).await
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

    async fn create_trigger(&self, request: &CreateTriggerRequest) -> TuskResult<DdlOperationResult> {
        run_plan(self, ddl::create_trigger(&self.core, request)).await
    }

    async fn drop_trigger(&self, request: &DropTriggerRequest) -> TuskResult<DdlOperationResult> {
        run_plan(self, ddl::drop_trigger(&self.core, request)).await
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ColumnDefinition, EngineType, SchemaObjectKind, TriggerAction, TriggerEvent};
    use serde_json::json;

    async fn connected() -> SqliteDriver {
        let driver = SqliteDriver::new(ConnectionConfig::sqlite("mem", ":memory:")).unwrap();
        driver.connect().await.unwrap();
        driver
    }

    async fn seed(driver: &SqliteDriver) {
        let script = "CREATE TABLE customers (id INTEGER PRIMARY KEY, email VARCHAR(120) NOT NULL UNIQUE);
             CREATE TABLE orders (
                 id INTEGER PRIMARY KEY,
                 customer_id INTEGER NOT NULL REFERENCES customers (id) ON DELETE CASCADE,
                 total REAL DEFAULT 0
             );
             CREATE INDEX orders_customer ON orders (customer_id);
             CREATE VIEW big_orders AS SELECT * FROM orders WHERE total > 100;";
        let result = driver.execute_multiple(script).await.unwrap();
        assert_eq!(result.error_count(), 0);
    }

    #[tokio::test]
    async fn test_connect_and_disconnect_lifecycle() {
        let driver = connected().await;
        assert_eq!(driver.engine(), EngineType::Sqlite);
        assert!(driver.status().is_connected());
        assert!(driver.ping().await);

        driver.connect().await.unwrap();
        driver.disconnect().await;
        driver.disconnect().await;
        assert!(driver.status().is_disconnected());
        assert!(!driver.ping().await);
        assert!(matches!(
            driver.run_statement("SELECT 1", &[]).await,
            Err(TuskError::Precondition { .. })
        ));
    }

    #[tokio::test]
    async fn test_connect_failure_leaves_error_status() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("missing").join("db.sqlite");
        let driver = SqliteDriver::new(ConnectionConfig::sqlite("bad", path)).unwrap();
        let err = driver.connect().await.unwrap_err();
        assert!(matches!(err, TuskError::Connection { .. }));
        assert!(driver.status().is_error());
    }

    #[tokio::test]
    async fn test_params_bind_natively() {
        let driver = connected().await;
        let result = driver
            .execute("SELECT ? AS n, ? AS s, ? AS b, ? AS nothing", &[json!(7), json!("x"), json!(true), json!(null)])
            .await
            .unwrap();
        assert!(result.error.is_none());
        assert_eq!(result.rows[0]["n"], json!(7));
        assert_eq!(result.rows[0]["s"], json!("x"));
        assert_eq!(result.rows[0]["b"], json!(1));
        assert_eq!(result.rows[0]["nothing"], json!(null));
    }

    #[tokio::test]
    async fn test_introspection_reads_catalog() {
        let driver = connected().await;
        seed(&driver).await;

        let tables = driver.get_tables(None).await.unwrap();
        let names: Vec<&str> = tables.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, ["customers", "orders"]);
        assert!(tables.iter().all(|t| t.schema == "main"));

        let columns = driver.get_columns("customers", None).await.unwrap();
        assert_eq!(columns.len(), 2);
        assert!(columns[0].is_primary_key && columns[0].is_identity);
        assert_eq!(columns[1].max_length, Some(120));
        assert!(!columns[1].is_nullable);

        let indexes = driver.get_indexes("orders", None).await.unwrap();
        assert_eq!(indexes.len(), 1);
        assert_eq!(indexes[0].columns, ["customer_id"]);
        assert!(indexes[0].definition.as_deref().unwrap_or("").contains("CREATE INDEX"));

        let unique = driver.get_indexes("customers", None).await.unwrap();
        assert!(unique.iter().any(|i| i.is_unique && i.columns == ["email"]));

        let fks = driver.get_foreign_keys("orders", None).await.unwrap();
        assert_eq!(fks.len(), 1);
        assert_eq!(fks[0].referenced_table, "customers");
        assert_eq!(fks[0].columns, ["customer_id"]);
        assert_eq!(fks[0].on_delete.as_deref(), Some("CASCADE"));

        let views = driver.get_views(None).await.unwrap();
        assert_eq!(views.len(), 1);
        assert_eq!(views[0].name, "big_orders");

        let schemas = driver.get_schemas().await.unwrap();
        assert_eq!(schemas[0].name, "main");
        let databases = driver.get_databases().await.unwrap();
        assert!(databases.iter().any(|d| d.name == "main" && d.is_current));
    }

    #[tokio::test]
    async fn test_unsupported_kinds_use_defaults() {
        let driver = connected().await;
        assert!(driver.get_sequences(None).await.unwrap().is_empty());
        assert!(driver.get_extensions().await.unwrap().is_empty());
        assert!(driver.get_users().await.unwrap().is_empty());

        let result = driver.create_user(&crate::models::CreateUserRequest::new("bob")).await.unwrap();
        assert!(!result.success);
        assert!(result.error.unwrap().contains("not supported"));
    }

    #[tokio::test]
    async fn test_definitions() {
        let driver = connected().await;
        seed(&driver).await;

        let table = driver.get_table_ddl("orders", None).await.unwrap();
        let sql = table.as_sql().unwrap();
        assert!(sql.starts_with("CREATE TABLE orders"));
        assert!(sql.contains("CREATE INDEX orders_customer"));

        let view = driver.get_view_ddl("big_orders", None).await.unwrap();
        assert!(view.as_sql().unwrap().ends_with(';'));

        match driver.get_table_ddl("nope", None).await.unwrap() {
            ObjectDefinition::NotFound { kind, .. } => assert_eq!(kind, SchemaObjectKind::Table),
            other => panic!("expected NotFound, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_trigger_round_trip() {
        let driver = connected().await;
        seed(&driver).await;
        driver.execute("CREATE TABLE audit (order_id INTEGER)", &[]).await.unwrap();

        let created = driver
            .create_trigger(&CreateTriggerRequest {
                table: "orders".into(),
                name: "orders_audit".into(),
                timing: crate::models::TriggerTiming::After,
                events: vec![TriggerEvent::Insert],
                action: TriggerAction::Body("INSERT INTO audit VALUES (NEW.id)".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(created.success, "{:?}", created.error);

        let triggers = driver.get_triggers(Some("orders"), None).await.unwrap();
        assert_eq!(triggers.len(), 1);
        assert_eq!(triggers[0].timing.as_deref(), Some("AFTER"));
        assert_eq!(triggers[0].events, ["INSERT"]);

        let definition = driver.get_trigger_definition("orders_audit", "orders", None).await.unwrap();
        assert!(definition.is_found());
        assert!(driver.get_triggers(Some("customers"), None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_add_column_and_row_mutations() {
        let driver = connected().await;
        seed(&driver).await;

        let added = driver
            .add_column(&AddColumnRequest {
                table: "customers".into(),
                column: ColumnDefinition::new("name", "TEXT"),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(added.success, "{:?}", added.error);

        let values = json!({"email": "a@example.com", "name": "Ann"});
        let inserted = driver
            .insert_row(&InsertRowRequest {
                table: "customers".into(),
                values: values.as_object().cloned().unwrap(),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(inserted.success, "{:?}", inserted.error);
        assert!(inserted.sql.contains("'a@example.com'"));

        let updated = driver
            .update_row(&UpdateRowRequest {
                table: "customers".into(),
                key: json!({"id": 1}).as_object().cloned().unwrap(),
                values: json!({"name": "Anne"}).as_object().cloned().unwrap(),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(updated.success, "{:?}", updated.error);

        let name = driver.execute("SELECT name FROM customers WHERE id = 1", &[]).await.unwrap();
        assert_eq!(name.rows[0]["name"], json!("Anne"));

        let deleted = driver
            .delete_row(&DeleteRowRequest {
                table: "customers".into(),
                key: json!({"id": 1}).as_object().cloned().unwrap(),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(deleted.success);
        let left = driver.execute("SELECT count(*) AS n FROM customers", &[]).await.unwrap();
        assert_eq!(left.rows[0]["n"], json!(0));
    }

    #[tokio::test]
    async fn test_foreign_keys_are_enforced() {
        let driver = connected().await;
        seed(&driver).await;
        let result = driver
            .execute("INSERT INTO orders (customer_id) VALUES (?)", &[json!(999)])
            .await
            .unwrap();
        assert!(result.error.is_some());
    }

    #[tokio::test]
    async fn test_cancel_interrupts_running_statement() {
        let driver = Arc::new(connected().await);
        let runner = Arc::clone(&driver);
        let running = tokio::spawn(async move {
            runner
                .execute(
                    "WITH RECURSIVE n(i) AS (SELECT 1 UNION ALL SELECT i + 1 FROM n) \
                     SELECT count(*) FROM n",
                    &[],
                )
                .await
        });

        // An interrupt that lands before the statement starts is lost, so keep asking.
        let mut delivered = false;
        for _ in 0..500 {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            delivered |= driver.cancel().await;
            if running.is_finished() {
                break;
            }
        }
        assert!(delivered);

        let result = running.await.unwrap().unwrap();
        assert!(result.error.is_some());
        assert!(driver.ping().await);
    }

    #[tokio::test]
    async fn test_cancel_still_reaches_statement_after_caller_times_out() {
        let driver = connected().await;
        let timed_out = tokio::time::timeout(
            std::time::Duration::from_millis(200),
            driver.execute(
                "WITH RECURSIVE n(i) AS (SELECT 1 UNION ALL SELECT i + 1 FROM n) \
                 SELECT count(*) FROM n",
                &[],
            ),
        )
        .await;
        assert!(timed_out.is_err());

        let mut delivered = false;
        for _ in 0..100 {
            if driver.cancel().await {
                delivered = true;
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert!(delivered);

        let next = tokio::time::timeout(std::time::Duration::from_secs(5), driver.execute("SELECT 1", &[]))
            .await
            .expect("handle is free again after cancel")
            .unwrap();
        assert!(next.error.is_none());
        assert!(!driver.cancel().await);
    }

    #[tokio::test]
    async fn test_create_table_with_failing_index_leaves_nothing_behind() {
        let driver = connected().await;
        let request = CreateTableRequest {
            name: "widgets".into(),
            columns: vec![ColumnDefinition::new("id", "INTEGER").primary_key()],
            indexes: vec![crate::models::IndexDefinition {
                name: "widgets_missing".into(),
                columns: vec!["no_such_column".into()],
                ..Default::default()
            }],
            ..Default::default()
        };

        let failed = driver.create_table(&request).await.unwrap();
        assert!(!failed.success);
        assert!(failed.sql.contains("CREATE TABLE"));
        assert!(driver.get_tables(None).await.unwrap().is_empty());

        let fixed = CreateTableRequest { indexes: Vec::new(), ..request };
        let created = driver.create_table(&fixed).await.unwrap();
        assert!(created.success, "{:?}", created.error);
    }

    #[tokio::test]
    async fn test_atomic_batch_nests_inside_open_transaction() {
        let driver = connected().await;
        driver.execute("BEGIN", &[]).await.unwrap();
        driver
            .run_atomically(&[("CREATE TABLE a (x INTEGER)".to_string(), Vec::new())])
            .await
            .unwrap();
        driver.execute("ROLLBACK", &[]).await.unwrap();
        assert!(driver.get_tables(None).await.unwrap().is_empty());
    }
}
