//! Typed requests for schema and data mutations.
//!
//! Every request names its target by `schema` + object name. A `None` schema
//! means the driver's current schema. Literal values (defaults excepted, which
//! are SQL expressions) are bound as parameters by the drivers.

use serde::{Deserialize, Serialize};

use super::query::Row;

/// Outcome of a mutation. Returned for statement failures, never thrown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DdlOperationResult {
    /// Whether every statement succeeded
    pub success: bool,
    /// The attempted SQL, with secrets redacted
    pub sql: String,
    /// Engine error text when the operation failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DdlOperationResult {
    /// A successful operation.
    pub fn ok(sql: impl Into<String>) -> Self {
        Self { success: true, sql: sql.into(), error: None }
    }

    /// A failed operation.
    pub fn failed(sql: impl Into<String>, error: impl Into<String>) -> Self {
        Self { success: false, sql: sql.into(), error: Some(error.into()) }
    }

    /// An operation the engine has no statement for.
    pub fn unsupported(operation: &str, engine: impl std::fmt::Display) -> Self {
        Self::failed(String::new(), format!("{operation} is not supported for {engine}"))
    }
}

/// ON DELETE / ON UPDATE behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ReferentialAction {
    /// NO ACTION
    #[default]
    NoAction,
    /// RESTRICT
    Restrict,
    /// CASCADE
    Cascade,
    /// SET NULL
    SetNull,
    /// SET DEFAULT
    SetDefault,
}

impl ReferentialAction {
    /// SQL keyword form.
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::NoAction => "NO ACTION",
            Self::Restrict => "RESTRICT",
            Self::Cascade => "CASCADE",
            Self::SetNull => "SET NULL",
            Self::SetDefault => "SET DEFAULT",
        }
    }
}

/// Index access method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum IndexMethod {
    /// B-tree
    #[default]
    Btree,
    /// Hash
    Hash,
    /// GiST
    Gist,
    /// GIN
    Gin,
    /// BRIN
    Brin,
}

impl IndexMethod {
    /// SQL keyword form.
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::Btree => "btree",
            Self::Hash => "hash",
            Self::Gist => "gist",
            Self::Gin => "gin",
            Self::Brin => "brin",
        }
    }
}

/// Column definition used by CREATE TABLE and ADD COLUMN.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ColumnDefinition {
    /// Column name
    pub name: String,
    /// Declared type (e.g. "integer", "varchar(100)")
    pub data_type: String,
    /// Whether NULL is allowed
    pub nullable: bool,
    /// Default expression, as SQL
    pub default: Option<String>,
    /// Column-level primary key flag
    pub primary_key: bool,
    /// UNIQUE constraint
    pub unique: bool,
    /// Auto-increment; the driver picks the serial type from the integer width
    pub auto_increment: bool,
    /// Column comment
    pub comment: Option<String>,
}

impl ColumnDefinition {
    /// A nullable column with no constraints.
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self { name: name.into(), data_type: data_type.into(), nullable: true, ..Self::default() }
    }

    /// Mark NOT NULL.
    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    /// Mark as the primary key.
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.nullable = false;
        self
    }

    /// Mark as auto-increment.
    pub fn auto_increment(mut self) -> Self {
        self.auto_increment = true;
        self
    }

    /// Set a default expression.
    pub fn default_expr(mut self, expr: impl Into<String>) -> Self {
        self.default = Some(expr.into());
        self
    }
}

/// Foreign key definition.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ForeignKeyDefinition {
    /// Constraint name (engine-generated when None)
    pub name: Option<String>,
    /// Referencing columns
    pub columns: Vec<String>,
    /// Schema of the referenced table (same schema when None)
    pub referenced_schema: Option<String>,
    /// Referenced table
    pub referenced_table: String,
    /// Referenced columns
    pub referenced_columns: Vec<String>,
    /// ON DELETE action
    pub on_delete: Option<ReferentialAction>,
    /// ON UPDATE action
    pub on_update: Option<ReferentialAction>,
}

/// Index definition.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct IndexDefinition {
    /// Index name
    pub name: String,
    /// Indexed columns
    pub columns: Vec<String>,
    /// UNIQUE index
    pub unique: bool,
    /// Access method
    pub method: Option<IndexMethod>,
    /// Partial index predicate, as SQL
    pub where_clause: Option<String>,
}

/// Change to a column default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DefaultChange {
    /// SET DEFAULT expression
    Set(String),
    /// DROP DEFAULT
    Drop,
}

/// ADD COLUMN.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AddColumnRequest {
    pub schema: Option<String>,
    pub table: String,
    pub column: ColumnDefinition,
}

/// ALTER COLUMN. Only the `Some` parts are changed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModifyColumnRequest {
    pub schema: Option<String>,
    pub table: String,
    pub column: String,
    /// New type
    pub data_type: Option<String>,
    /// New nullability
    pub nullable: Option<bool>,
    /// New default
    pub default: Option<DefaultChange>,
}

/// DROP COLUMN.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DropColumnRequest {
    pub schema: Option<String>,
    pub table: String,
    pub column: String,
    pub cascade: bool,
}

/// RENAME COLUMN.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RenameColumnRequest {
    pub schema: Option<String>,
    pub table: String,
    pub old_name: String,
    pub new_name: String,
}

/// CREATE INDEX.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateIndexRequest {
    pub schema: Option<String>,
    pub table: String,
    pub index: IndexDefinition,
    /// Build without locking writes (PostgreSQL)
    pub concurrently: bool,
    pub if_not_exists: bool,
}

/// DROP INDEX.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DropIndexRequest {
    pub schema: Option<String>,
    pub name: String,
    pub cascade: bool,
    pub if_exists: bool,
}

/// ADD CONSTRAINT ... FOREIGN KEY.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AddForeignKeyRequest {
    pub schema: Option<String>,
    pub table: String,
    pub foreign_key: ForeignKeyDefinition,
}

/// DROP CONSTRAINT for a foreign key.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DropForeignKeyRequest {
    pub schema: Option<String>,
    pub table: String,
    pub name: String,
}

/// CREATE TABLE.
///
/// The primary key is either one column with `primary_key` set or a
/// table-level `primary_key` list, never both.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateTableRequest {
    pub schema: Option<String>,
    pub name: String,
    pub columns: Vec<ColumnDefinition>,
    /// Table-level (possibly composite) primary key
    pub primary_key: Vec<String>,
    pub foreign_keys: Vec<ForeignKeyDefinition>,
    pub indexes: Vec<IndexDefinition>,
    /// Applied after creation; its failure does not fail the operation
    pub comment: Option<String>,
    pub if_not_exists: bool,
}

impl CreateTableRequest {
    /// Columns that make up the primary key, wherever it was declared.
    pub fn primary_key_columns(&self) -> Vec<&str> {
        if !self.primary_key.is_empty() {
            return self.primary_key.iter().map(String::as_str).collect();
        }
        self.columns.iter().filter(|c| c.primary_key).map(|c| c.name.as_str()).collect()
    }

    /// Check the primary key rules.
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("Table name is required".to_string());
        }
        if self.columns.is_empty() {
            return Err("A table needs at least one column".to_string());
        }
        let flagged = self.columns.iter().filter(|c| c.primary_key).count();
        if flagged > 0 && !self.primary_key.is_empty() {
            return Err(
                "Declare the primary key either on a column or as a table constraint, not both"
                    .to_string(),
            );
        }
        if flagged > 1 {
            return Err(
                "Only one column can be flagged as primary key; use a composite primary key instead"
                    .to_string(),
            );
        }
        for pk in &self.primary_key {
            if !self.columns.iter().any(|c| &c.name == pk) {
                return Err(format!("Primary key column '{pk}' is not defined"));
            }
        }
        Ok(())
    }
}

/// DROP TABLE.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DropTableRequest {
    pub schema: Option<String>,
    pub name: String,
    pub cascade: bool,
    pub if_exists: bool,
}

/// RENAME TABLE.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RenameTableRequest {
    pub schema: Option<String>,
    pub old_name: String,
    pub new_name: String,
}

/// CREATE VIEW or CREATE MATERIALIZED VIEW.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateViewRequest {
    pub schema: Option<String>,
    pub name: String,
    /// SELECT statement
    pub query: String,
    pub or_replace: bool,
    pub materialized: bool,
}

/// DROP VIEW.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DropViewRequest {
    pub schema: Option<String>,
    pub name: String,
    pub materialized: bool,
    pub cascade: bool,
    pub if_exists: bool,
}

/// RENAME VIEW.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RenameViewRequest {
    pub schema: Option<String>,
    pub old_name: String,
    pub new_name: String,
    pub materialized: bool,
}

/// CREATE SEQUENCE.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateSequenceRequest {
    pub schema: Option<String>,
    pub name: String,
    /// smallint, integer or bigint
    pub data_type: Option<String>,
    pub start: Option<i64>,
    pub increment: Option<i64>,
    pub min_value: Option<i64>,
    pub max_value: Option<i64>,
    pub cache: Option<i64>,
    pub cycle: bool,
}

/// ALTER SEQUENCE. Only the `Some` parts are changed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AlterSequenceRequest {
    pub schema: Option<String>,
    pub name: String,
    pub increment: Option<i64>,
    pub min_value: Option<i64>,
    pub max_value: Option<i64>,
    pub restart_with: Option<i64>,
    pub cache: Option<i64>,
    pub cycle: Option<bool>,
}

/// DROP SEQUENCE.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DropSequenceRequest {
    pub schema: Option<String>,
    pub name: String,
    pub cascade: bool,
    pub if_exists: bool,
}

/// REFRESH MATERIALIZED VIEW.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshMaterializedViewRequest {
    pub schema: Option<String>,
    pub name: String,
    /// Refresh without locking reads (needs a unique index)
    pub concurrently: bool,
    /// WITH NO DATA when false
    pub with_data: bool,
}

impl Default for RefreshMaterializedViewRequest {
    fn default() -> Self {
        Self { schema: None, name: String::new(), concurrently: false, with_data: true }
    }
}

/// CREATE EXTENSION.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateExtensionRequest {
    pub name: String,
    pub schema: Option<String>,
    pub version: Option<String>,
    pub if_not_exists: bool,
    pub cascade: bool,
}

/// DROP EXTENSION.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DropExtensionRequest {
    pub name: String,
    pub cascade: bool,
    pub if_exists: bool,
}

/// When a trigger fires relative to the event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TriggerTiming {
    #[default]
    Before,
    After,
    InsteadOf,
}

impl TriggerTiming {
    /// SQL keyword form.
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::Before => "BEFORE",
            Self::After => "AFTER",
            Self::InsteadOf => "INSTEAD OF",
        }
    }
}

/// Event a trigger fires on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriggerEvent {
    Insert,
    /// UPDATE, optionally limited to some columns
    Update(Vec<String>),
    Delete,
    Truncate,
}

/// Row- or statement-level trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TriggerForEach {
    #[default]
    Row,
    Statement,
}

impl TriggerForEach {
    /// SQL keyword form.
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::Row => "ROW",
            Self::Statement => "STATEMENT",
        }
    }
}

/// What a trigger runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriggerAction {
    /// EXECUTE FUNCTION schema.name(args)
    ExecuteFunction {
        schema: Option<String>,
        name: String,
        arguments: Vec<String>,
    },
    /// Inline statement body (BEGIN ... END for SQLite)
    Body(String),
}

impl Default for TriggerAction {
    fn default() -> Self {
        Self::Body(String::new())
    }
}

/// CREATE TRIGGER.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateTriggerRequest {
    pub schema: Option<String>,
    pub table: String,
    pub name: String,
    pub timing: TriggerTiming,
    pub events: Vec<TriggerEvent>,
    pub for_each: TriggerForEach,
    /// WHEN condition, as SQL
    pub when: Option<String>,
    pub action: TriggerAction,
}

/// DROP TRIGGER.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DropTriggerRequest {
    pub schema: Option<String>,
    pub table: String,
    pub name: String,
    pub cascade: bool,
    pub if_exists: bool,
}

/// CREATE ROLE ... LOGIN.
#[derive(Clone, Serialize, Deserialize)]
pub struct CreateUserRequest {
    pub name: String,
    /// Bound on the wire, redacted in returned SQL
    pub password: Option<String>,
    pub superuser: bool,
    pub create_db: bool,
    pub create_role: bool,
    pub login: bool,
    pub connection_limit: Option<i32>,
    /// VALID UNTIL timestamp
    pub valid_until: Option<String>,
}

impl CreateUserRequest {
    /// A login role with no extra privileges.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            password: None,
            superuser: false,
            create_db: false,
            create_role: false,
            login: true,
            connection_limit: None,
            valid_until: None,
        }
    }

    /// Set the password.
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }
}

impl std::fmt::Debug for CreateUserRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CreateUserRequest")
            .field("name", &self.name)
            .field("password", &self.password.as_ref().map(|_| "****"))
            .field("superuser", &self.superuser)
            .field("create_db", &self.create_db)
            .field("create_role", &self.create_role)
            .field("login", &self.login)
            .field("connection_limit", &self.connection_limit)
            .field("valid_until", &self.valid_until)
            .finish()
    }
}

/// DROP ROLE.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DropUserRequest {
    pub name: String,
    pub if_exists: bool,
}

/// INSERT one row.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InsertRowRequest {
    pub schema: Option<String>,
    pub table: String,
    /// Column name to value
    pub values: Row,
}

/// DELETE rows matching a key.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeleteRowRequest {
    pub schema: Option<String>,
    pub table: String,
    /// Column name to value; all must match. Must not be empty.
    pub key: Row,
}

/// UPDATE rows matching a key.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateRowRequest {
    pub schema: Option<String>,
    pub table: String,
    /// Column name to value; all must match. Must not be empty.
    pub key: Row,
    /// Column name to new value
    pub values: Row,
}
