//! Schema introspection models.
//!
//! Descriptors are decoded straight from catalog result rows, so field names
//! match the column aliases used by each engine's catalog queries. Absent
//! metadata is `None`, never a made-up default.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use std::fmt;

/// A database on the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseInfo {
    /// Database name.
    pub name: String,
    /// Owner role, if the engine has one.
    #[serde(default)]
    pub owner: Option<String>,
    /// Character encoding.
    #[serde(default)]
    pub encoding: Option<String>,
    /// Size on disk in bytes.
    #[serde(default, deserialize_with = "lenient::opt_i64")]
    pub size_bytes: Option<i64>,
    /// Whether this is the database the handle is connected to.
    #[serde(deserialize_with = "lenient::bool")]
    pub is_current: bool,
}

/// A schema (namespace), or an attached database for SQLite.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaInfo {
    /// Schema name (e.g., "public").
    pub name: String,
    /// Schema owner.
    #[serde(default)]
    pub owner: Option<String>,
}

/// A table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableInfo {
    /// Schema containing this table.
    pub schema: String,
    /// Table name.
    pub name: String,
    /// Table owner.
    #[serde(default)]
    pub owner: Option<String>,
    /// Estimated row count from planner statistics.
    #[serde(default, deserialize_with = "lenient::opt_i64")]
    pub estimated_rows: Option<i64>,
    /// Table size in bytes.
    #[serde(default, deserialize_with = "lenient::opt_i64")]
    pub size_bytes: Option<i64>,
    /// Table comment.
    #[serde(default)]
    pub comment: Option<String>,
}

/// A table or view column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDetail {
    /// Column name.
    pub name: String,
    /// Declared data type (e.g., "integer", "character varying(255)").
    pub data_type: String,
    /// Whether the column allows NULL values.
    #[serde(deserialize_with = "lenient::bool")]
    pub is_nullable: bool,
    /// Whether this column is part of the primary key.
    #[serde(deserialize_with = "lenient::bool")]
    pub is_primary_key: bool,
    /// Default value expression, if any.
    #[serde(default)]
    pub default_value: Option<String>,
    /// Column position (1-based ordinal).
    #[serde(deserialize_with = "lenient::i64")]
    pub ordinal_position: i64,
    /// Maximum character length for bounded text types.
    #[serde(default, deserialize_with = "lenient::opt_i64")]
    pub max_length: Option<i64>,
    /// Whether the column is an identity / autoincrement column.
    #[serde(default, deserialize_with = "lenient::bool")]
    pub is_identity: bool,
    /// Column comment.
    #[serde(default)]
    pub comment: Option<String>,
}

/// An index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexInfo {
    /// Schema containing the indexed table.
    pub schema: String,
    /// Indexed table.
    pub table: String,
    /// Index name.
    pub name: String,
    /// Indexed columns or expressions, in key order.
    #[serde(default, deserialize_with = "lenient::string_list")]
    pub columns: Vec<String>,
    /// Whether the index enforces uniqueness.
    #[serde(deserialize_with = "lenient::bool")]
    pub is_unique: bool,
    /// Whether the index backs the primary key.
    #[serde(deserialize_with = "lenient::bool")]
    pub is_primary: bool,
    /// Access method (btree, hash, gin, ...).
    #[serde(default)]
    pub method: Option<String>,
    /// Full CREATE INDEX statement, when the engine stores one.
    #[serde(default)]
    pub definition: Option<String>,
}

/// A foreign-key constraint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForeignKeyInfo {
    /// Schema containing the referencing table.
    pub schema: String,
    /// Referencing table.
    pub table: String,
    /// Constraint name.
    pub name: String,
    /// Referencing columns.
    #[serde(deserialize_with = "lenient::string_list")]
    pub columns: Vec<String>,
    /// Schema of the referenced table.
    pub referenced_schema: String,
    /// Referenced table.
    pub referenced_table: String,
    /// Referenced columns.
    #[serde(deserialize_with = "lenient::string_list")]
    pub referenced_columns: Vec<String>,
    /// ON UPDATE action.
    #[serde(default)]
    pub on_update: Option<String>,
    /// ON DELETE action.
    #[serde(default)]
    pub on_delete: Option<String>,
}

/// A sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequenceInfo {
    /// Schema containing the sequence.
    pub schema: String,
    /// Sequence name.
    pub name: String,
    /// Value type (bigint, integer, smallint).
    #[serde(default)]
    pub data_type: Option<String>,
    /// START WITH value.
    #[serde(default, deserialize_with = "lenient::opt_i64")]
    pub start_value: Option<i64>,
    /// MINVALUE.
    #[serde(default, deserialize_with = "lenient::opt_i64")]
    pub min_value: Option<i64>,
    /// MAXVALUE.
    #[serde(default, deserialize_with = "lenient::opt_i64")]
    pub max_value: Option<i64>,
    /// INCREMENT BY.
    #[serde(default, deserialize_with = "lenient::opt_i64")]
    pub increment: Option<i64>,
    /// Whether the sequence wraps around.
    #[serde(default, deserialize_with = "lenient::bool")]
    pub cycle: bool,
    /// Last value handed out, if any.
    #[serde(default, deserialize_with = "lenient::opt_i64")]
    pub last_value: Option<i64>,
}

/// A view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewInfo {
    /// Schema containing this view.
    pub schema: String,
    /// View name.
    pub name: String,
    /// View owner.
    #[serde(default)]
    pub owner: Option<String>,
    /// Stored SELECT definition.
    #[serde(default)]
    pub definition: Option<String>,
    /// View comment.
    #[serde(default)]
    pub comment: Option<String>,
}

/// A materialized view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaterializedViewInfo {
    /// Schema containing this view.
    pub schema: String,
    /// View name.
    pub name: String,
    /// View owner.
    #[serde(default)]
    pub owner: Option<String>,
    /// Whether the view holds data (has been refreshed).
    #[serde(deserialize_with = "lenient::bool")]
    pub is_populated: bool,
    /// Stored SELECT definition.
    #[serde(default)]
    pub definition: Option<String>,
}

/// An installed extension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtensionInfo {
    /// Extension name.
    pub name: String,
    /// Installed version.
    #[serde(default)]
    pub version: Option<String>,
    /// Schema holding the extension's objects.
    #[serde(default)]
    pub schema: Option<String>,
    /// Extension description.
    #[serde(default)]
    pub description: Option<String>,
}

/// An enumerated type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnumInfo {
    /// Schema containing the type.
    pub schema: String,
    /// Type name.
    pub name: String,
    /// Labels in sort order.
    #[serde(deserialize_with = "lenient::string_list")]
    pub values: Vec<String>,
}

/// A trigger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerInfo {
    /// Schema containing the table.
    pub schema: String,
    /// Table the trigger fires on.
    pub table: String,
    /// Trigger name.
    pub name: String,
    /// BEFORE, AFTER or INSTEAD OF.
    #[serde(default)]
    pub timing: Option<String>,
    /// Firing events (INSERT, UPDATE, DELETE, TRUNCATE).
    #[serde(default, deserialize_with = "lenient::string_list")]
    pub events: Vec<String>,
    /// Function the trigger executes.
    #[serde(default)]
    pub function: Option<String>,
    /// Whether the trigger is enabled.
    #[serde(default = "enabled_default", deserialize_with = "lenient::bool")]
    pub enabled: bool,
}

fn enabled_default() -> bool {
    true
}

/// A function, procedure or aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutineInfo {
    /// Schema containing the routine.
    pub schema: String,
    /// Routine name.
    pub name: String,
    /// FUNCTION, PROCEDURE, AGGREGATE or WINDOW.
    pub kind: String,
    /// Identity argument list.
    #[serde(default)]
    pub arguments: Option<String>,
    /// Return type (None for procedures).
    #[serde(default)]
    pub return_type: Option<String>,
    /// Implementation language.
    #[serde(default)]
    pub language: Option<String>,
    /// IMMUTABLE, STABLE or VOLATILE.
    #[serde(default)]
    pub volatility: Option<String>,
}

/// A login role / user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserInfo {
    /// Role name.
    pub name: String,
    /// Whether the role is a superuser.
    #[serde(deserialize_with = "lenient::bool")]
    pub is_superuser: bool,
    /// Whether the role can log in.
    #[serde(deserialize_with = "lenient::bool")]
    pub can_login: bool,
    /// Whether the role can create databases.
    #[serde(deserialize_with = "lenient::bool")]
    pub can_create_db: bool,
    /// Whether the role can create roles.
    #[serde(deserialize_with = "lenient::bool")]
    pub can_create_role: bool,
    /// Connection limit (None = unlimited).
    #[serde(default, deserialize_with = "lenient::opt_i64")]
    pub connection_limit: Option<i64>,
    /// Password expiry.
    #[serde(default)]
    pub valid_until: Option<String>,
}

/// Kind of schema object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SchemaObjectKind {
    /// Table
    Table,
    /// View
    View,
    /// Materialized view
    MaterializedView,
    /// Index
    Index,
    /// Foreign key
    ForeignKey,
    /// Sequence
    Sequence,
    /// Extension
    Extension,
    /// Enum type
    Enum,
    /// Trigger
    Trigger,
    /// Function or procedure
    Routine,
    /// Login role
    User,
}

impl SchemaObjectKind {
    /// Human-readable label.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Table => "Table",
            Self::View => "View",
            Self::MaterializedView => "Materialized view",
            Self::Index => "Index",
            Self::ForeignKey => "Foreign key",
            Self::Sequence => "Sequence",
            Self::Extension => "Extension",
            Self::Enum => "Enum",
            Self::Trigger => "Trigger",
            Self::Routine => "Routine",
            Self::User => "User",
        }
    }
}

impl fmt::Display for SchemaObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Any introspected schema object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "object")]
pub enum SchemaObject {
    /// Table
    Table(TableInfo),
    /// View
    View(ViewInfo),
    /// Materialized view
    MaterializedView(MaterializedViewInfo),
    /// Index
    Index(IndexInfo),
    /// Foreign key
    ForeignKey(ForeignKeyInfo),
    /// Sequence
    Sequence(SequenceInfo),
    /// Extension
    Extension(ExtensionInfo),
    /// Enum type
    Enum(EnumInfo),
    /// Trigger
    Trigger(TriggerInfo),
    /// Function or procedure
    Routine(RoutineInfo),
    /// Login role
    User(UserInfo),
}

impl SchemaObject {
    /// Object kind.
    pub fn kind(&self) -> SchemaObjectKind {
        match self {
            Self::Table(_) => SchemaObjectKind::Table,
            Self::View(_) => SchemaObjectKind::View,
            Self::MaterializedView(_) => SchemaObjectKind::MaterializedView,
            Self::Index(_) => SchemaObjectKind::Index,
            Self::ForeignKey(_) => SchemaObjectKind::ForeignKey,
            Self::Sequence(_) => SchemaObjectKind::Sequence,
            Self::Extension(_) => SchemaObjectKind::Extension,
            Self::Enum(_) => SchemaObjectKind::Enum,
            Self::Trigger(_) => SchemaObjectKind::Trigger,
            Self::Routine(_) => SchemaObjectKind::Routine,
            Self::User(_) => SchemaObjectKind::User,
        }
    }

    /// Object name.
    pub fn name(&self) -> &str {
        match self {
            Self::Table(o) => &o.name,
            Self::View(o) => &o.name,
            Self::MaterializedView(o) => &o.name,
            Self::Index(o) => &o.name,
            Self::ForeignKey(o) => &o.name,
            Self::Sequence(o) => &o.name,
            Self::Extension(o) => &o.name,
            Self::Enum(o) => &o.name,
            Self::Trigger(o) => &o.name,
            Self::Routine(o) => &o.name,
            Self::User(o) => &o.name,
        }
    }

    /// Owning schema, or `None` for server-wide objects.
    pub fn schema(&self) -> Option<&str> {
        match self {
            Self::Table(o) => Some(&o.schema),
            Self::View(o) => Some(&o.schema),
            Self::MaterializedView(o) => Some(&o.schema),
            Self::Index(o) => Some(&o.schema),
            Self::ForeignKey(o) => Some(&o.schema),
            Self::Sequence(o) => Some(&o.schema),
            Self::Extension(o) => o.schema.as_deref(),
            Self::Enum(o) => Some(&o.schema),
            Self::Trigger(o) => Some(&o.schema),
            Self::Routine(o) => Some(&o.schema),
            Self::User(_) => None,
        }
    }
}

/// Outcome of a definition lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObjectDefinition {
    /// The assembled DDL or stored definition.
    Found(String),
    /// No object with that name exists.
    NotFound {
        /// Kind that was looked up.
        kind: SchemaObjectKind,
        /// Qualified name that was looked up.
        name: String,
    },
}

impl ObjectDefinition {
    /// Build a not-found marker.
    pub fn not_found(kind: SchemaObjectKind, name: impl Into<String>) -> Self {
        Self::NotFound { kind, name: name.into() }
    }

    /// Whether the object exists.
    pub fn is_found(&self) -> bool {
        matches!(self, Self::Found(_))
    }

    /// The definition text, if found.
    pub fn as_sql(&self) -> Option<&str> {
        match self {
            Self::Found(sql) => Some(sql),
            Self::NotFound { .. } => None,
        }
    }

    /// Render as text, with a SQL comment marker when not found.
    pub fn render(&self) -> String {
        match self {
            Self::Found(sql) => sql.clone(),
            Self::NotFound { kind, name } => format!("-- {kind} {name} not found"),
        }
    }
}

/// Snapshot of one schema for a schema browser. Built fresh on every call.
#[derive(Debug, Clone, Default)]
pub struct DatabaseSchema {
    /// Schema the snapshot was taken from.
    pub schema: String,
    /// Tables in the schema.
    pub tables: Vec<TableInfo>,
    /// Views in the schema.
    pub views: Vec<ViewInfo>,
    /// Materialized views in the schema.
    pub materialized_views: Vec<MaterializedViewInfo>,
    /// Sequences in the schema.
    pub sequences: Vec<SequenceInfo>,
    /// Enum types in the schema.
    pub enums: Vec<EnumInfo>,
    /// Functions and procedures in the schema.
    pub routines: Vec<RoutineInfo>,
    /// Columns for each table, keyed by table name.
    pub table_columns: HashMap<String, Vec<ColumnDetail>>,
}

impl DatabaseSchema {
    /// Flatten into tagged schema objects.
    pub fn objects(&self) -> Vec<SchemaObject> {
        let mut objects = Vec::new();
        objects.extend(self.tables.iter().cloned().map(SchemaObject::Table));
        objects.extend(self.views.iter().cloned().map(SchemaObject::View));
        objects.extend(self.materialized_views.iter().cloned().map(SchemaObject::MaterializedView));
        objects.extend(self.sequences.iter().cloned().map(SchemaObject::Sequence));
        objects.extend(self.enums.iter().cloned().map(SchemaObject::Enum));
        objects.extend(self.routines.iter().cloned().map(SchemaObject::Routine));
        objects
    }
}

/// Deserializers that accept the shapes different engines return for the
/// same logical value (SQLite has no boolean type, PostgreSQL arrays may come
/// back as text, bigint aggregates as strings).
mod lenient {
    use super::*;
    use serde::de::Error;
    use serde_json::Value;

    fn to_bool(value: &Value) -> Option<bool> {
        match value {
            Value::Bool(b) => Some(*b),
            Value::Number(n) => n.as_i64().map(|n| n != 0),
            Value::String(s) => match s.to_lowercase().as_str() {
                "t" | "true" | "yes" | "y" | "1" => Some(true),
                "f" | "false" | "no" | "n" | "0" => Some(false),
                _ => None,
            },
            Value::Null => Some(false),
            _ => None,
        }
    }

    fn to_i64(value: &Value) -> Option<i64> {
        match value {
            Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
            Value::String(s) => s.trim().parse::<i64>().ok(),
            _ => None,
        }
    }

    pub fn bool<'de, D: Deserializer<'de>>(d: D) -> Result<bool, D::Error> {
        let value = Value::deserialize(d)?;
        to_bool(&value).ok_or_else(|| D::Error::custom(format!("expected boolean, got {value}")))
    }

    pub fn i64<'de, D: Deserializer<'de>>(d: D) -> Result<i64, D::Error> {
        let value = Value::deserialize(d)?;
        to_i64(&value).ok_or_else(|| D::Error::custom(format!("expected integer, got {value}")))
    }

    pub fn opt_i64<'de, D: Deserializer<'de>>(d: D) -> Result<Option<i64>, D::Error> {
        let value = Value::deserialize(d)?;
        if value.is_null() {
            return Ok(None);
        }
        to_i64(&value)
            .map(Some)
            .ok_or_else(|| D::Error::custom(format!("expected integer, got {value}")))
    }

    fn list_items(items: Vec<Value>) -> Vec<String> {
        items
            .into_iter()
            .filter_map(|item| match item {
                Value::Null => None,
                Value::String(s) => Some(s),
                other => Some(other.to_string()),
            })
            .collect()
    }

    /// Accepts a JSON array, JSON array text, a PostgreSQL array literal
    /// (`{a,b}`) or a comma-separated string. Null items are dropped.
    pub fn string_list<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<String>, D::Error> {
        let value = Value::deserialize(d)?;
        match value {
            Value::Null => Ok(Vec::new()),
            Value::Array(items) => Ok(list_items(items)),
            Value::String(s) if s.trim_start().starts_with('[') => {
                match serde_json::from_str::<Vec<Value>>(&s) {
                    Ok(items) => Ok(list_items(items)),
                    Err(e) => Err(D::Error::custom(format!("invalid JSON list: {e}"))),
                }
            }
            Value::String(s) => {
                let inner = s.strip_prefix('{').and_then(|s| s.strip_suffix('}')).unwrap_or(&s);
                Ok(inner
                    .split(',')
                    .map(|part| part.trim().trim_matches('"').to_string())
                    .filter(|part| !part.is_empty())
                    .collect())
            }
            other => Err(D::Error::custom(format!("expected list, got {other}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_column_detail_accepts_sqlite_integers_as_bools() {
        let row = json!({
            "name": "id",
            "data_type": "INTEGER",
            "is_nullable": 0,
            "is_primary_key": 1,
            "default_value": null,
            "ordinal_position": 1
        });
        let column: ColumnDetail = serde_json::from_value(row).unwrap();
        assert!(!column.is_nullable);
        assert!(column.is_primary_key);
        assert_eq!(column.max_length, None);
        assert!(!column.is_identity);
    }

    #[test]
    fn test_index_columns_accept_array_literal() {
        let row = json!({
            "schema": "public",
            "table": "users",
            "name": "users_email_idx",
            "columns": "{email,\"Display Name\"}",
            "is_unique": "t",
            "is_primary": false
        });
        let index: IndexInfo = serde_json::from_value(row).unwrap();
        assert_eq!(index.columns, vec!["email", "Display Name"]);
        assert!(index.is_unique);
    }

    #[test]
    fn test_foreign_key_columns_accept_json_text() {
        let row = json!({
            "schema": "main",
            "table": "orders",
            "name": "fk_orders_0",
            "columns": "[\"customer_id\"]",
            "referenced_schema": "main",
            "referenced_table": "customers",
            "referenced_columns": "[null]"
        });
        let fk: ForeignKeyInfo = serde_json::from_value(row).unwrap();
        assert_eq!(fk.columns, vec!["customer_id"]);
        assert!(fk.referenced_columns.is_empty());
    }

    #[test]
    fn test_size_accepts_numeric_string() {
        let row = json!({"name": "app", "size_bytes": "8192", "is_current": true});
        let db: DatabaseInfo = serde_json::from_value(row).unwrap();
        assert_eq!(db.size_bytes, Some(8192));
        assert_eq!(db.owner, None);
    }

    #[test]
    fn test_not_found_definition_renders_marker() {
        let def = ObjectDefinition::not_found(SchemaObjectKind::Table, "\"public\".\"ghost\"");
        assert!(!def.is_found());
        assert_eq!(def.render(), "-- Table \"public\".\"ghost\" not found");
        assert_eq!(def.as_sql(), None);
    }

    #[test]
    fn test_schema_object_accessors() {
        let object = SchemaObject::Extension(ExtensionInfo {
            name: "pgcrypto".to_string(),
            version: Some("1.3".to_string()),
            schema: None,
            description: None,
        });
        assert_eq!(object.kind(), SchemaObjectKind::Extension);
        assert_eq!(object.name(), "pgcrypto");
        assert_eq!(object.schema(), None);
    }
}
