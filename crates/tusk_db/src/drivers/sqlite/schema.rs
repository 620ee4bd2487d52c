//! SQLite catalog reads.
//!
//! Attached databases play the role of schemas. Their objects come from
//! `<schema>.sqlite_master` and the `pragma_*` table functions, which take
//! the schema as their last argument.

use serde::Deserialize;
use serde_json::{json, Value as JsonValue};

use super::SqliteDriver;
use crate::drivers::{fetch_rows, fetch_text};
use crate::error::TuskResult;
use crate::models::{
    ColumnDetail, DatabaseInfo, ForeignKeyInfo, IndexInfo, ObjectDefinition, SchemaInfo,
    SchemaObjectKind, TableInfo, TriggerInfo, ViewInfo,
};
use crate::sql::SqlDialect;

const DATABASES: &str = "SELECT name, file FROM pragma_database_list ORDER BY seq";

const COLUMNS: &str = r#"
SELECT name,
       type AS data_type,
       "notnull" = 0 AS is_nullable,
       pk > 0 AS is_primary_key,
       dflt_value AS default_value,
       cid + 1 AS ordinal_position
FROM pragma_table_info(?1, ?2)
ORDER BY cid
"#;

const INDEX_COLUMNS: &str = r#"
SELECT il.name AS name,
       il."unique" AS is_unique,
       il.origin AS origin,
       ii.name AS column_name
FROM pragma_index_list(?1, ?2) AS il,
     pragma_index_info(il.name, ?2) AS ii
ORDER BY il.name, ii.seqno
"#;

const FOREIGN_KEYS: &str = r#"
SELECT id,
       "table" AS referenced_table,
       "from" AS column_name,
       "to" AS referenced_column,
       on_update,
       on_delete
FROM pragma_foreign_key_list(?1, ?2)
ORDER BY id, seq
"#;

fn master(schema: &str) -> String {
    format!("{}.sqlite_master", SqlDialect::Sqlite.quote_ident(schema))
}

fn tables_sql(schema: &str) -> String {
    format!(
        r#"SELECT ?1 AS "schema", name, NULL AS owner, NULL AS estimated_rows,
       NULL AS size_bytes, NULL AS comment
FROM {}
WHERE type = 'table' AND name NOT LIKE 'sqlite\_%' ESCAPE '\'
ORDER BY name"#,
        master(schema)
    )
}

fn views_sql(schema: &str) -> String {
    format!(
        r#"SELECT ?1 AS "schema", name, NULL AS owner, sql AS definition, NULL AS comment
FROM {}
WHERE type = 'view'
ORDER BY name"#,
        master(schema)
    )
}

fn triggers_sql(schema: &str) -> String {
    format!(
        "SELECT name, tbl_name, sql FROM {} \
         WHERE type = 'trigger' AND (?1 IS NULL OR tbl_name = ?1) \
         ORDER BY tbl_name, name",
        master(schema)
    )
}

fn object_sql(schema: &str, kind: &str) -> String {
    format!("SELECT sql FROM {} WHERE type = '{kind}' AND name = ?1", master(schema))
}

#[derive(Deserialize)]
struct AttachedDatabase {
    name: String,
    file: Option<String>,
}

#[derive(Deserialize)]
struct IndexColumnRow {
    name: String,
    is_unique: i64,
    origin: String,
    column_name: Option<String>,
}

#[derive(Deserialize)]
struct IndexSqlRow {
    name: String,
    sql: Option<String>,
}

#[derive(Deserialize)]
struct ForeignKeyRow {
    id: i64,
    referenced_table: String,
    column_name: String,
    referenced_column: Option<String>,
    on_update: Option<String>,
    on_delete: Option<String>,
}

#[derive(Deserialize)]
struct TriggerRow {
    name: String,
    tbl_name: String,
    sql: Option<String>,
}

/// Length bound of `VARCHAR(n)`-style declarations.
fn declared_length(data_type: &str) -> Option<i64> {
    let upper = data_type.to_uppercase();
    if !(upper.contains("CHAR") || upper.contains("TEXT") || upper.contains("CLOB")) {
        return None;
    }
    let open = upper.find('(')?;
    let close = upper[open..].find(')')? + open;
    upper[open + 1..close].split(',').next()?.trim().parse().ok()
}

/// Timing and events from a stored CREATE TRIGGER statement.
///
/// SQLite keeps no structured trigger metadata; the header words before
/// `ON` carry it. Timing defaults to BEFORE, as in SQLite.
fn parse_trigger_header(sql: &str) -> (String, Vec<String>) {
    let mut timing = "BEFORE";
    let mut events = Vec::new();
    let mut words = sql.split_whitespace().map(str::to_uppercase).skip(2);
    while let Some(word) = words.next() {
        match word.as_str() {
            "BEFORE" => timing = "BEFORE",
            "AFTER" => timing = "AFTER",
            "INSTEAD" => timing = "INSTEAD OF",
            "INSERT" | "UPDATE" | "DELETE" => events.push(word),
            "ON" => break,
            _ => {}
        }
    }
    (timing.to_string(), events)
}

impl SqliteDriver {
    pub(super) async fn databases(&self) -> TuskResult<Vec<DatabaseInfo>> {
        let attached: Vec<AttachedDatabase> = fetch_rows(self, DATABASES, &[]).await?;
        Ok(attached
            .into_iter()
            .map(|db| {
                let size_bytes = db
                    .file
                    .as_deref()
                    .filter(|f| !f.is_empty())
                    .and_then(|f| std::fs::metadata(f).ok())
                    .map(|m| m.len() as i64);
                DatabaseInfo {
                    is_current: db.name == "main",
                    name: db.name,
                    owner: None,
                    encoding: None,
                    size_bytes,
                }
            })
            .collect())
    }

    pub(super) async fn schemas(&self) -> TuskResult<Vec<SchemaInfo>> {
        let attached: Vec<AttachedDatabase> = fetch_rows(self, DATABASES, &[]).await?;
        Ok(attached.into_iter().map(|db| SchemaInfo { name: db.name, owner: None }).collect())
    }

    pub(super) async fn tables(&self, schema: &str) -> TuskResult<Vec<TableInfo>> {
        fetch_rows(self, &tables_sql(schema), &[json!(schema)]).await
    }

    pub(super) async fn views(&self, schema: &str) -> TuskResult<Vec<ViewInfo>> {
        fetch_rows(self, &views_sql(schema), &[json!(schema)]).await
    }

    pub(super) async fn columns(&self, table: &str, schema: &str) -> TuskResult<Vec<ColumnDetail>> {
        let mut columns: Vec<ColumnDetail> =
            fetch_rows(self, COLUMNS, &[json!(table), json!(schema)]).await?;

        // A lone INTEGER PRIMARY KEY aliases the rowid and fills itself in.
        let primary_keys: Vec<usize> =
            columns.iter().enumerate().filter(|(_, c)| c.is_primary_key).map(|(i, _)| i).collect();
        if let [only] = primary_keys.as_slice() {
            let column = &mut columns[*only];
            column.is_identity = column.data_type.eq_ignore_ascii_case("INTEGER");
        }
        for column in &mut columns {
            column.max_length = declared_length(&column.data_type);
        }
        Ok(columns)
    }

    pub(super) async fn indexes(&self, table: &str, schema: &str) -> TuskResult<Vec<IndexInfo>> {
        let rows: Vec<IndexColumnRow> =
            fetch_rows(self, INDEX_COLUMNS, &[json!(table), json!(schema)]).await?;
        let definitions: Vec<IndexSqlRow> = fetch_rows(
            self,
            &format!("SELECT name, sql FROM {} WHERE type = 'index' AND tbl_name = ?1", master(schema)),
            &[json!(table)],
        )
        .await?;

        let mut indexes: Vec<IndexInfo> = Vec::new();
        for row in rows {
            let column = row.column_name.unwrap_or_else(|| "<expression>".to_string());
            match indexes.last_mut() {
                Some(index) if index.name == row.name => index.columns.push(column),
                _ => indexes.push(IndexInfo {
                    schema: schema.to_string(),
                    table: table.to_string(),
                    definition: definitions
                        .iter()
                        .find(|d| d.name == row.name)
                        .and_then(|d| d.sql.clone()),
                    name: row.name,
                    columns: vec![column],
                    is_unique: row.is_unique != 0,
                    is_primary: row.origin == "pk",
                    method: None,
                }),
            }
        }
        Ok(indexes)
    }

    pub(super) async fn foreign_keys(
        &self,
        table: &str,
        schema: &str,
    ) -> TuskResult<Vec<ForeignKeyInfo>> {
        let rows: Vec<ForeignKeyRow> =
            fetch_rows(self, FOREIGN_KEYS, &[json!(table), json!(schema)]).await?;

        let mut keys: Vec<(i64, ForeignKeyInfo)> = Vec::new();
        for row in rows {
            // A missing target column means the parent's primary key.
            let referenced = row.referenced_column.unwrap_or_default();
            match keys.last_mut() {
                Some((id, key)) if *id == row.id => {
                    key.columns.push(row.column_name);
                    key.referenced_columns.push(referenced);
                }
                _ => keys.push((
                    row.id,
                    ForeignKeyInfo {
                        schema: schema.to_string(),
                        table: table.to_string(),
                        name: format!("fk_{table}_{}", row.id),
                        columns: vec![row.column_name],
                        referenced_schema: schema.to_string(),
                        referenced_table: row.referenced_table,
                        referenced_columns: vec![referenced],
                        on_update: row.on_update,
                        on_delete: row.on_delete,
                    },
                )),
            }
        }
        Ok(keys.into_iter().map(|(_, key)| key).collect())
    }

    pub(super) async fn triggers(
        &self,
        table: Option<&str>,
        schema: &str,
    ) -> TuskResult<Vec<TriggerInfo>> {
        let table = table.map_or(JsonValue::Null, |t| json!(t));
        let rows: Vec<TriggerRow> = fetch_rows(self, &triggers_sql(schema), &[table]).await?;
        Ok(rows
            .into_iter()
            .map(|row| {
                let (timing, events) = parse_trigger_header(row.sql.as_deref().unwrap_or_default());
                TriggerInfo {
                    schema: schema.to_string(),
                    table: row.tbl_name,
                    name: row.name,
                    timing: Some(timing),
                    events,
                    function: None,
                    enabled: true,
                }
            })
            .collect())
    }

    /// The stored CREATE TABLE followed by the table's indexes and triggers.
    pub(super) async fn table_definition(
        &self,
        table: &str,
        schema: &str,
    ) -> TuskResult<ObjectDefinition> {
        let qualified = SqlDialect::Sqlite.qualified(Some(schema), table);
        let created = fetch_text(self, &object_sql(schema, "table"), &[json!(table)]).await?;
        let Some(Some(create)) = created.into_iter().next() else {
            return Ok(ObjectDefinition::not_found(SchemaObjectKind::Table, qualified));
        };

        let dependents = fetch_text(
            self,
            &format!(
                "SELECT sql FROM {} WHERE type IN ('index', 'trigger') AND tbl_name = ?1 \
                 AND sql IS NOT NULL ORDER BY type, name",
                master(schema)
            ),
            &[json!(table)],
        )
        .await?;

        let mut statements = vec![create];
        statements.extend(dependents.into_iter().flatten());
        Ok(ObjectDefinition::Found(
            statements.iter().map(|s| format!("{};", s.trim_end_matches(';'))).collect::<Vec<_>>().join("\n\n"),
        ))
    }

    pub(super) async fn view_definition(&self, view: &str, schema: &str) -> TuskResult<ObjectDefinition> {
        let rows = fetch_text(self, &object_sql(schema, "view"), &[json!(view)]).await?;
        Ok(match rows.into_iter().next().flatten() {
            Some(sql) => ObjectDefinition::Found(format!("{};", sql.trim_end_matches(';'))),
            None => ObjectDefinition::not_found(
                SchemaObjectKind::View,
                SqlDialect::Sqlite.qualified(Some(schema), view),
            ),
        })
    }

    pub(super) async fn trigger_definition(
        &self,
        trigger: &str,
        table: &str,
        schema: &str,
    ) -> TuskResult<ObjectDefinition> {
        let sql = format!(
            "SELECT sql FROM {} WHERE type = 'trigger' AND name = ?1 AND tbl_name = ?2",
            master(schema)
        );
        let rows = fetch_text(self, &sql, &[json!(trigger), json!(table)]).await?;
        Ok(match rows.into_iter().next().flatten() {
            Some(sql) => ObjectDefinition::Found(format!("{};", sql.trim_end_matches(';'))),
            None => ObjectDefinition::not_found(
                SchemaObjectKind::Trigger,
                SqlDialect::Sqlite.quote_ident(trigger),
            ),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_declared_length_reads_char_bounds_only() {
        assert_eq!(declared_length("VARCHAR(255)"), Some(255));
        assert_eq!(declared_length("nchar( 10 )"), Some(10));
        assert_eq!(declared_length("DECIMAL(10,2)"), None);
        assert_eq!(declared_length("TEXT"), None);
    }

    #[test]
    fn test_parse_trigger_header() {
        assert_eq!(
            parse_trigger_header("CREATE TRIGGER audit AFTER UPDATE OF name ON t BEGIN SELECT 1; END"),
            ("AFTER".to_string(), vec!["UPDATE".to_string()])
        );
        assert_eq!(
            parse_trigger_header("create trigger if not exists \"on_insert\" insert on t begin select 1; end"),
            ("BEFORE".to_string(), vec!["INSERT".to_string()])
        );
        assert_eq!(
            parse_trigger_header("CREATE TEMP TRIGGER v_del INSTEAD OF DELETE ON v BEGIN SELECT 1; END").0,
            "INSTEAD OF"
        );
    }

    #[test]
    fn test_master_is_schema_qualified() {
        assert_eq!(master("aux"), "\"aux\".sqlite_master");
    }
}
