//! PostgreSQL catalog queries.
//!
//! Column aliases match the descriptor field names so rows decode directly.

use serde_json::json;

use super::PostgresDriver;
use crate::drivers::{fetch_rows, fetch_text};
use crate::error::TuskResult;
use crate::models::{ColumnDetail, ForeignKeyInfo, IndexInfo, ObjectDefinition, SchemaObjectKind};
use crate::sql::{quote_literal, SqlDialect};

pub(super) const DATABASES: &str = r#"
SELECT d.datname AS name,
       pg_catalog.pg_get_userbyid(d.datdba) AS owner,
       pg_catalog.pg_encoding_to_char(d.encoding) AS encoding,
       CASE WHEN pg_catalog.has_database_privilege(d.datname, 'CONNECT')
            THEN pg_catalog.pg_database_size(d.datname) END AS size_bytes,
       d.datname = pg_catalog.current_database() AS is_current
FROM pg_catalog.pg_database d
WHERE NOT d.datistemplate
ORDER BY d.datname
"#;

pub(super) const SCHEMAS: &str = r#"
SELECT n.nspname AS name,
       pg_catalog.pg_get_userbyid(n.nspowner) AS owner
FROM pg_catalog.pg_namespace n
WHERE n.nspname NOT LIKE 'pg\_%'
  AND n.nspname <> 'information_schema'
ORDER BY n.nspname
"#;

pub(super) const TABLES: &str = r#"
SELECT n.nspname AS schema,
       c.relname AS name,
       pg_catalog.pg_get_userbyid(c.relowner) AS owner,
       CASE WHEN c.reltuples < 0 THEN NULL ELSE c.reltuples::bigint END AS estimated_rows,
       pg_catalog.pg_table_size(c.oid) AS size_bytes,
       pg_catalog.obj_description(c.oid, 'pg_class') AS comment
FROM pg_catalog.pg_class c
JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
WHERE c.relkind IN ('r', 'p')
  AND n.nspname = $1
ORDER BY c.relname
"#;

pub(super) const COLUMNS: &str = r#"
SELECT a.attname AS name,
       pg_catalog.format_type(a.atttypid, a.atttypmod) AS data_type,
       NOT a.attnotnull AS is_nullable,
       EXISTS (
           SELECT 1 FROM pg_catalog.pg_index i
           WHERE i.indrelid = c.oid AND i.indisprimary AND a.attnum = ANY(i.indkey)
       ) AS is_primary_key,
       pg_catalog.pg_get_expr(d.adbin, d.adrelid) AS default_value,
       a.attnum::bigint AS ordinal_position,
       CASE WHEN a.atttypid IN (1042, 1043) AND a.atttypmod > 0
            THEN (a.atttypmod - 4)::bigint END AS max_length,
       (a.attidentity <> '' OR COALESCE(pg_catalog.pg_get_expr(d.adbin, d.adrelid), '') LIKE 'nextval(%') AS is_identity,
       pg_catalog.col_description(c.oid, a.attnum) AS comment
FROM pg_catalog.pg_attribute a
JOIN pg_catalog.pg_class c ON c.oid = a.attrelid
JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
LEFT JOIN pg_catalog.pg_attrdef d ON d.adrelid = a.attrelid AND d.adnum = a.attnum
WHERE n.nspname = $1
  AND c.relname = $2
  AND a.attnum > 0
  AND NOT a.attisdropped
ORDER BY a.attnum
"#;

pub(super) const INDEXES: &str = r#"
SELECT n.nspname AS schema,
       t.relname AS "table",
       i.relname AS name,
       ARRAY(
           SELECT pg_catalog.pg_get_indexdef(ix.indexrelid, k, true)
           FROM generate_series(1, ix.indnatts::int) AS k
           ORDER BY k
       ) AS columns,
       ix.indisunique AS is_unique,
       ix.indisprimary AS is_primary,
       am.amname::text AS method,
       pg_catalog.pg_get_indexdef(ix.indexrelid) AS definition
FROM pg_catalog.pg_index ix
JOIN pg_catalog.pg_class i ON i.oid = ix.indexrelid
JOIN pg_catalog.pg_class t ON t.oid = ix.indrelid
JOIN pg_catalog.pg_namespace n ON n.oid = t.relnamespace
JOIN pg_catalog.pg_am am ON am.oid = i.relam
WHERE n.nspname = $1
  AND t.relname = $2
ORDER BY i.relname
"#;

pub(super) const FOREIGN_KEYS: &str = r#"
SELECT n.nspname AS schema,
       c.relname AS "table",
       con.conname AS name,
       ARRAY(
           SELECT a.attname::text
           FROM unnest(con.conkey) WITH ORDINALITY AS k(attnum, ord)
           JOIN pg_catalog.pg_attribute a ON a.attrelid = con.conrelid AND a.attnum = k.attnum
           ORDER BY k.ord
       ) AS columns,
       fn.nspname AS referenced_schema,
       fc.relname AS referenced_table,
       ARRAY(
           SELECT a.attname::text
           FROM unnest(con.confkey) WITH ORDINALITY AS k(attnum, ord)
           JOIN pg_catalog.pg_attribute a ON a.attrelid = con.confrelid AND a.attnum = k.attnum
           ORDER BY k.ord
       ) AS referenced_columns,
       CASE con.confupdtype
            WHEN 'a' THEN 'NO ACTION' WHEN 'r' THEN 'RESTRICT' WHEN 'c' THEN 'CASCADE'
            WHEN 'n' THEN 'SET NULL' WHEN 'd' THEN 'SET DEFAULT' END AS on_update,
       CASE con.confdeltype
            WHEN 'a' THEN 'NO ACTION' WHEN 'r' THEN 'RESTRICT' WHEN 'c' THEN 'CASCADE'
            WHEN 'n' THEN 'SET NULL' WHEN 'd' THEN 'SET DEFAULT' END AS on_delete
FROM pg_catalog.pg_constraint con
JOIN pg_catalog.pg_class c ON c.oid = con.conrelid
JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
JOIN pg_catalog.pg_class fc ON fc.oid = con.confrelid
JOIN pg_catalog.pg_namespace fn ON fn.oid = fc.relnamespace
WHERE con.contype = 'f'
  AND n.nspname = $1
  AND c.relname = $2
ORDER BY con.conname
"#;

pub(super) const SEQUENCES: &str = r#"
SELECT s.schemaname AS schema,
       s.sequencename AS name,
       s.data_type::text AS data_type,
       s.start_value,
       s.min_value,
       s.max_value,
       s.increment_by AS increment,
       s.cycle,
       s.last_value
FROM pg_catalog.pg_sequences s
WHERE s.schemaname = $1
ORDER BY s.sequencename
"#;

pub(super) const VIEWS: &str = r#"
SELECT n.nspname AS schema,
       c.relname AS name,
       pg_catalog.pg_get_userbyid(c.relowner) AS owner,
       pg_catalog.pg_get_viewdef(c.oid, true) AS definition,
       pg_catalog.obj_description(c.oid, 'pg_class') AS comment
FROM pg_catalog.pg_class c
JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
WHERE c.relkind = 'v'
  AND n.nspname = $1
ORDER BY c.relname
"#;

pub(super) const MATERIALIZED_VIEWS: &str = r#"
SELECT m.schemaname AS schema,
       m.matviewname AS name,
       m.matviewowner AS owner,
       m.ispopulated AS is_populated,
       m.definition
FROM pg_catalog.pg_matviews m
WHERE m.schemaname = $1
ORDER BY m.matviewname
"#;

pub(super) const EXTENSIONS: &str = r#"
SELECT e.extname AS name,
       e.extversion AS version,
       n.nspname AS schema,
       x.comment AS description
FROM pg_catalog.pg_extension e
JOIN pg_catalog.pg_namespace n ON n.oid = e.extnamespace
LEFT JOIN pg_catalog.pg_available_extensions x ON x.name = e.extname
ORDER BY e.extname
"#;

pub(super) const ENUMS: &str = r#"
SELECT n.nspname AS schema,
       t.typname AS name,
       ARRAY(
           SELECT e.enumlabel::text
           FROM pg_catalog.pg_enum e
           WHERE e.enumtypid = t.oid
           ORDER BY e.enumsortorder
       ) AS "values"
FROM pg_catalog.pg_type t
JOIN pg_catalog.pg_namespace n ON n.oid = t.typnamespace
WHERE t.typtype = 'e'
  AND n.nspname = $1
ORDER BY t.typname
"#;

pub(super) const TRIGGERS: &str = r#"
SELECT n.nspname AS schema,
       c.relname AS "table",
       t.tgname AS name,
       CASE WHEN t.tgtype & 2 <> 0 THEN 'BEFORE'
            WHEN t.tgtype & 64 <> 0 THEN 'INSTEAD OF'
            ELSE 'AFTER' END AS timing,
       array_remove(ARRAY[
           CASE WHEN t.tgtype & 4 <> 0 THEN 'INSERT' END,
           CASE WHEN t.tgtype & 16 <> 0 THEN 'UPDATE' END,
           CASE WHEN t.tgtype & 8 <> 0 THEN 'DELETE' END,
           CASE WHEN t.tgtype & 32 <> 0 THEN 'TRUNCATE' END
       ]::text[], NULL) AS events,
       p.proname::text AS function,
       t.tgenabled <> 'D' AS enabled
FROM pg_catalog.pg_trigger t
JOIN pg_catalog.pg_class c ON c.oid = t.tgrelid
JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
JOIN pg_catalog.pg_proc p ON p.oid = t.tgfoid
WHERE NOT t.tgisinternal
  AND n.nspname = $1
  AND ($2::text IS NULL OR c.relname::text = $2::text)
ORDER BY c.relname, t.tgname
"#;

pub(super) const ROUTINES: &str = r#"
SELECT n.nspname AS schema,
       p.proname AS name,
       CASE p.prokind WHEN 'p' THEN 'PROCEDURE' WHEN 'a' THEN 'AGGREGATE'
                      WHEN 'w' THEN 'WINDOW' ELSE 'FUNCTION' END AS kind,
       pg_catalog.pg_get_function_identity_arguments(p.oid) AS arguments,
       CASE WHEN p.prokind = 'p' THEN NULL
            ELSE pg_catalog.pg_get_function_result(p.oid) END AS return_type,
       l.lanname AS language,
       CASE p.provolatile WHEN 'i' THEN 'IMMUTABLE' WHEN 's' THEN 'STABLE'
                          ELSE 'VOLATILE' END AS volatility
FROM pg_catalog.pg_proc p
JOIN pg_catalog.pg_namespace n ON n.oid = p.pronamespace
JOIN pg_catalog.pg_language l ON l.oid = p.prolang
WHERE n.nspname = $1
  AND NOT EXISTS (
      SELECT 1 FROM pg_catalog.pg_depend d
      WHERE d.classid = 'pg_catalog.pg_proc'::regclass AND d.objid = p.oid AND d.deptype = 'e'
  )
ORDER BY p.proname, arguments
"#;

pub(super) const USERS: &str = r#"
SELECT r.rolname AS name,
       r.rolsuper AS is_superuser,
       r.rolcanlogin AS can_login,
       r.rolcreatedb AS can_create_db,
       r.rolcreaterole AS can_create_role,
       NULLIF(r.rolconnlimit, -1)::bigint AS connection_limit,
       r.rolvaliduntil::text AS valid_until
FROM pg_catalog.pg_roles r
WHERE r.rolname !~ '^pg_'
ORDER BY r.rolname
"#;

const TABLE_META: &str = r#"
SELECT pg_catalog.obj_description(c.oid, 'pg_class') AS comment
FROM pg_catalog.pg_class c
JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
WHERE c.relkind IN ('r', 'p')
  AND n.nspname = $1
  AND c.relname = $2
"#;

const VIEW_DEFINITION: &str = r#"
SELECT pg_catalog.pg_get_viewdef(c.oid, true) AS definition
FROM pg_catalog.pg_class c
JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
WHERE c.relkind = $3
  AND n.nspname = $1
  AND c.relname = $2
"#;

const ROUTINE_DEFINITION: &str = r#"
SELECT pg_catalog.pg_get_functiondef(p.oid) AS definition
FROM pg_catalog.pg_proc p
JOIN pg_catalog.pg_namespace n ON n.oid = p.pronamespace
WHERE p.prokind IN ('f', 'p')
  AND n.nspname = $1
  AND p.proname = $2
ORDER BY p.oid
"#;

const TRIGGER_DEFINITION: &str = r#"
SELECT pg_catalog.pg_get_triggerdef(t.oid, true) AS definition
FROM pg_catalog.pg_trigger t
JOIN pg_catalog.pg_class c ON c.oid = t.tgrelid
JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
WHERE n.nspname = $1
  AND c.relname = $2
  AND t.tgname = $3
"#;

impl PostgresDriver {
    pub(super) async fn table_definition(
        &self,
        table: &str,
        schema: &str,
    ) -> TuskResult<ObjectDefinition> {
        let dialect = self.core.dialect();
        let qualified = dialect.qualified(Some(schema), table);

        let meta = fetch_text(self, TABLE_META, &[json!(schema), json!(table)]).await?;
        let Some(comment) = meta.into_iter().next() else {
            return Ok(ObjectDefinition::not_found(SchemaObjectKind::Table, qualified));
        };

        let params = [json!(schema), json!(table)];
        let columns: Vec<ColumnDetail> = fetch_rows(self, COLUMNS, &params).await?;
        let indexes: Vec<IndexInfo> = fetch_rows(self, INDEXES, &params).await?;
        let foreign_keys: Vec<ForeignKeyInfo> = fetch_rows(self, FOREIGN_KEYS, &params).await?;

        Ok(ObjectDefinition::Found(compose_table_ddl(
            dialect,
            &qualified,
            &columns,
            &indexes,
            &foreign_keys,
            comment.as_deref(),
        )))
    }

    pub(super) async fn view_definition(
        &self,
        view: &str,
        schema: &str,
        materialized: bool,
    ) -> TuskResult<ObjectDefinition> {
        let qualified = self.core.dialect().qualified(Some(schema), view);
        let relkind = if materialized { "m" } else { "v" };
        let rows = fetch_text(self, VIEW_DEFINITION, &[json!(schema), json!(view), json!(relkind)]).await?;

        let kind = if materialized { SchemaObjectKind::MaterializedView } else { SchemaObjectKind::View };
        Ok(match rows.into_iter().next().flatten() {
            Some(body) if materialized => ObjectDefinition::Found(format!(
                "CREATE MATERIALIZED VIEW {qualified} AS\n{};",
                body.trim().trim_end_matches(';')
            )),
            Some(body) => ObjectDefinition::Found(format!(
                "CREATE OR REPLACE VIEW {qualified} AS\n{};",
                body.trim().trim_end_matches(';')
            )),
            None => ObjectDefinition::not_found(kind, qualified),
        })
    }

    pub(super) async fn routine_definition(
        &self,
        routine: &str,
        schema: &str,
    ) -> TuskResult<ObjectDefinition> {
        let rows = fetch_text(self, ROUTINE_DEFINITION, &[json!(schema), json!(routine)]).await?;
        let bodies: Vec<String> = rows.into_iter().flatten().map(|b| b.trim_end().to_string()).collect();
        if bodies.is_empty() {
            let qualified = self.core.dialect().qualified(Some(schema), routine);
            return Ok(ObjectDefinition::not_found(SchemaObjectKind::Routine, qualified));
        }
        Ok(ObjectDefinition::Found(bodies.join("\n\n")))
    }

    pub(super) async fn trigger_definition(
        &self,
        trigger: &str,
        table: &str,
        schema: &str,
    ) -> TuskResult<ObjectDefinition> {
        let params = [json!(schema), json!(table), json!(trigger)];
        let rows = fetch_text(self, TRIGGER_DEFINITION, &params).await?;
        Ok(match rows.into_iter().next().flatten() {
            Some(definition) => ObjectDefinition::Found(format!("{definition};")),
            None => ObjectDefinition::not_found(
                SchemaObjectKind::Trigger,
                self.core.dialect().quote_ident(trigger),
            ),
        })
    }
}

/// CREATE TABLE text assembled from catalog descriptors.
///
/// The primary key becomes a named constraint. Other indexes, unique ones
/// included, follow as their stored CREATE INDEX statements.
pub(crate) fn compose_table_ddl(
    dialect: SqlDialect,
    table: &str,
    columns: &[ColumnDetail],
    indexes: &[IndexInfo],
    foreign_keys: &[ForeignKeyInfo],
    comment: Option<&str>,
) -> String {
    let mut lines: Vec<String> = columns
        .iter()
        .map(|column| {
            let mut line = format!("{} {}", dialect.quote_ident(&column.name), column.data_type);
            if !column.is_nullable {
                line.push_str(" NOT NULL");
            }
            if let Some(default) = &column.default_value {
                line.push_str(&format!(" DEFAULT {default}"));
            }
            line
        })
        .collect();

    for index in indexes.iter().filter(|i| i.is_primary) {
        lines.push(format!(
            "CONSTRAINT {} PRIMARY KEY ({})",
            dialect.quote_ident(&index.name),
            dialect.quote_list(&index.columns)
        ));
    }

    for fk in foreign_keys {
        let mut line = format!(
            "CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({})",
            dialect.quote_ident(&fk.name),
            dialect.quote_list(&fk.columns),
            dialect.qualified(Some(&fk.referenced_schema), &fk.referenced_table),
            dialect.quote_list(&fk.referenced_columns)
        );
        for (clause, action) in [("ON UPDATE", &fk.on_update), ("ON DELETE", &fk.on_delete)] {
            if let Some(action) = action.as_deref().filter(|a| *a != "NO ACTION") {
                line.push_str(&format!(" {clause} {action}"));
            }
        }
        lines.push(line);
    }

    let mut ddl = format!("CREATE TABLE {table} (\n    {}\n);", lines.join(",\n    "));

    for index in indexes.iter().filter(|i| !i.is_primary) {
        if let Some(definition) = &index.definition {
            ddl.push_str(&format!("\n\n{definition};"));
        }
    }

    if let Some(comment) = comment {
        ddl.push_str(&format!("\n\nCOMMENT ON TABLE {table} IS {};", quote_literal(comment)));
    }
    for column in columns {
        if let Some(comment) = &column.comment {
            ddl.push_str(&format!(
                "\nCOMMENT ON COLUMN {table}.{} IS {};",
                dialect.quote_ident(&column.name),
                quote_literal(comment)
            ));
        }
    }

    ddl
}
