//! PostgreSQL statements for schema mutations.
//!
//! Identifiers are quoted; expression fields (defaults, view bodies, WHEN
//! and WHERE predicates) are taken as SQL. Literal values are either bound
//! or spliced in server-side through `format('%L')`.

use crate::drivers::ddl::{require, strip_terminator, DdlPlan, DdlStatement, FormatTemplate, PlanResult};
use crate::drivers::DriverCore;
use crate::models::{
    AddColumnRequest, AddForeignKeyRequest, AlterSequenceRequest, ColumnDefinition,
    CreateExtensionRequest, CreateIndexRequest, CreateSequenceRequest, CreateTableRequest,
    CreateTriggerRequest, CreateUserRequest, CreateViewRequest, DefaultChange, DropColumnRequest,
    DropExtensionRequest, DropForeignKeyRequest, DropIndexRequest, DropSequenceRequest,
    DropTableRequest, DropTriggerRequest, DropUserRequest, DropViewRequest, ForeignKeyDefinition,
    IndexDefinition, ModifyColumnRequest, RefreshMaterializedViewRequest, RenameColumnRequest,
    RenameTableRequest, RenameViewRequest, TriggerAction, TriggerEvent,
};
use crate::sql::SqlDialect;

const PG: SqlDialect = SqlDialect::Postgres;

fn cascade(cascade: bool) -> &'static str {
    if cascade {
        " CASCADE"
    } else {
        ""
    }
}

fn if_exists(if_exists: bool) -> &'static str {
    if if_exists {
        "IF EXISTS "
    } else {
        ""
    }
}

/// Serial pseudo-type matching an integer width.
fn serial_type(data_type: &str) -> Option<&'static str> {
    match data_type.trim().to_lowercase().as_str() {
        "smallint" | "int2" | "smallserial" | "serial2" => Some("smallserial"),
        "integer" | "int" | "int4" | "serial" | "serial4" => Some("serial"),
        "bigint" | "int8" | "bigserial" | "serial8" => Some("bigserial"),
        _ => None,
    }
}

fn column_sql(column: &ColumnDefinition, inline_primary_key: bool) -> Result<String, String> {
    require(&column.name, "Column name")?;
    require(&column.data_type, &format!("Data type of column '{}'", column.name))?;

    let data_type = if column.auto_increment {
        if column.default.is_some() {
            return Err(format!(
                "Column '{}' cannot have both a default and auto-increment",
                column.name
            ));
        }
        serial_type(&column.data_type)
            .ok_or_else(|| {
                format!(
                    "Auto-increment needs an integer column; '{}' is {}",
                    column.name, column.data_type
                )
            })?
            .to_string()
    } else {
        column.data_type.trim().to_string()
    };

    let primary_key = inline_primary_key && column.primary_key;
    let mut sql = format!("{} {}", PG.quote_ident(&column.name), data_type);
    if !column.nullable && !primary_key {
        sql.push_str(" NOT NULL");
    }
    if let Some(default) = &column.default {
        sql.push_str(" DEFAULT ");
        sql.push_str(default.trim());
    }
    if column.unique && !primary_key {
        sql.push_str(" UNIQUE");
    }
    if primary_key {
        sql.push_str(" PRIMARY KEY");
    }
    Ok(sql)
}

fn column_comment(table: &str, column: &ColumnDefinition) -> Option<DdlStatement> {
    column.comment.as_deref().map(|comment| {
        DdlStatement::Formatted(
            FormatTemplate::new()
                .sql(&format!("COMMENT ON COLUMN {table}.{} IS ", PG.quote_ident(&column.name)))
                .literal(Some(comment)),
        )
    })
}

fn foreign_key_sql(core: &DriverCore, schema: Option<&str>, fk: &ForeignKeyDefinition) -> Result<String, String> {
    require(&fk.referenced_table, "Referenced table")?;
    if fk.columns.is_empty() {
        return Err("A foreign key needs at least one column".to_string());
    }
    if fk.columns.len() != fk.referenced_columns.len() {
        return Err(format!(
            "Foreign key has {} columns but references {}",
            fk.columns.len(),
            fk.referenced_columns.len()
        ));
    }

    let referenced_schema = fk.referenced_schema.as_deref().or(schema);
    let mut sql = String::new();
    if let Some(name) = fk.name.as_deref().filter(|n| !n.trim().is_empty()) {
        sql.push_str(&format!("CONSTRAINT {} ", PG.quote_ident(name)));
    }
    sql.push_str(&format!(
        "FOREIGN KEY ({}) REFERENCES {} ({})",
        PG.quote_list(&fk.columns),
        core.qualified(referenced_schema, &fk.referenced_table),
        PG.quote_list(&fk.referenced_columns)
    ));
    if let Some(action) = fk.on_delete {
        sql.push_str(&format!(" ON DELETE {}", action.as_sql()));
    }
    if let Some(action) = fk.on_update {
        sql.push_str(&format!(" ON UPDATE {}", action.as_sql()));
    }
    Ok(sql)
}

fn index_sql(
    core: &DriverCore,
    table: &str,
    schema: Option<&str>,
    index: &IndexDefinition,
    concurrently: bool,
    if_not_exists: bool,
) -> Result<String, String> {
    require(&index.name, "Index name")?;
    if index.columns.is_empty() {
        return Err(format!("Index '{}' needs at least one column", index.name));
    }

    let mut sql = String::from("CREATE ");
    if index.unique {
        sql.push_str("UNIQUE ");
    }
    sql.push_str("INDEX ");
    if concurrently {
        sql.push_str("CONCURRENTLY ");
    }
    if if_not_exists {
        sql.push_str("IF NOT EXISTS ");
    }
    sql.push_str(&format!("{} ON {}", PG.quote_ident(&index.name), core.qualified(schema, table)));
    if let Some(method) = index.method {
        sql.push_str(&format!(" USING {}", method.as_sql()));
    }
    sql.push_str(&format!(" ({})", PG.quote_list(&index.columns)));
    if let Some(predicate) = index.where_clause.as_deref().filter(|w| !w.trim().is_empty()) {
        sql.push_str(&format!(" WHERE {}", predicate.trim()));
    }
    Ok(sql)
}

pub(super) fn add_column(core: &DriverCore, request: &AddColumnRequest) -> PlanResult {
    require(&request.table, "Table name")?;
    let table = core.qualified(request.schema.as_deref(), &request.table);
    let mut plan = DdlPlan::single(DdlStatement::plain(format!(
        "ALTER TABLE {table} ADD COLUMN {}",
        column_sql(&request.column, true)?
    )));
    if let Some(comment) = column_comment(&table, &request.column) {
        plan.followup(comment);
    }
    Ok(plan)
}

pub(super) fn modify_column(core: &DriverCore, request: &ModifyColumnRequest) -> PlanResult {
    require(&request.table, "Table name")?;
    require(&request.column, "Column name")?;
    let column = PG.quote_ident(&request.column);

    let mut actions = Vec::new();
    if let Some(data_type) = request.data_type.as_deref().filter(|t| !t.trim().is_empty()) {
        let data_type = data_type.trim();
        actions.push(format!("ALTER COLUMN {column} TYPE {data_type} USING {column}::{data_type}"));
    }
    match request.nullable {
        Some(true) => actions.push(format!("ALTER COLUMN {column} DROP NOT NULL")),
        Some(false) => actions.push(format!("ALTER COLUMN {column} SET NOT NULL")),
        None => {}
    }
    match &request.default {
        Some(DefaultChange::Set(expr)) => {
            actions.push(format!("ALTER COLUMN {column} SET DEFAULT {}", expr.trim()))
        }
        Some(DefaultChange::Drop) => actions.push(format!("ALTER COLUMN {column} DROP DEFAULT")),
        None => {}
    }
    if actions.is_empty() {
        return Err(format!("Nothing to change on column '{}'", request.column));
    }

    Ok(DdlPlan::single(DdlStatement::plain(format!(
        "ALTER TABLE {} {}",
        core.qualified(request.schema.as_deref(), &request.table),
        actions.join(", ")
    ))))
}

pub(super) fn drop_column(core: &DriverCore, request: &DropColumnRequest) -> PlanResult {
    require(&request.table, "Table name")?;
    require(&request.column, "Column name")?;
    Ok(DdlPlan::single(DdlStatement::plain(format!(
        "ALTER TABLE {} DROP COLUMN {}{}",
        core.qualified(request.schema.as_deref(), &request.table),
        PG.quote_ident(&request.column),
        cascade(request.cascade)
    ))))
}

pub(super) fn rename_column(core: &DriverCore, request: &RenameColumnRequest) -> PlanResult {
    require(&request.table, "Table name")?;
    require(&request.old_name, "Column name")?;
    require(&request.new_name, "New column name")?;
    Ok(DdlPlan::single(DdlStatement::plain(format!(
        "ALTER TABLE {} RENAME COLUMN {} TO {}",
        core.qualified(request.schema.as_deref(), &request.table),
        PG.quote_ident(&request.old_name),
        PG.quote_ident(&request.new_name)
    ))))
}

pub(super) fn create_index(core: &DriverCore, request: &CreateIndexRequest) -> PlanResult {
    require(&request.table, "Table name")?;
    Ok(DdlPlan::single(DdlStatement::plain(index_sql(
        core,
        &request.table,
        request.schema.as_deref(),
        &request.index,
        request.concurrently,
        request.if_not_exists,
    )?)))
}

pub(super) fn drop_index(core: &DriverCore, request: &DropIndexRequest) -> PlanResult {
    require(&request.name, "Index name")?;
    Ok(DdlPlan::single(DdlStatement::plain(format!(
        "DROP INDEX {}{}{}",
        if_exists(request.if_exists),
        core.qualified(request.schema.as_deref(), &request.name),
        cascade(request.cascade)
    ))))
}

pub(super) fn add_foreign_key(core: &DriverCore, request: &AddForeignKeyRequest) -> PlanResult {
    require(&request.table, "Table name")?;
    let schema = request.schema.as_deref();
    Ok(DdlPlan::single(DdlStatement::plain(format!(
        "ALTER TABLE {} ADD {}",
        core.qualified(schema, &request.table),
        foreign_key_sql(core, schema, &request.foreign_key)?
    ))))
}

pub(super) fn drop_foreign_key(core: &DriverCore, request: &DropForeignKeyRequest) -> PlanResult {
    require(&request.table, "Table name")?;
    require(&request.name, "Constraint name")?;
    Ok(DdlPlan::single(DdlStatement::plain(format!(
        "ALTER TABLE {} DROP CONSTRAINT {}",
        core.qualified(request.schema.as_deref(), &request.table),
        PG.quote_ident(&request.name)
    ))))
}

pub(super) fn create_table(core: &DriverCore, request: &CreateTableRequest) -> PlanResult {
    request.validate()?;
    let schema = request.schema.as_deref();
    let table = core.qualified(schema, &request.name);

    let mut definitions = Vec::with_capacity(request.columns.len() + request.foreign_keys.len() + 1);
    for column in &request.columns {
        definitions.push(column_sql(column, true)?);
    }
    if !request.primary_key.is_empty() {
        definitions.push(format!("PRIMARY KEY ({})", PG.quote_list(&request.primary_key)));
    }
    for fk in &request.foreign_keys {
        definitions.push(foreign_key_sql(core, schema, fk)?);
    }

    let mut plan = DdlPlan::single(DdlStatement::plain(format!(
        "CREATE TABLE {}{table} (\n    {}\n)",
        if request.if_not_exists { "IF NOT EXISTS " } else { "" },
        definitions.join(",\n    ")
    )));
    for index in &request.indexes {
        plan.push(DdlStatement::plain(index_sql(core, &request.name, schema, index, false, false)?));
    }

    if let Some(comment) = &request.comment {
        plan.followup(DdlStatement::Formatted(
            FormatTemplate::new()
                .sql(&format!("COMMENT ON TABLE {table} IS "))
                .literal(Some(comment)),
        ));
    }
    for column in &request.columns {
        if let Some(comment) = column_comment(&table, column) {
            plan.followup(comment);
        }
    }
    Ok(plan)
}

pub(super) fn drop_table(core: &DriverCore, request: &DropTableRequest) -> PlanResult {
    require(&request.name, "Table name")?;
    Ok(DdlPlan::single(DdlStatement::plain(format!(
        "DROP TABLE {}{}{}",
        if_exists(request.if_exists),
        core.qualified(request.schema.as_deref(), &request.name),
        cascade(request.cascade)
    ))))
}

pub(super) fn rename_table(core: &DriverCore, request: &RenameTableRequest) -> PlanResult {
    require(&request.old_name, "Table name")?;
    require(&request.new_name, "New table name")?;
    Ok(DdlPlan::single(DdlStatement::plain(format!(
        "ALTER TABLE {} RENAME TO {}",
        core.qualified(request.schema.as_deref(), &request.old_name),
        PG.quote_ident(&request.new_name)
    ))))
}

pub(super) fn create_view(core: &DriverCore, request: &CreateViewRequest) -> PlanResult {
    require(&request.name, "View name")?;
    let query = strip_terminator(&request.query);
    require(query, "View query")?;
    let view = core.qualified(request.schema.as_deref(), &request.name);

    let sql = if request.materialized {
        if request.or_replace {
            return Err("Materialized views cannot be replaced; drop and recreate instead".to_string());
        }
        format!("CREATE MATERIALIZED VIEW {view} AS\n{query}")
    } else {
        format!(
            "CREATE {}VIEW {view} AS\n{query}",
            if request.or_replace { "OR REPLACE " } else { "" }
        )
    };
    Ok(DdlPlan::single(DdlStatement::plain(sql)))
}

pub(super) fn drop_view(core: &DriverCore, request: &DropViewRequest) -> PlanResult {
    require(&request.name, "View name")?;
    Ok(DdlPlan::single(DdlStatement::plain(format!(
        "DROP {}VIEW {}{}{}",
        if request.materialized { "MATERIALIZED " } else { "" },
        if_exists(request.if_exists),
        core.qualified(request.schema.as_deref(), &request.name),
        cascade(request.cascade)
    ))))
}

pub(super) fn rename_view(core: &DriverCore, request: &RenameViewRequest) -> PlanResult {
    require(&request.old_name, "View name")?;
    require(&request.new_name, "New view name")?;
    Ok(DdlPlan::single(DdlStatement::plain(format!(
        "ALTER {}VIEW {} RENAME TO {}",
        if request.materialized { "MATERIALIZED " } else { "" },
        core.qualified(request.schema.as_deref(), &request.old_name),
        PG.quote_ident(&request.new_name)
    ))))
}

fn sequence_type(data_type: &str) -> Result<&'static str, String> {
    match data_type.trim().to_lowercase().as_str() {
        "smallint" | "int2" => Ok("smallint"),
        "integer" | "int" | "int4" => Ok("integer"),
        "bigint" | "int8" => Ok("bigint"),
        other => Err(format!("Sequences must be smallint, integer or bigint, not '{other}'")),
    }
}

pub(super) fn create_sequence(core: &DriverCore, request: &CreateSequenceRequest) -> PlanResult {
    require(&request.name, "Sequence name")?;
    let mut sql = format!("CREATE SEQUENCE {}", core.qualified(request.schema.as_deref(), &request.name));
    if let Some(data_type) = &request.data_type {
        sql.push_str(&format!(" AS {}", sequence_type(data_type)?));
    }
    if let Some(increment) = request.increment {
        if increment == 0 {
            return Err("Sequence increment cannot be zero".to_string());
        }
        sql.push_str(&format!(" INCREMENT BY {increment}"));
    }
    if let Some(min) = request.min_value {
        sql.push_str(&format!(" MINVALUE {min}"));
    }
    if let Some(max) = request.max_value {
        sql.push_str(&format!(" MAXVALUE {max}"));
    }
    if let Some(start) = request.start {
        sql.push_str(&format!(" START WITH {start}"));
    }
    if let Some(cache) = request.cache {
        sql.push_str(&format!(" CACHE {cache}"));
    }
    if request.cycle {
        sql.push_str(" CYCLE");
    }
    Ok(DdlPlan::single(DdlStatement::plain(sql)))
}

pub(super) fn alter_sequence(core: &DriverCore, request: &AlterSequenceRequest) -> PlanResult {
    require(&request.name, "Sequence name")?;
    let mut clauses = Vec::new();
    if let Some(increment) = request.increment {
        if increment == 0 {
            return Err("Sequence increment cannot be zero".to_string());
        }
        clauses.push(format!("INCREMENT BY {increment}"));
    }
    if let Some(min) = request.min_value {
        clauses.push(format!("MINVALUE {min}"));
    }
    if let Some(max) = request.max_value {
        clauses.push(format!("MAXVALUE {max}"));
    }
    if let Some(restart) = request.restart_with {
        clauses.push(format!("RESTART WITH {restart}"));
    }
    if let Some(cache) = request.cache {
        clauses.push(format!("CACHE {cache}"));
    }
    match request.cycle {
        Some(true) => clauses.push("CYCLE".to_string()),
        Some(false) => clauses.push("NO CYCLE".to_string()),
        None => {}
    }
    if clauses.is_empty() {
        return Err(format!("Nothing to change on sequence '{}'", request.name));
    }
    Ok(DdlPlan::single(DdlStatement::plain(format!(
        "ALTER SEQUENCE {} {}",
        core.qualified(request.schema.as_deref(), &request.name),
        clauses.join(" ")
    ))))
}

pub(super) fn drop_sequence(core: &DriverCore, request: &DropSequenceRequest) -> PlanResult {
    require(&request.name, "Sequence name")?;
    Ok(DdlPlan::single(DdlStatement::plain(format!(
        "DROP SEQUENCE {}{}{}",
        if_exists(request.if_exists),
        core.qualified(request.schema.as_deref(), &request.name),
        cascade(request.cascade)
    ))))
}

pub(super) fn refresh_materialized_view(
    core: &DriverCore,
    request: &RefreshMaterializedViewRequest,
) -> PlanResult {
    require(&request.name, "View name")?;
    if request.concurrently && !request.with_data {
        return Err("CONCURRENTLY cannot be combined with WITH NO DATA".to_string());
    }
    Ok(DdlPlan::single(DdlStatement::plain(format!(
        "REFRESH MATERIALIZED VIEW {}{}{}",
        if request.concurrently { "CONCURRENTLY " } else { "" },
        core.qualified(request.schema.as_deref(), &request.name),
        if request.with_data { "" } else { " WITH NO DATA" }
    ))))
}

pub(super) fn create_extension(request: &CreateExtensionRequest) -> PlanResult {
    require(&request.name, "Extension name")?;
    let mut template = FormatTemplate::new().sql(&format!(
        "CREATE EXTENSION {}{}",
        if request.if_not_exists { "IF NOT EXISTS " } else { "" },
        PG.quote_ident(&request.name)
    ));
    if let Some(schema) = request.schema.as_deref().filter(|s| !s.is_empty()) {
        template = template.sql(&format!(" SCHEMA {}", PG.quote_ident(schema)));
    }
    if let Some(version) = request.version.as_deref().filter(|v| !v.is_empty()) {
        template = template.sql(" VERSION ").literal(Some(version));
    }
    if request.cascade {
        template = template.sql(" CASCADE");
    }
    Ok(DdlPlan::single(DdlStatement::Formatted(template)))
}

pub(super) fn drop_extension(request: &DropExtensionRequest) -> PlanResult {
    require(&request.name, "Extension name")?;
    Ok(DdlPlan::single(DdlStatement::plain(format!(
        "DROP EXTENSION {}{}{}",
        if_exists(request.if_exists),
        PG.quote_ident(&request.name),
        cascade(request.cascade)
    ))))
}

fn trigger_event(event: &TriggerEvent) -> String {
    match event {
        TriggerEvent::Insert => "INSERT".to_string(),
        TriggerEvent::Update(columns) if columns.is_empty() => "UPDATE".to_string(),
        TriggerEvent::Update(columns) => format!("UPDATE OF {}", PG.quote_list(columns)),
        TriggerEvent::Delete => "DELETE".to_string(),
        TriggerEvent::Truncate => "TRUNCATE".to_string(),
    }
}

pub(super) fn create_trigger(core: &DriverCore, request: &CreateTriggerRequest) -> PlanResult {
    require(&request.name, "Trigger name")?;
    require(&request.table, "Table name")?;
    if request.events.is_empty() {
        return Err("A trigger needs at least one event".to_string());
    }
    let TriggerAction::ExecuteFunction { schema, name, arguments } = &request.action else {
        return Err("PostgreSQL triggers execute a function; inline bodies are not supported".to_string());
    };
    require(name, "Trigger function")?;

    let events = request.events.iter().map(trigger_event).collect::<Vec<_>>().join(" OR ");
    let mut head = format!(
        "CREATE TRIGGER {} {} {events} ON {} FOR EACH {}",
        PG.quote_ident(&request.name),
        request.timing.as_sql(),
        core.qualified(request.schema.as_deref(), &request.table),
        request.for_each.as_sql()
    );
    if let Some(condition) = request.when.as_deref().filter(|w| !w.trim().is_empty()) {
        head.push_str(&format!(" WHEN ({})", condition.trim()));
    }
    let function_schema = schema.as_deref().or(request.schema.as_deref());
    head.push_str(&format!(" EXECUTE FUNCTION {}(", core.qualified(function_schema, name)));

    let mut template = FormatTemplate::new().sql(&head);
    for (i, argument) in arguments.iter().enumerate() {
        if i > 0 {
            template = template.sql(", ");
        }
        template = template.literal(Some(argument));
    }
    Ok(DdlPlan::single(DdlStatement::Formatted(template.sql(")"))))
}

pub(super) fn drop_trigger(core: &DriverCore, request: &DropTriggerRequest) -> PlanResult {
    require(&request.name, "Trigger name")?;
    require(&request.table, "Table name")?;
    Ok(DdlPlan::single(DdlStatement::plain(format!(
        "DROP TRIGGER {}{} ON {}{}",
        if_exists(request.if_exists),
        PG.quote_ident(&request.name),
        core.qualified(request.schema.as_deref(), &request.table),
        cascade(request.cascade)
    ))))
}

pub(crate) fn create_user(request: &CreateUserRequest) -> PlanResult {
    require(&request.name, "Role name")?;
    let mut options = Vec::new();
    options.push(if request.superuser { "SUPERUSER" } else { "NOSUPERUSER" });
    options.push(if request.create_db { "CREATEDB" } else { "NOCREATEDB" });
    options.push(if request.create_role { "CREATEROLE" } else { "NOCREATEROLE" });
    options.push(if request.login { "LOGIN" } else { "NOLOGIN" });

    let mut template = FormatTemplate::new().sql(&format!(
        "CREATE ROLE {} {}",
        PG.quote_ident(&request.name),
        options.join(" ")
    ));
    if let Some(limit) = request.connection_limit {
        template = template.sql(&format!(" CONNECTION LIMIT {limit}"));
    }
    if let Some(password) = &request.password {
        template = template.sql(" PASSWORD ").secret(password);
    }
    if let Some(valid_until) = request.valid_until.as_deref().filter(|v| !v.is_empty()) {
        template = template.sql(" VALID UNTIL ").literal(Some(valid_until));
    }
    Ok(DdlPlan::single(DdlStatement::Formatted(template)))
}

pub(super) fn drop_user(request: &DropUserRequest) -> PlanResult {
    require(&request.name, "Role name")?;
    Ok(DdlPlan::single(DdlStatement::plain(format!(
        "DROP ROLE {}{}",
        if_exists(request.if_exists),
        PG.quote_ident(&request.name)
    ))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ConnectionConfig, ReferentialAction, TriggerTiming};

    fn core() -> DriverCore {
        DriverCore::new(ConnectionConfig::postgres("pg", "localhost", "app", "postgres")).unwrap()
    }

    fn sql(plan: PlanResult) -> String {
        plan.unwrap().display(PG)
    }

    #[test]
    fn test_create_table_with_serial_and_composite_key() {
        let request = CreateTableRequest {
            name: "memberships".to_string(),
            columns: vec![
                ColumnDefinition::new("id", "bigint").not_null().auto_increment(),
                ColumnDefinition::new("org_id", "integer").not_null(),
                ColumnDefinition::new("user_id", "integer").not_null(),
            ],
            primary_key: vec!["org_id".to_string(), "user_id".to_string()],
            foreign_keys: vec![ForeignKeyDefinition {
                columns: vec!["org_id".to_string()],
                referenced_table: "orgs".to_string(),
                referenced_columns: vec!["id".to_string()],
                on_delete: Some(ReferentialAction::Cascade),
                ..Default::default()
            }],
            comment: Some("who belongs where".to_string()),
            ..Default::default()
        };

        let sql = sql(create_table(&core(), &request));
        assert!(sql.starts_with("CREATE TABLE \"public\".\"memberships\" (\n"));
        assert!(sql.contains("\"id\" bigserial NOT NULL"));
        assert!(sql.contains("PRIMARY KEY (\"org_id\", \"user_id\")"));
        assert!(sql.contains(
            "FOREIGN KEY (\"org_id\") REFERENCES \"public\".\"orgs\" (\"id\") ON DELETE CASCADE"
        ));
        assert!(sql.ends_with("COMMENT ON TABLE \"public\".\"memberships\" IS 'who belongs where'"));
    }

    #[test]
    fn test_column_level_primary_key_is_inline() {
        let request = CreateTableRequest {
            name: "t".to_string(),
            columns: vec![ColumnDefinition::new("id", "integer").primary_key().auto_increment()],
            ..Default::default()
        };
        let sql = sql(create_table(&core(), &request));
        assert!(sql.contains("\"id\" serial PRIMARY KEY"));
        assert!(!sql.contains("NOT NULL"));
    }

    #[test]
    fn test_auto_increment_rejects_non_integer() {
        let request = AddColumnRequest {
            table: "t".to_string(),
            column: ColumnDefinition::new("code", "text").auto_increment(),
            ..Default::default()
        };
        let err = add_column(&core(), &request).unwrap_err();
        assert!(err.contains("integer"));
    }

    #[test]
    fn test_modify_column_combines_actions() {
        let request = ModifyColumnRequest {
            schema: Some("app".to_string()),
            table: "users".to_string(),
            column: "age".to_string(),
            data_type: Some("bigint".to_string()),
            nullable: Some(false),
            default: Some(DefaultChange::Drop),
        };
        assert_eq!(
            sql(modify_column(&core(), &request)),
            "ALTER TABLE \"app\".\"users\" ALTER COLUMN \"age\" TYPE bigint USING \"age\"::bigint, \
             ALTER COLUMN \"age\" SET NOT NULL, ALTER COLUMN \"age\" DROP DEFAULT"
        );

        let empty = ModifyColumnRequest { table: "t".into(), column: "c".into(), ..Default::default() };
        assert!(modify_column(&core(), &empty).is_err());
    }

    #[test]
    fn test_create_user_redacts_password() {
        let mut request = CreateUserRequest::new("report\"er").with_password("hunter2");
        request.connection_limit = Some(5);
        request.valid_until = Some("2030-01-01".to_string());

        let sql = sql(create_user(&request));
        assert_eq!(
            sql,
            "CREATE ROLE \"report\"\"er\" NOSUPERUSER NOCREATEDB NOCREATEROLE LOGIN \
             CONNECTION LIMIT 5 PASSWORD '****' VALID UNTIL '2030-01-01'"
        );
        assert!(!sql.contains("hunter2"));
    }

    #[test]
    fn test_create_trigger_executes_function_with_literal_args() {
        let request = CreateTriggerRequest {
            table: "orders".to_string(),
            name: "orders_audit".to_string(),
            timing: TriggerTiming::After,
            events: vec![TriggerEvent::Insert, TriggerEvent::Update(vec!["status".to_string()])],
            action: TriggerAction::ExecuteFunction {
                schema: Some("audit".to_string()),
                name: "log_change".to_string(),
                arguments: vec!["orders".to_string()],
            },
            ..Default::default()
        };
        assert_eq!(
            sql(create_trigger(&core(), &request)),
            "CREATE TRIGGER \"orders_audit\" AFTER INSERT OR UPDATE OF \"status\" ON \"public\".\"orders\" \
             FOR EACH ROW EXECUTE FUNCTION \"audit\".\"log_change\"('orders')"
        );

        let body = CreateTriggerRequest { action: TriggerAction::Body("SELECT 1;".into()), ..request };
        assert!(create_trigger(&core(), &body).is_err());
    }

    #[test]
    fn test_views_and_sequences() {
        let view = CreateViewRequest {
            name: "active".to_string(),
            query: "SELECT * FROM users WHERE active;".to_string(),
            materialized: true,
            ..Default::default()
        };
        assert_eq!(
            sql(create_view(&core(), &view)),
            "CREATE MATERIALIZED VIEW \"public\".\"active\" AS\nSELECT * FROM users WHERE active"
        );
        let replace = CreateViewRequest { or_replace: true, ..view };
        assert!(create_view(&core(), &replace).is_err());

        let seq = AlterSequenceRequest {
            name: "ids".to_string(),
            restart_with: Some(100),
            cycle: Some(false),
            ..Default::default()
        };
        assert_eq!(
            sql(alter_sequence(&core(), &seq)),
            "ALTER SEQUENCE \"public\".\"ids\" RESTART WITH 100 NO CYCLE"
        );
    }

    #[test]
    fn test_refresh_rejects_concurrent_without_data() {
        let request = RefreshMaterializedViewRequest {
            name: "mv".to_string(),
            concurrently: true,
            with_data: false,
            ..Default::default()
        };
        assert!(refresh_materialized_view(&core(), &request).is_err());
    }
}
