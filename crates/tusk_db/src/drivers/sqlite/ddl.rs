//! SQLite statements for schema mutations.
//!
//! SQLite's ALTER TABLE only renames tables, and adds, drops or renames
//! columns. Foreign keys and primary keys can only be declared at CREATE
//! TABLE time, so those requests are rejected or left to the defaults.
//! CASCADE has no SQLite form and is ignored.

use crate::drivers::ddl::{require, strip_terminator, DdlPlan, DdlStatement, PlanResult};
use crate::drivers::DriverCore;
use crate::models::{
    AddColumnRequest, ColumnDefinition, CreateIndexRequest, CreateTableRequest,
    CreateTriggerRequest, CreateViewRequest, DropColumnRequest, DropIndexRequest,
    DropTableRequest, DropTriggerRequest, DropViewRequest, ForeignKeyDefinition, IndexDefinition,
    IndexMethod, RenameColumnRequest, RenameTableRequest, TriggerAction, TriggerEvent,
    TriggerForEach,
};
use crate::sql::SqlDialect;

const LITE: SqlDialect = SqlDialect::Sqlite;

fn if_exists(if_exists: bool) -> &'static str {
    if if_exists {
        "IF EXISTS "
    } else {
        ""
    }
}

fn is_integer(data_type: &str) -> bool {
    matches!(data_type.trim().to_uppercase().as_str(), "INTEGER" | "INT")
}

fn column_sql(column: &ColumnDefinition, inline_primary_key: bool) -> Result<String, String> {
    require(&column.name, "Column name")?;
    require(&column.data_type, &format!("Data type of column '{}'", column.name))?;

    let primary_key = inline_primary_key && column.primary_key;
    if column.auto_increment && !(primary_key && is_integer(&column.data_type)) {
        return Err(format!(
            "SQLite only auto-increments an INTEGER PRIMARY KEY column; '{}' is not one",
            column.name
        ));
    }

    let mut sql = format!("{} {}", LITE.quote_ident(&column.name), column.data_type.trim());
    if primary_key {
        sql.push_str(" PRIMARY KEY");
        if column.auto_increment {
            sql.push_str(" AUTOINCREMENT");
        }
    }
    if !column.nullable {
        sql.push_str(" NOT NULL");
    }
    if let Some(default) = &column.default {
        sql.push_str(" DEFAULT ");
        sql.push_str(default.trim());
    }
    if column.unique && !primary_key {
        sql.push_str(" UNIQUE");
    }
    Ok(sql)
}

fn foreign_key_sql(fk: &ForeignKeyDefinition) -> Result<String, String> {
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

    // SQLite resolves the parent table in the child's own database.
    let mut sql = String::new();
    if let Some(name) = fk.name.as_deref().filter(|n| !n.trim().is_empty()) {
        sql.push_str(&format!("CONSTRAINT {} ", LITE.quote_ident(name)));
    }
    sql.push_str(&format!(
        "FOREIGN KEY ({}) REFERENCES {} ({})",
        LITE.quote_list(&fk.columns),
        LITE.quote_ident(&fk.referenced_table),
        LITE.quote_list(&fk.referenced_columns)
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
    if_not_exists: bool,
) -> Result<String, String> {
    require(&index.name, "Index name")?;
    if index.columns.is_empty() {
        return Err(format!("Index '{}' needs at least one column", index.name));
    }
    if let Some(method) = index.method.filter(|m| *m != IndexMethod::Btree) {
        return Err(format!("SQLite has no {} indexes", method.as_sql()));
    }

    // The index lives in the table's database; the table name stays bare.
    let mut sql = String::from("CREATE ");
    if index.unique {
        sql.push_str("UNIQUE ");
    }
    sql.push_str("INDEX ");
    if if_not_exists {
        sql.push_str("IF NOT EXISTS ");
    }
    sql.push_str(&format!(
        "{} ON {} ({})",
        core.qualified(schema, &index.name),
        LITE.quote_ident(table),
        LITE.quote_list(&index.columns)
    ));
    if let Some(predicate) = index.where_clause.as_deref().filter(|w| !w.trim().is_empty()) {
        sql.push_str(" WHERE ");
        sql.push_str(predicate.trim());
    }
    Ok(sql)
}

pub(super) fn add_column(core: &DriverCore, request: &AddColumnRequest) -> PlanResult {
    require(&request.table, "Table name")?;
    let column = &request.column;
    if column.primary_key || column.unique || column.auto_increment {
        return Err(
            "SQLite cannot add a PRIMARY KEY, UNIQUE or auto-increment column to an existing table"
                .to_string(),
        );
    }
    Ok(DdlPlan::single(DdlStatement::plain(format!(
        "ALTER TABLE {} ADD COLUMN {}",
        core.qualified(request.schema.as_deref(), &request.table),
        column_sql(column, false)?
    ))))
}

pub(super) fn drop_column(core: &DriverCore, request: &DropColumnRequest) -> PlanResult {
    require(&request.table, "Table name")?;
    require(&request.column, "Column name")?;
    Ok(DdlPlan::single(DdlStatement::plain(format!(
        "ALTER TABLE {} DROP COLUMN {}",
        core.qualified(request.schema.as_deref(), &request.table),
        LITE.quote_ident(&request.column)
    ))))
}

pub(super) fn rename_column(core: &DriverCore, request: &RenameColumnRequest) -> PlanResult {
    require(&request.table, "Table name")?;
    require(&request.old_name, "Column name")?;
    require(&request.new_name, "New column name")?;
    Ok(DdlPlan::single(DdlStatement::plain(format!(
        "ALTER TABLE {} RENAME COLUMN {} TO {}",
        core.qualified(request.schema.as_deref(), &request.table),
        LITE.quote_ident(&request.old_name),
        LITE.quote_ident(&request.new_name)
    ))))
}

pub(super) fn create_index(core: &DriverCore, request: &CreateIndexRequest) -> PlanResult {
    require(&request.table, "Table name")?;
    let sql = index_sql(
        core,
        &request.table,
        request.schema.as_deref(),
        &request.index,
        request.if_not_exists,
    )?;
    Ok(DdlPlan::single(DdlStatement::plain(sql)))
}

pub(super) fn drop_index(core: &DriverCore, request: &DropIndexRequest) -> PlanResult {
    require(&request.name, "Index name")?;
    Ok(DdlPlan::single(DdlStatement::plain(format!(
        "DROP INDEX {}{}",
        if_exists(request.if_exists),
        core.qualified(request.schema.as_deref(), &request.name)
    ))))
}

pub(super) fn create_table(core: &DriverCore, request: &CreateTableRequest) -> PlanResult {
    request.validate()?;
    let schema = request.schema.as_deref();
    let table = core.qualified(schema, &request.name);

    let mut parts = Vec::with_capacity(request.columns.len() + request.foreign_keys.len() + 1);
    for column in &request.columns {
        parts.push(format!("  {}", column_sql(column, request.primary_key.is_empty())?));
    }
    if !request.primary_key.is_empty() {
        parts.push(format!("  PRIMARY KEY ({})", LITE.quote_list(&request.primary_key)));
    }
    for fk in &request.foreign_keys {
        parts.push(format!("  {}", foreign_key_sql(fk)?));
    }

    let mut sql = String::from("CREATE TABLE ");
    if request.if_not_exists {
        sql.push_str("IF NOT EXISTS ");
    }
    sql.push_str(&format!("{table} (\n{}\n)", parts.join(",\n")));

    let mut plan = DdlPlan::single(DdlStatement::plain(sql));
    for index in &request.indexes {
        plan.push(DdlStatement::plain(index_sql(
            core,
            &request.name,
            schema,
            index,
            request.if_not_exists,
        )?));
    }
    if request.comment.is_some() || request.columns.iter().any(|c| c.comment.is_some()) {
        tracing::debug!(table = %table, "SQLite has no comments; table and column comments skipped");
    }
    Ok(plan)
}

pub(super) fn drop_table(core: &DriverCore, request: &DropTableRequest) -> PlanResult {
    require(&request.name, "Table name")?;
    Ok(DdlPlan::single(DdlStatement::plain(format!(
        "DROP TABLE {}{}",
        if_exists(request.if_exists),
        core.qualified(request.schema.as_deref(), &request.name)
    ))))
}

pub(super) fn rename_table(core: &DriverCore, request: &RenameTableRequest) -> PlanResult {
    require(&request.old_name, "Table name")?;
    require(&request.new_name, "New table name")?;
    Ok(DdlPlan::single(DdlStatement::plain(format!(
        "ALTER TABLE {} RENAME TO {}",
        core.qualified(request.schema.as_deref(), &request.old_name),
        LITE.quote_ident(&request.new_name)
    ))))
}

pub(super) fn create_view(core: &DriverCore, request: &CreateViewRequest) -> PlanResult {
    require(&request.name, "View name")?;
    require(&request.query, "View query")?;
    if request.materialized {
        return Err("SQLite has no materialized views".to_string());
    }

    let view = core.qualified(request.schema.as_deref(), &request.name);
    let mut plan = DdlPlan::default();
    if request.or_replace {
        plan.push(DdlStatement::plain(format!("DROP VIEW IF EXISTS {view}")));
    }
    plan.push(DdlStatement::plain(format!(
        "CREATE VIEW {view} AS {}",
        strip_terminator(&request.query)
    )));
    Ok(plan)
}

pub(super) fn drop_view(core: &DriverCore, request: &DropViewRequest) -> PlanResult {
    require(&request.name, "View name")?;
    if request.materialized {
        return Err("SQLite has no materialized views".to_string());
    }
    Ok(DdlPlan::single(DdlStatement::plain(format!(
        "DROP VIEW {}{}",
        if_exists(request.if_exists),
        core.qualified(request.schema.as_deref(), &request.name)
    ))))
}

pub(super) fn create_trigger(core: &DriverCore, request: &CreateTriggerRequest) -> PlanResult {
    require(&request.name, "Trigger name")?;
    require(&request.table, "Table name")?;
    if request.for_each == TriggerForEach::Statement {
        return Err("SQLite triggers are always FOR EACH ROW".to_string());
    }
    let event = match request.events.as_slice() {
        [event] => match event {
            TriggerEvent::Insert => "INSERT".to_string(),
            TriggerEvent::Delete => "DELETE".to_string(),
            TriggerEvent::Update(columns) if columns.is_empty() => "UPDATE".to_string(),
            TriggerEvent::Update(columns) => format!("UPDATE OF {}", LITE.quote_list(columns)),
            TriggerEvent::Truncate => return Err("SQLite has no TRUNCATE triggers".to_string()),
        },
        [] => return Err("A trigger needs an event".to_string()),
        _ => return Err("A SQLite trigger fires on exactly one event".to_string()),
    };
    let body = match &request.action {
        TriggerAction::Body(body) if !body.trim().is_empty() => body.trim(),
        TriggerAction::Body(_) => return Err("Trigger body is required".to_string()),
        TriggerAction::ExecuteFunction { .. } => {
            return Err("SQLite triggers run an inline body, not a function".to_string());
        }
    };
    // Accept either a bare statement list or a full BEGIN ... END block.
    let body = if body.to_uppercase().starts_with("BEGIN") {
        body.trim_end_matches(';').to_string()
    } else {
        format!("BEGIN\n  {};\nEND", body.trim_end_matches(';'))
    };

    let mut sql = format!(
        "CREATE TRIGGER {} {} {event} ON {} FOR EACH ROW",
        core.qualified(request.schema.as_deref(), &request.name),
        request.timing.as_sql(),
        LITE.quote_ident(&request.table)
    );
    if let Some(when) = request.when.as_deref().filter(|w| !w.trim().is_empty()) {
        sql.push_str(&format!(" WHEN {}", when.trim()));
    }
    sql.push('\n');
    sql.push_str(&body);
    Ok(DdlPlan::single(DdlStatement::plain(sql)))
}

pub(super) fn drop_trigger(core: &DriverCore, request: &DropTriggerRequest) -> PlanResult {
    require(&request.name, "Trigger name")?;
    Ok(DdlPlan::single(DdlStatement::plain(format!(
        "DROP TRIGGER {}{}",
        if_exists(request.if_exists),
        core.qualified(request.schema.as_deref(), &request.name)
    ))))
}
