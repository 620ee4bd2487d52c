//! Running generated DDL.
//!
//! Engine builders turn a typed request into a [`DdlPlan`]. The runner
//! executes it statement by statement and folds statement failures into a
//! [`DdlOperationResult`].

use serde_json::Value as JsonValue;

use super::DatabaseDriver;
use crate::error::{TuskError, TuskResult};
use crate::models::{DdlOperationResult, QueryParam, Row};
use crate::sql::{inline_for_display, quote_literal, SqlDialect};

/// Shown in place of secret values.
pub const REDACTED: &str = "'****'";

/// A utility statement whose literals are spliced in server-side.
///
/// PostgreSQL cannot bind parameters in CREATE ROLE, COMMENT ON and similar
/// statements. Literals become `%L` in a `format()` template and are bound
/// as parameters to `SELECT format(...)`, whose result is the statement to
/// run.
#[derive(Debug, Clone, Default)]
pub struct FormatTemplate {
    template: String,
    args: Vec<Option<String>>,
    display: String,
}

impl FormatTemplate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append SQL text (identifiers, keywords).
    pub fn sql(mut self, text: &str) -> Self {
        self.template.push_str(&text.replace('%', "%%"));
        self.display.push_str(text);
        self
    }

    /// Append a literal, shown quoted in the display SQL.
    pub fn literal(mut self, value: Option<&str>) -> Self {
        self.template.push_str("%L");
        self.display.push_str(&value.map_or_else(|| "NULL".to_string(), quote_literal));
        self.args.push(value.map(String::from));
        self
    }

    /// Append a literal that is never shown.
    pub fn secret(mut self, value: &str) -> Self {
        self.template.push_str("%L");
        self.display.push_str(REDACTED);
        self.args.push(Some(value.to_string()));
        self
    }

    /// The `SELECT format(...)` query and its parameters.
    pub(crate) fn format_query(&self) -> (String, Vec<QueryParam>) {
        let mut sql = String::from("SELECT format($1::text");
        let mut params = vec![JsonValue::String(self.template.clone())];
        for (i, arg) in self.args.iter().enumerate() {
            sql.push_str(&format!(", ${}::text", i + 2));
            params.push(arg.clone().map_or(JsonValue::Null, JsonValue::String));
        }
        sql.push_str(") AS statement");
        (sql, params)
    }
}

/// One statement of a plan.
#[derive(Debug, Clone)]
pub enum DdlStatement {
    /// Sent as-is with bound parameters.
    Bound { sql: String, params: Vec<QueryParam> },
    /// Built server-side from a template, then sent.
    Formatted(FormatTemplate),
}

impl DdlStatement {
    /// A statement without parameters.
    pub fn plain(sql: impl Into<String>) -> Self {
        Self::Bound { sql: sql.into(), params: Vec::new() }
    }

    /// A statement with bound parameters.
    pub fn bound(sql: impl Into<String>, params: Vec<QueryParam>) -> Self {
        Self::Bound { sql: sql.into(), params }
    }

    /// SQL as shown to the user.
    pub fn display(&self, dialect: SqlDialect) -> String {
        match self {
            Self::Bound { sql, params } if params.is_empty() => sql.clone(),
            Self::Bound { sql, params } => inline_for_display(dialect, sql, params),
            Self::Formatted(template) => template.display.clone(),
        }
    }
}

/// Statements for one mutation.
#[derive(Debug, Clone, Default)]
pub struct DdlPlan {
    /// Run in order; the first failure fails the operation.
    pub statements: Vec<DdlStatement>,
    /// Run after all statements succeed; failures are only logged.
    pub followups: Vec<DdlStatement>,
}

impl DdlPlan {
    pub fn single(statement: DdlStatement) -> Self {
        Self { statements: vec![statement], followups: Vec::new() }
    }

    pub fn push(&mut self, statement: DdlStatement) {
        self.statements.push(statement);
    }

    pub fn followup(&mut self, statement: DdlStatement) {
        self.followups.push(statement);
    }

    /// All statements as display SQL.
    pub fn display(&self, dialect: SqlDialect) -> String {
        self.statements
            .iter()
            .chain(&self.followups)
            .map(|s| s.display(dialect))
            .collect::<Vec<_>>()
            .join(";\n")
    }
}

/// A builder outcome: a plan, or a request that cannot be turned into SQL.
pub type PlanResult = Result<DdlPlan, String>;

/// Execute a built plan.
///
/// The plan's statements run as one unit, so a failure part way leaves
/// nothing behind. Follow-ups run afterwards and their failures are only
/// logged. Statement failures become a failed result carrying the attempted
/// SQL. Connection and precondition errors are returned as `Err`.
pub async fn run_plan<D>(driver: &D, plan: PlanResult) -> TuskResult<DdlOperationResult>
where
    D: DatabaseDriver + ?Sized,
{
    let core = driver.core();
    core.ensure_connected()?;
    let dialect = core.dialect();

    let plan = match plan {
        Ok(plan) => plan,
        Err(message) => {
            tracing::debug!(connection_id = %core.config().id, error = %message, "DDL request rejected");
            return Ok(DdlOperationResult::failed(String::new(), message));
        }
    };
    let plan_sql = plan.display(dialect);

    if let Err(e) = run_statements(driver, &plan.statements).await {
        if !e.is_statement_error() {
            return Err(e);
        }
        tracing::warn!(connection_id = %core.config().id, sql = %plan_sql, error = %e, "DDL failed");
        return Ok(DdlOperationResult::failed(plan_sql, e.to_string()));
    }

    for statement in &plan.followups {
        if let Err(e) = run_statements(driver, std::slice::from_ref(statement)).await {
            if !e.is_statement_error() {
                return Err(e);
            }
            tracing::warn!(
                connection_id = %core.config().id,
                sql = %statement.display(dialect),
                error = %e,
                "Follow-up DDL statement failed"
            );
        }
    }

    tracing::info!(connection_id = %core.config().id, sql = %plan_sql, "DDL applied");
    Ok(DdlOperationResult::ok(plan_sql))
}

/// Resolve templates, then run one statement alone or several atomically.
///
/// A lone statement never gets wrapped, so statements that refuse to run
/// inside a transaction (`CREATE INDEX CONCURRENTLY`) still work.
async fn run_statements<D>(driver: &D, statements: &[DdlStatement]) -> TuskResult<()>
where
    D: DatabaseDriver + ?Sized,
{
    let mut resolved = Vec::with_capacity(statements.len());
    for statement in statements {
        resolved.push(resolve(driver, statement).await?);
    }

    match resolved.as_slice() {
        [] => Ok(()),
        [(sql, params)] => driver.run_statement(sql, params).await.map(|_| ()),
        batch => driver.run_atomically(batch).await,
    }
}

/// The SQL and parameters a statement executes as.
///
/// Templates are rendered by the server first; rendering changes nothing.
async fn resolve<D>(driver: &D, statement: &DdlStatement) -> TuskResult<(String, Vec<QueryParam>)>
where
    D: DatabaseDriver + ?Sized,
{
    match statement {
        DdlStatement::Bound { sql, params } => Ok((sql.clone(), params.clone())),
        DdlStatement::Formatted(template) => {
            let (query, params) = template.format_query();
            let result = driver.run_statement(&query, &params).await?;
            let sql = result
                .rows
                .first()
                .and_then(|row| row.get("statement"))
                .and_then(JsonValue::as_str)
                .ok_or_else(|| TuskError::query("format() returned no statement"))?
                .to_string();
            Ok((sql, Vec::new()))
        }
    }
}

/// Reject a blank name.
pub fn require(value: &str, what: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        Err(format!("{what} is required"))
    } else {
        Ok(())
    }
}

/// A SELECT body without surrounding whitespace or trailing semicolons.
pub fn strip_terminator(query: &str) -> &str {
    query.trim().trim_end_matches(';').trim_end()
}

fn key_conditions(dialect: SqlDialect, key: &Row, params: &mut Vec<QueryParam>) -> String {
    key.iter()
        .map(|(column, value)| {
            let column = dialect.quote_ident(column);
            if value.is_null() {
                format!("{column} IS NULL")
            } else {
                params.push(value.clone());
                format!("{column} = {}", dialect.placeholder(params.len()))
            }
        })
        .collect::<Vec<_>>()
        .join(" AND ")
}

/// INSERT one row into `table` (already quoted).
pub fn insert_row(dialect: SqlDialect, table: &str, values: &Row) -> PlanResult {
    require(table, "Table name")?;
    if values.is_empty() {
        return Ok(DdlPlan::single(DdlStatement::plain(format!(
            "INSERT INTO {table} DEFAULT VALUES"
        ))));
    }

    let columns: Vec<&String> = values.keys().collect();
    let markers = (1..=values.len()).map(|i| dialect.placeholder(i)).collect::<Vec<_>>().join(", ");
    let params = values.values().cloned().collect();
    let sql = format!("INSERT INTO {table} ({}) VALUES ({markers})", dialect.quote_list(&columns));
    Ok(DdlPlan::single(DdlStatement::bound(sql, params)))
}

/// DELETE the rows of `table` matching every key column.
pub fn delete_row(dialect: SqlDialect, table: &str, key: &Row) -> PlanResult {
    if key.is_empty() {
        return Err("A key is required to delete rows".to_string());
    }
    let mut params = Vec::with_capacity(key.len());
    let conditions = key_conditions(dialect, key, &mut params);
    Ok(DdlPlan::single(DdlStatement::bound(
        format!("DELETE FROM {table} WHERE {conditions}"),
        params,
    )))
}

/// UPDATE the rows of `table` matching every key column.
pub fn update_row(dialect: SqlDialect, table: &str, key: &Row, values: &Row) -> PlanResult {
    if key.is_empty() {
        return Err("A key is required to update rows".to_string());
    }
    if values.is_empty() {
        return Err("No values to update".to_string());
    }

    let mut params: Vec<QueryParam> = Vec::with_capacity(key.len() + values.len());
    let assignments = values
        .iter()
        .map(|(column, value)| {
            params.push(value.clone());
            format!("{} = {}", dialect.quote_ident(column), dialect.placeholder(params.len()))
        })
        .collect::<Vec<_>>()
        .join(", ");
    let conditions = key_conditions(dialect, key, &mut params);

    Ok(DdlPlan::single(DdlStatement::bound(
        format!("UPDATE {table} SET {assignments} WHERE {conditions}"),
        params,
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_format_template_escapes_percent_and_redacts() {
        let template = FormatTemplate::new()
            .sql("CREATE ROLE \"100%\" LOGIN PASSWORD ")
            .secret("secret")
            .sql(" VALID UNTIL ")
            .literal(Some("2030-01-01"));

        let (query, params) = template.format_query();
        assert_eq!(query, "SELECT format($1::text, $2::text, $3::text) AS statement");
        assert_eq!(params[0], json!("CREATE ROLE \"100%%\" LOGIN PASSWORD %L VALID UNTIL %L"));
        assert_eq!(params[1], json!("secret"));

        let display = DdlStatement::Formatted(template).display(SqlDialect::Postgres);
        assert_eq!(display, "CREATE ROLE \"100%\" LOGIN PASSWORD '****' VALID UNTIL '2030-01-01'");
        assert!(!display.contains("secret"));
    }

    #[test]
    fn test_plan_display_includes_followups() {
        let mut plan = DdlPlan::single(DdlStatement::plain("CREATE TABLE \"t\" (\"id\" integer)"));
        plan.followup(DdlStatement::Formatted(
            FormatTemplate::new().sql("COMMENT ON TABLE \"t\" IS ").literal(Some("it's")),
        ));
        assert_eq!(
            plan.display(SqlDialect::Postgres),
            "CREATE TABLE \"t\" (\"id\" integer);\nCOMMENT ON TABLE \"t\" IS 'it''s'"
        );
    }

    fn row(value: JsonValue) -> Row {
        match value {
            JsonValue::Object(map) => map,
            _ => Row::new(),
        }
    }

    #[test]
    fn test_update_numbers_values_before_key() {
        let plan = update_row(
            SqlDialect::Postgres,
            "\"public\".\"users\"",
            &row(json!({"id": 7, "tenant": null})),
            &row(json!({"email": "a@b.c", "name": "Ann"})),
        )
        .unwrap();
        match &plan.statements[0] {
            DdlStatement::Bound { sql, params } => {
                assert_eq!(
                    sql,
                    "UPDATE \"public\".\"users\" SET \"email\" = $1, \"name\" = $2 \
                     WHERE \"id\" = $3 AND \"tenant\" IS NULL"
                );
                assert_eq!(params, &vec![json!("a@b.c"), json!("Ann"), json!(7)]);
            }
            other => panic!("unexpected statement {other:?}"),
        }
    }

    #[test]
    fn test_row_mutations_need_a_key() {
        assert!(delete_row(SqlDialect::Sqlite, "\"t\"", &Row::new()).is_err());
        assert!(update_row(SqlDialect::Sqlite, "\"t\"", &Row::new(), &row(json!({"a": 1}))).is_err());
    }

    #[test]
    fn test_insert_uses_question_marks_for_sqlite() {
        let plan = insert_row(SqlDialect::Sqlite, "\"main\".\"t\"", &row(json!({"a": 1, "b": "x"})))
            .unwrap();
        assert_eq!(plan.display(SqlDialect::Sqlite), "INSERT INTO \"main\".\"t\" (\"a\", \"b\") VALUES (1, 'x')");

        let empty = insert_row(SqlDialect::Sqlite, "\"t\"", &Row::new()).unwrap();
        assert_eq!(empty.display(SqlDialect::Sqlite), "INSERT INTO \"t\" DEFAULT VALUES");
    }

    #[test]
    fn test_strip_terminator() {
        assert_eq!(strip_terminator("  SELECT 1;; \n"), "SELECT 1");
    }

    #[test]
    fn test_bound_display_inlines_values() {
        let statement =
            DdlStatement::bound("DELETE FROM \"t\" WHERE \"id\" = $1", vec![json!(7)]);
        assert_eq!(statement.display(SqlDialect::Postgres), "DELETE FROM \"t\" WHERE \"id\" = 7");
    }
}
