//! SQLite statement execution and value conversion.

use rusqlite::types::{Value, ValueRef};
use rusqlite::Connection;
use serde_json::{Map, Value as JsonValue};
use std::time::Instant;

use crate::error::{TuskError, TuskResult};
use crate::models::{ColumnInfo, QueryParam, QueryResult, QueryType};
use crate::types::{TypeMapper, UNKNOWN_TYPE};

/// Bind value for a JSON parameter.
pub(super) fn to_value(param: &QueryParam) -> Value {
    match param {
        JsonValue::Null => Value::Null,
        JsonValue::Bool(b) => Value::Integer(i64::from(*b)),
        JsonValue::Number(n) => match n.as_i64() {
            Some(i) => Value::Integer(i),
            None => n.as_f64().map_or_else(|| Value::Text(n.to_string()), Value::Real),
        },
        JsonValue::String(s) => Value::Text(s.clone()),
        other => Value::Text(other.to_string()),
    }
}

fn to_json(value: ValueRef<'_>) -> JsonValue {
    match value {
        ValueRef::Null => JsonValue::Null,
        ValueRef::Integer(i) => JsonValue::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(JsonValue::Number)
            .unwrap_or_else(|| JsonValue::String(f.to_string())),
        ValueRef::Text(bytes) => JsonValue::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => JsonValue::String(format!("\\x{}", hex::encode(bytes))),
    }
}

fn storage_class(value: ValueRef<'_>) -> Option<&'static str> {
    match value {
        ValueRef::Null => None,
        ValueRef::Integer(_) => Some("INTEGER"),
        ValueRef::Real(_) => Some("REAL"),
        ValueRef::Text(_) => Some("TEXT"),
        ValueRef::Blob(_) => Some("BLOB"),
    }
}

/// Run one statement on `connection`. Blocks; call from a blocking task.
pub(super) fn run(
    connection: &Connection,
    sql: &str,
    params: &[QueryParam],
    started: Instant,
) -> TuskResult<QueryResult> {
    let query_type = QueryType::detect(sql);
    let mut statement = connection.prepare(sql)?;

    let expected = statement.parameter_count();
    if expected != params.len() {
        return Err(TuskError::query(format!(
            "Statement expects {expected} parameters but {} were supplied",
            params.len()
        )));
    }
    for (i, param) in params.iter().enumerate() {
        statement.raw_bind_parameter(i + 1, to_value(param))?;
    }

    if statement.column_count() == 0 {
        let affected = statement.raw_execute()? as u64;
        let elapsed = started.elapsed().as_millis() as u64;
        return Ok(if query_type.is_dml() {
            QueryResult::with_affected(affected, query_type, elapsed)
        } else {
            QueryResult::with_rows(Vec::new(), Vec::new(), query_type, elapsed)
        });
    }

    let names: Vec<String> = statement.column_names().into_iter().map(String::from).collect();
    let declared: Vec<Option<String>> =
        statement.columns().iter().map(|c| c.decl_type().map(String::from)).collect();
    let mut observed: Vec<Option<&'static str>> = vec![None; names.len()];

    let mut rows = Vec::new();
    let mut cursor = statement.raw_query();
    while let Some(row) = cursor.next()? {
        let mut map = Map::with_capacity(names.len());
        for (i, name) in names.iter().enumerate() {
            let value = row.get_ref(i)?;
            if observed[i].is_none() {
                observed[i] = storage_class(value);
            }
            map.insert(name.clone(), to_json(value));
        }
        rows.push(map);
    }
    drop(cursor);

    let columns = column_info(&names, &declared, &observed);
    let elapsed = started.elapsed().as_millis() as u64;
    let mut result = QueryResult::with_rows(columns, rows, query_type, elapsed);
    if query_type.is_dml() {
        result.affected_rows = Some(connection.changes() as u64);
    }
    Ok(result)
}

/// Declared type when there is one, else the first non-null storage class.
fn column_info(
    names: &[String],
    declared: &[Option<String>],
    observed: &[Option<&'static str>],
) -> Vec<ColumnInfo> {
    names
        .iter()
        .zip(declared)
        .zip(observed)
        .map(|((name, declared), observed)| match declared {
            Some(decl) => ColumnInfo {
                name: name.clone(),
                data_type: TypeMapper::sqlite_type(decl).to_string(),
                type_id: decl.clone(),
            },
            None => ColumnInfo {
                name: name.clone(),
                data_type: observed.unwrap_or(UNKNOWN_TYPE).to_string(),
                type_id: String::new(),
            },
        })
        .collect()
}
