//! PostgreSQL statement execution and row decoding.

use bytes::{BufMut, BytesMut};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use futures_util::TryStreamExt;
use serde_json::{Map, Value as JsonValue};
use std::error::Error;
use std::pin::pin;
use std::time::Instant;
use tokio_postgres::types::{to_sql_checked, Format, FromSql, IsNull, Kind, ToSql, Type};
use tokio_postgres::{Client, Statement};
use uuid::Uuid;

use super::decode::{
    InetText, IntervalText, MacAddrText, MoneyText, NumericText, PointText, TimeTzText,
};
use crate::error::TuskResult;
use crate::models::{ColumnInfo, QueryParam, QueryResult, QueryType, Row};
use crate::types::{TypeMapper, UNKNOWN_TYPE};

/// A parameter sent in text format.
///
/// The server parses the text with the input function of whatever type it
/// inferred for the placeholder, so one representation fits every column.
#[derive(Debug)]
pub(super) struct TextParam(Option<String>);

impl TextParam {
    pub fn from_json(value: &QueryParam) -> Self {
        Self(match value {
            JsonValue::Null => None,
            JsonValue::Bool(b) => Some(b.to_string()),
            JsonValue::Number(n) => Some(n.to_string()),
            JsonValue::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        })
    }
}

impl ToSql for TextParam {
    fn to_sql(&self, _ty: &Type, out: &mut BytesMut) -> Result<IsNull, Box<dyn Error + Sync + Send>> {
        match &self.0 {
            Some(text) => {
                out.put_slice(text.as_bytes());
                Ok(IsNull::No)
            }
            None => Ok(IsNull::Yes),
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    fn encode_format(&self, _ty: &Type) -> Format {
        Format::Text
    }

    to_sql_checked!();
}

/// Column bytes for types without a dedicated decoder.
///
/// Enum labels and a few extension types send their text as the binary
/// form and come back as strings. Every other undecoded type (geometric
/// types other than POINT, ranges, tsvector, composite values) is binary
/// on the wire and comes back as `\x` hex.
struct RawValue(JsonValue);

impl RawValue {
    fn sends_text(ty: &Type) -> bool {
        matches!(ty.kind(), Kind::Enum(_))
            || *ty == Type::XML
            || matches!(ty.name(), "citext" | "ltree" | "lquery" | "ltxtquery")
    }
}

impl<'a> FromSql<'a> for RawValue {
    fn from_sql(ty: &Type, raw: &'a [u8]) -> Result<Self, Box<dyn Error + Sync + Send>> {
        let value = match std::str::from_utf8(raw) {
            Ok(text) if Self::sends_text(ty) => JsonValue::String(text.to_string()),
            _ => JsonValue::String(format!("\\x{}", hex::encode(raw))),
        };
        Ok(Self(value))
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }
}

/// Run a prepared statement and collect its result.
pub(super) async fn run(
    client: &Client,
    statement: &Statement,
    params: &[TextParam],
    query_type: QueryType,
    started: Instant,
) -> TuskResult<QueryResult> {
    let columns = column_info(statement);
    let params = params.iter().map(|p| p as &(dyn ToSql + Sync));
    let stream = client.query_raw(statement, params).await?;
    let mut stream = pin!(stream);

    let mut rows = Vec::new();
    while let Some(row) = stream.try_next().await? {
        rows.push(row_to_json(&row));
    }
    let affected = stream.rows_affected();
    let elapsed = started.elapsed().as_millis() as u64;

    if !columns.is_empty() {
        let mut result = QueryResult::with_rows(columns, rows, query_type, elapsed);
        if query_type.is_dml() {
            result.affected_rows = affected;
        }
        Ok(result)
    } else if query_type.is_dml() {
        Ok(QueryResult::with_affected(affected.unwrap_or(0), query_type, elapsed))
    } else {
        Ok(QueryResult::with_rows(Vec::new(), Vec::new(), query_type, elapsed))
    }
}

fn column_info(statement: &Statement) -> Vec<ColumnInfo> {
    statement
        .columns()
        .iter()
        .map(|col| {
            let ty = col.type_();
            let data_type = match TypeMapper::postgres_type(ty.oid()) {
                UNKNOWN_TYPE => ty.name().to_uppercase(),
                known => known.to_string(),
            };
            ColumnInfo { name: col.name().to_string(), data_type, type_id: ty.oid().to_string() }
        })
        .collect()
}

fn get<'a, T: FromSql<'a>>(row: &'a tokio_postgres::Row, i: usize) -> Option<Option<T>> {
    row.try_get::<_, Option<T>>(i).ok()
}

fn number(value: f64) -> JsonValue {
    serde_json::Number::from_f64(value)
        .map(JsonValue::Number)
        .unwrap_or_else(|| JsonValue::String(value.to_string()))
}

fn array<T>(items: Vec<Option<T>>, f: impl Fn(T) -> JsonValue) -> JsonValue {
    JsonValue::Array(items.into_iter().map(|v| v.map_or(JsonValue::Null, &f)).collect())
}

fn value_at(row: &tokio_postgres::Row, i: usize, ty: &Type) -> JsonValue {
    let decoded: Option<Option<JsonValue>> = match *ty {
        Type::BOOL => get::<bool>(row, i).map(|v| v.map(JsonValue::Bool)),
        Type::INT2 => get::<i16>(row, i).map(|v| v.map(JsonValue::from)),
        Type::INT4 => get::<i32>(row, i).map(|v| v.map(JsonValue::from)),
        Type::INT8 => get::<i64>(row, i).map(|v| v.map(JsonValue::from)),
        Type::OID => get::<u32>(row, i).map(|v| v.map(JsonValue::from)),
        Type::CHAR => get::<i8>(row, i).map(|v| v.map(|c| JsonValue::String((c as u8 as char).to_string()))),
        Type::FLOAT4 => get::<f32>(row, i).map(|v| v.map(|f| number(f as f64))),
        Type::FLOAT8 => get::<f64>(row, i).map(|v| v.map(number)),
        Type::NUMERIC => get::<NumericText>(row, i).map(|v| v.map(|n| JsonValue::String(n.0))),
        Type::INTERVAL => get::<IntervalText>(row, i).map(|v| v.map(|t| JsonValue::String(t.0))),
        Type::MONEY => get::<MoneyText>(row, i).map(|v| v.map(|m| JsonValue::String(m.0))),
        Type::INET | Type::CIDR => get::<InetText>(row, i).map(|v| v.map(|a| JsonValue::String(a.0))),
        Type::MACADDR | Type::MACADDR8 => {
            get::<MacAddrText>(row, i).map(|v| v.map(|m| JsonValue::String(m.0)))
        }
        Type::TIMETZ => get::<TimeTzText>(row, i).map(|v| v.map(|t| JsonValue::String(t.0))),
        Type::POINT => get::<PointText>(row, i).map(|v| v.map(|p| JsonValue::String(p.0))),
        Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME | Type::UNKNOWN => {
            get::<String>(row, i).map(|v| v.map(JsonValue::String))
        }
        Type::JSON | Type::JSONB => get::<JsonValue>(row, i),
        Type::UUID => get::<Uuid>(row, i).map(|v| v.map(|u| JsonValue::String(u.to_string()))),
        Type::TIMESTAMP => get::<NaiveDateTime>(row, i)
            .map(|v| v.map(|t| JsonValue::String(t.format("%Y-%m-%d %H:%M:%S%.f").to_string()))),
        Type::TIMESTAMPTZ => {
            get::<DateTime<Utc>>(row, i).map(|v| v.map(|t| JsonValue::String(t.to_rfc3339())))
        }
        Type::DATE => get::<NaiveDate>(row, i).map(|v| v.map(|d| JsonValue::String(d.to_string()))),
        Type::TIME => get::<NaiveTime>(row, i).map(|v| v.map(|t| JsonValue::String(t.to_string()))),
        Type::BYTEA => get::<Vec<u8>>(row, i)
            .map(|v| v.map(|b| JsonValue::String(format!("\\x{}", hex::encode(b))))),
        Type::BOOL_ARRAY => get::<Vec<Option<bool>>>(row, i).map(|v| v.map(|a| array(a, JsonValue::Bool))),
        Type::INT2_ARRAY => get::<Vec<Option<i16>>>(row, i).map(|v| v.map(|a| array(a, JsonValue::from))),
        Type::INT4_ARRAY => get::<Vec<Option<i32>>>(row, i).map(|v| v.map(|a| array(a, JsonValue::from))),
        Type::INT8_ARRAY => get::<Vec<Option<i64>>>(row, i).map(|v| v.map(|a| array(a, JsonValue::from))),
        Type::FLOAT4_ARRAY => {
            get::<Vec<Option<f32>>>(row, i).map(|v| v.map(|a| array(a, |f| number(f as f64))))
        }
        Type::FLOAT8_ARRAY => get::<Vec<Option<f64>>>(row, i).map(|v| v.map(|a| array(a, number))),
        Type::NUMERIC_ARRAY => get::<Vec<Option<NumericText>>>(row, i)
            .map(|v| v.map(|a| array(a, |n| JsonValue::String(n.0)))),
        Type::DATE_ARRAY => get::<Vec<Option<NaiveDate>>>(row, i)
            .map(|v| v.map(|a| array(a, |d| JsonValue::String(d.to_string())))),
        Type::TIMESTAMP_ARRAY => get::<Vec<Option<NaiveDateTime>>>(row, i).map(|v| {
            v.map(|a| array(a, |t| JsonValue::String(t.format("%Y-%m-%d %H:%M:%S%.f").to_string())))
        }),
        Type::TIMESTAMPTZ_ARRAY => get::<Vec<Option<DateTime<Utc>>>>(row, i)
            .map(|v| v.map(|a| array(a, |t| JsonValue::String(t.to_rfc3339())))),
        Type::INTERVAL_ARRAY => get::<Vec<Option<IntervalText>>>(row, i)
            .map(|v| v.map(|a| array(a, |t| JsonValue::String(t.0)))),
        Type::INET_ARRAY | Type::CIDR_ARRAY => get::<Vec<Option<InetText>>>(row, i)
            .map(|v| v.map(|a| array(a, |t| JsonValue::String(t.0)))),
        Type::TEXT_ARRAY | Type::VARCHAR_ARRAY | Type::NAME_ARRAY => {
            get::<Vec<Option<String>>>(row, i).map(|v| v.map(|a| array(a, JsonValue::String)))
        }
        Type::UUID_ARRAY => get::<Vec<Option<Uuid>>>(row, i)
            .map(|v| v.map(|a| array(a, |u| JsonValue::String(u.to_string())))),
        Type::JSONB_ARRAY | Type::JSON_ARRAY => {
            get::<Vec<Option<JsonValue>>>(row, i).map(|v| v.map(|a| array(a, |j| j)))
        }
        _ => None,
    };

    match decoded {
        Some(Some(value)) => value,
        Some(None) => JsonValue::Null,
        None => match row.try_get::<_, Option<RawValue>>(i) {
            Ok(Some(RawValue(value))) => value,
            Ok(None) => JsonValue::Null,
            Err(e) => {
                tracing::debug!(column = i, type_name = ty.name(), error = %e, "Undecodable column value");
                JsonValue::Null
            }
        },
    }
}

/// Convert a row to a JSON object keyed by column name.
pub(super) fn row_to_json(row: &tokio_postgres::Row) -> Row {
    let mut map = Map::with_capacity(row.len());
    for (i, col) in row.columns().iter().enumerate() {
        map.insert(col.name().to_string(), value_at(row, i, col.type_()));
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_text_param_encodes_text_and_null() {
        let mut buf = BytesMut::new();
        let param = TextParam::from_json(&json!(42));
        assert!(matches!(param.to_sql(&Type::INT4, &mut buf), Ok(IsNull::No)));
        assert_eq!(&buf[..], b"42");
        assert!(matches!(param.encode_format(&Type::INT4), Format::Text));

        let mut buf = BytesMut::new();
        let param = TextParam::from_json(&JsonValue::Null);
        assert!(matches!(param.to_sql(&Type::TEXT, &mut buf), Ok(IsNull::Yes)));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_text_param_renders_json_values() {
        assert_eq!(TextParam::from_json(&json!(true)).0.as_deref(), Some("true"));
        assert_eq!(TextParam::from_json(&json!("x")).0.as_deref(), Some("x"));
        assert_eq!(TextParam::from_json(&json!({"a": 1})).0.as_deref(), Some("{\"a\":1}"));
    }

    #[test]
    fn test_undecoded_binary_types_become_hex() {
        // box '(1,1),(0,0)' on the wire: four float8 values.
        let mut raw = Vec::new();
        for v in [1.0_f64, 1.0, 0.0, 0.0] {
            raw.extend_from_slice(&v.to_be_bytes());
        }
        let RawValue(value) = RawValue::from_sql(&Type::BOX, &raw).unwrap();
        assert_eq!(value, json!(format!("\\x{}", hex::encode(&raw))));

        // Binary bytes that happen to be valid UTF-8 are still hex.
        let RawValue(value) = RawValue::from_sql(&Type::TS_VECTOR, b"\0\0\0\x01ab").unwrap();
        assert_eq!(value, json!("\\x000000016162"));
    }

    #[test]
    fn test_text_sent_types_stay_text() {
        let RawValue(xml) = RawValue::from_sql(&Type::XML, b"<a/>").unwrap();
        assert_eq!(xml, json!("<a/>"));

        let mood = Type::new(
            "mood".into(),
            16_385,
            Kind::Enum(vec!["happy".into(), "sad".into()]),
            "public".into(),
        );
        let RawValue(label) = RawValue::from_sql(&mood, b"happy").unwrap();
        assert_eq!(label, json!("happy"));
    }

    #[test]
    fn test_non_finite_floats_become_strings() {
        assert_eq!(number(1.5), json!(1.5));
        assert_eq!(number(f64::NAN), json!("NaN"));
    }
}
