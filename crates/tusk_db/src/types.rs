//! Canonical type names.
//!
//! Maps engine-native type identifiers to the engine-independent names shown
//! to the rest of the application, and infers types from raw sample values
//! for import.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::models::EngineType;

/// Returned for identifiers the tables do not cover.
pub const UNKNOWN_TYPE: &str = "UNKNOWN";

const VARCHAR_LIMIT: usize = 255;

/// Type mapping and inference.
pub struct TypeMapper;

impl TypeMapper {
    /// Canonical name for an engine-native type identifier.
    ///
    /// PostgreSQL identifiers are OIDs; SQLite identifiers are declared
    /// column types. Never fails.
    pub fn map_type(engine: EngineType, type_id: &str) -> String {
        match engine {
            EngineType::Postgres => type_id
                .trim()
                .parse::<u32>()
                .map(Self::postgres_type)
                .unwrap_or(UNKNOWN_TYPE)
                .to_string(),
            EngineType::Sqlite => Self::sqlite_type(type_id).to_string(),
            _ => UNKNOWN_TYPE.to_string(),
        }
    }

    /// Canonical name for a PostgreSQL type OID.
    pub fn postgres_type(oid: u32) -> &'static str {
        match oid {
            16 => "BOOLEAN",
            17 => "BYTEA",
            18 => "CHAR",
            19 => "NAME",
            20 => "BIGINT",
            21 => "SMALLINT",
            23 => "INTEGER",
            24 => "REGPROC",
            25 => "TEXT",
            26 => "OID",
            114 => "JSON",
            142 => "XML",
            199 => "JSON[]",
            600 => "POINT",
            650 => "CIDR",
            700 => "REAL",
            701 => "DOUBLE PRECISION",
            774 => "MACADDR8",
            790 => "MONEY",
            829 => "MACADDR",
            869 => "INET",
            1000 => "BOOLEAN[]",
            1001 => "BYTEA[]",
            1005 => "SMALLINT[]",
            1007 => "INTEGER[]",
            1009 => "TEXT[]",
            1014 => "CHAR[]",
            1015 => "VARCHAR[]",
            1016 => "BIGINT[]",
            1021 => "REAL[]",
            1022 => "DOUBLE PRECISION[]",
            1042 => "CHAR",
            1043 => "VARCHAR",
            1082 => "DATE",
            1083 => "TIME",
            1114 => "TIMESTAMP",
            1115 => "TIMESTAMP[]",
            1182 => "DATE[]",
            1184 => "TIMESTAMPTZ",
            1185 => "TIMESTAMPTZ[]",
            1186 => "INTERVAL",
            1231 => "NUMERIC[]",
            1266 => "TIMETZ",
            1560 => "BIT",
            1562 => "VARBIT",
            1700 => "NUMERIC",
            2205 => "REGCLASS",
            2249 => "RECORD",
            2278 => "VOID",
            2950 => "UUID",
            2951 => "UUID[]",
            3614 => "TSVECTOR",
            3615 => "TSQUERY",
            3802 => "JSONB",
            3807 => "JSONB[]",
            3904 => "INT4RANGE",
            3906 => "NUMRANGE",
            3908 => "TSRANGE",
            3910 => "TSTZRANGE",
            3912 => "DATERANGE",
            3926 => "INT8RANGE",
            _ => UNKNOWN_TYPE,
        }
    }

    /// Canonical name for a SQLite declared column type.
    ///
    /// Well-known names map directly; anything else follows SQLite's
    /// affinity rules. An empty declaration has BLOB affinity.
    pub fn sqlite_type(declared: &str) -> &'static str {
        let upper = declared.trim().to_uppercase();
        let base = upper.split('(').next().unwrap_or("").trim();

        match base {
            "BOOL" | "BOOLEAN" => return "BOOLEAN",
            "DATE" => return "DATE",
            "DATETIME" | "TIMESTAMP" => return "TIMESTAMP",
            "TIME" => return "TIME",
            "JSON" => return "JSON",
            "UUID" => return "UUID",
            "BIGINT" | "INT8" | "UNSIGNED BIG INT" => return "BIGINT",
            "SMALLINT" | "INT2" | "TINYINT" => return "SMALLINT",
            "VARCHAR" | "CHARACTER VARYING" | "NVARCHAR" | "VARYING CHARACTER" => return "VARCHAR",
            "DECIMAL" | "NUMERIC" => return "NUMERIC",
            "DOUBLE" | "DOUBLE PRECISION" => return "DOUBLE PRECISION",
            _ => {}
        }

        if upper.contains("INT") {
            "INTEGER"
        } else if upper.contains("CHAR") || upper.contains("CLOB") || upper.contains("TEXT") {
            "TEXT"
        } else if upper.is_empty() || upper.contains("BLOB") {
            "BLOB"
        } else if upper.contains("REAL") || upper.contains("FLOA") || upper.contains("DOUB") {
            "REAL"
        } else {
            "NUMERIC"
        }
    }

    /// Infer a column type from sample text values.
    ///
    /// Empty strings count as missing. The first type every present sample
    /// satisfies wins, in order INTEGER, BIGINT, DECIMAL, BOOLEAN, DATE,
    /// TIMESTAMP, UUID, JSON, VARCHAR(255), TEXT. No samples gives TEXT.
    pub fn detect_type<I, S>(samples: I) -> &'static str
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let samples: Vec<S> = samples.into_iter().filter(|s| !s.as_ref().trim().is_empty()).collect();
        let values: Vec<&str> = samples.iter().map(|s| s.as_ref().trim()).collect();
        Self::detect_from(&values)
    }

    /// Infer a column type from JSON sample values. Nulls count as missing.
    pub fn detect_type_from_values(samples: &[JsonValue]) -> &'static str {
        let texts: Vec<String> = samples
            .iter()
            .filter_map(|v| match v {
                JsonValue::Null => None,
                JsonValue::String(s) => Some(s.clone()),
                other => Some(other.to_string()),
            })
            .collect();
        Self::detect_type(texts)
    }

    fn detect_from(values: &[&str]) -> &'static str {
        if values.is_empty() {
            return "TEXT";
        }

        let all = |check: fn(&str) -> bool| values.iter().all(|v| check(v));

        if all(|v| v.parse::<i32>().is_ok()) {
            "INTEGER"
        } else if all(|v| v.parse::<i64>().is_ok()) {
            "BIGINT"
        } else if all(is_decimal) {
            "DECIMAL"
        } else if all(|v| matches!(v.to_lowercase().as_str(), "true" | "false" | "yes" | "no")) {
            "BOOLEAN"
        } else if all(is_date) {
            "DATE"
        } else if all(|v| is_date(v) || is_timestamp(v)) {
            "TIMESTAMP"
        } else if all(is_uuid) {
            "UUID"
        } else if all(is_json_container) {
            "JSON"
        } else if all(|v| v.chars().count() <= VARCHAR_LIMIT) {
            "VARCHAR(255)"
        } else {
            "TEXT"
        }
    }
}

/// Optional sign, digits with at most one decimal point, optional exponent.
fn is_decimal(value: &str) -> bool {
    let body = value.strip_prefix(['-', '+']).unwrap_or(value);
    let (mantissa, exponent) = match body.find(['e', 'E']) {
        Some(i) => (&body[..i], Some(&body[i + 1..])),
        None => (body, None),
    };

    let mut parts = mantissa.splitn(2, '.');
    let whole = parts.next().unwrap_or("");
    let fraction = parts.next().unwrap_or("");
    let digits = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
    let mantissa_ok = digits(whole) && digits(fraction) && !(whole.is_empty() && fraction.is_empty());

    let exponent_ok = match exponent {
        None => true,
        Some(e) => {
            let e = e.strip_prefix(['-', '+']).unwrap_or(e);
            !e.is_empty() && digits(e)
        }
    };

    mantissa_ok && exponent_ok
}

fn is_date(value: &str) -> bool {
    value.len() == 10 && NaiveDate::parse_from_str(value, "%Y-%m-%d").is_ok()
}

fn is_timestamp(value: &str) -> bool {
    DateTime::parse_from_rfc3339(value).is_ok()
        || ["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M:%S%.f"]
            .iter()
            .any(|fmt| NaiveDateTime::parse_from_str(value, fmt).is_ok())
}

fn is_uuid(value: &str) -> bool {
    let bytes = value.as_bytes();
    value.len() == 36
        && [8, 13, 18, 23].iter().all(|&i| bytes[i] == b'-')
        && Uuid::parse_str(value).is_ok()
}

fn is_json_container(value: &str) -> bool {
    (value.starts_with('{') || value.starts_with('['))
        && matches!(
            serde_json::from_str::<JsonValue>(value),
            Ok(JsonValue::Object(_)) | Ok(JsonValue::Array(_))
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_postgres_oids() {
        assert_eq!(TypeMapper::postgres_type(23), "INTEGER");
        assert_eq!(TypeMapper::postgres_type(25), "TEXT");
        assert_eq!(TypeMapper::postgres_type(1700), "NUMERIC");
        assert_eq!(TypeMapper::postgres_type(3802), "JSONB");
        assert_eq!(TypeMapper::postgres_type(999_999), "UNKNOWN");
        assert_eq!(TypeMapper::map_type(EngineType::Postgres, "2950"), "UUID");
        assert_eq!(TypeMapper::map_type(EngineType::Postgres, "not-an-oid"), "UNKNOWN");
        assert_eq!(TypeMapper::map_type(EngineType::Redis, "string"), "UNKNOWN");
    }

    #[test]
    fn test_sqlite_declared_types() {
        assert_eq!(TypeMapper::sqlite_type("INTEGER"), "INTEGER");
        assert_eq!(TypeMapper::sqlite_type("int"), "INTEGER");
        assert_eq!(TypeMapper::sqlite_type("VARCHAR(100)"), "VARCHAR");
        assert_eq!(TypeMapper::sqlite_type("nchar(10)"), "TEXT");
        assert_eq!(TypeMapper::sqlite_type("BOOLEAN"), "BOOLEAN");
        assert_eq!(TypeMapper::sqlite_type("DATETIME"), "TIMESTAMP");
        assert_eq!(TypeMapper::sqlite_type("float"), "REAL");
        assert_eq!(TypeMapper::sqlite_type(""), "BLOB");
        assert_eq!(TypeMapper::sqlite_type("DECIMAL(10,2)"), "NUMERIC");
        assert_eq!(TypeMapper::sqlite_type("whatever"), "NUMERIC");
    }

    #[test]
    fn test_detect_numeric_types() {
        assert_eq!(TypeMapper::detect_type(["1", "2", "42"]), "INTEGER");
        assert_eq!(TypeMapper::detect_type(["1", "3000000000"]), "BIGINT");
        assert_eq!(TypeMapper::detect_type(["1.5", "2.3"]), "DECIMAL");
        assert_eq!(TypeMapper::detect_type(["1", "2.5"]), "DECIMAL");
        assert_eq!(TypeMapper::detect_type(["-1e5", ".5"]), "DECIMAL");
    }

    #[test]
    fn test_detect_other_types() {
        assert_eq!(TypeMapper::detect_type(["true", "false"]), "BOOLEAN");
        assert_eq!(TypeMapper::detect_type(["Yes", "no"]), "BOOLEAN");
        assert_eq!(TypeMapper::detect_type(["2024-01-31", "1999-12-01"]), "DATE");
        assert_eq!(TypeMapper::detect_type(["2024-01-31", "2024-01-31 10:00:00"]), "TIMESTAMP");
        assert_eq!(TypeMapper::detect_type(["2024-01-31T10:00:00Z"]), "TIMESTAMP");
        assert_eq!(
            TypeMapper::detect_type(["550e8400-e29b-41d4-a716-446655440000"]),
            "UUID"
        );
        assert_eq!(TypeMapper::detect_type(["{\"a\": 1}", "[1, 2]"]), "JSON");
        assert_eq!(TypeMapper::detect_type(["hello", "world"]), "VARCHAR(255)");
        assert_eq!(TypeMapper::detect_type(["x".repeat(300)]), "TEXT");
    }

    #[test]
    fn test_detect_empty_is_text() {
        assert_eq!(TypeMapper::detect_type(Vec::<String>::new()), "TEXT");
        assert_eq!(TypeMapper::detect_type(["", "  "]), "TEXT");
        assert_eq!(TypeMapper::detect_type_from_values(&[json!(null), json!(null)]), "TEXT");
    }

    #[test]
    fn test_detect_from_json_values() {
        assert_eq!(TypeMapper::detect_type_from_values(&[json!(1), json!(null), json!(7)]), "INTEGER");
        assert_eq!(TypeMapper::detect_type_from_values(&[json!(true), json!(false)]), "BOOLEAN");
    }
}
