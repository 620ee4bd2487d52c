//! Identifier quoting and literal display per engine.

use serde_json::Value as JsonValue;

use super::scanner::{Scanner, Span, SpanKind};

use crate::models::EngineType;

/// Placeholder marker used by an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceholderStyle {
    /// `?`
    QuestionMark,
    /// `$1`, `$2`, ...
    Numbered,
}

/// SQL syntax variant of an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlDialect {
    /// PostgreSQL
    Postgres,
    /// SQLite
    Sqlite,
    /// MySQL and MariaDB
    MySql,
    /// ClickHouse
    ClickHouse,
}

impl SqlDialect {
    /// Dialect for an engine. Non-SQL engines have none.
    pub fn for_engine(engine: EngineType) -> Option<Self> {
        match engine {
            EngineType::Postgres => Some(Self::Postgres),
            EngineType::Sqlite => Some(Self::Sqlite),
            EngineType::MySql | EngineType::MariaDb => Some(Self::MySql),
            EngineType::ClickHouse => Some(Self::ClickHouse),
            EngineType::MongoDb | EngineType::Redis => None,
        }
    }

    /// Placeholder marker this dialect expects on the wire.
    pub fn placeholder_style(&self) -> PlaceholderStyle {
        match self {
            Self::Postgres => PlaceholderStyle::Numbered,
            Self::Sqlite | Self::MySql | Self::ClickHouse => PlaceholderStyle::QuestionMark,
        }
    }

    /// The marker for the `index`th (1-based) parameter.
    pub fn placeholder(&self, index: usize) -> String {
        match self.placeholder_style() {
            PlaceholderStyle::Numbered => format!("${index}"),
            PlaceholderStyle::QuestionMark => "?".to_string(),
        }
    }

    fn quote_char(&self) -> char {
        match self {
            Self::Postgres | Self::Sqlite => '"',
            Self::MySql | Self::ClickHouse => '`',
        }
    }

    /// Quote an identifier, doubling embedded quote characters.
    pub fn quote_ident(&self, ident: &str) -> String {
        let q = self.quote_char();
        let mut out = String::with_capacity(ident.len() + 2);
        out.push(q);
        for ch in ident.chars() {
            if ch == q {
                out.push(q);
            }
            out.push(ch);
        }
        out.push(q);
        out
    }

    /// `"schema"."name"`, or just `"name"` without a schema.
    pub fn qualified(&self, schema: Option<&str>, name: &str) -> String {
        match schema {
            Some(schema) if !schema.is_empty() => {
                format!("{}.{}", self.quote_ident(schema), self.quote_ident(name))
            }
            _ => self.quote_ident(name),
        }
    }

    /// Quote and comma-join a list of identifiers.
    pub fn quote_list<S: AsRef<str>>(&self, idents: &[S]) -> String {
        idents.iter().map(|i| self.quote_ident(i.as_ref())).collect::<Vec<_>>().join(", ")
    }
}

/// Quote a string literal for display.
///
/// Only used to render the SQL shown back to the user; values sent to the
/// server are always bound.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Render a parameter value as SQL for display.
pub fn display_value(value: &JsonValue) -> String {
    match value {
        JsonValue::Null => "NULL".to_string(),
        JsonValue::Bool(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
        JsonValue::Number(n) => n.to_string(),
        JsonValue::String(s) => quote_literal(s),
        other => quote_literal(&other.to_string()),
    }
}

/// Replace each placeholder in `sql` with the display form of its value.
pub fn inline_for_display(dialect: SqlDialect, sql: &str, params: &[JsonValue]) -> String {
    let spans: Vec<Span> = Scanner::new(sql).collect();
    let is_digit = |s: &Span| s.kind == SpanKind::Code && sql.as_bytes()[s.start].is_ascii_digit();
    let mut out = String::with_capacity(sql.len());
    let mut next_marker = 0;
    let mut i = 0;

    while i < spans.len() {
        let span = spans[i];
        let text = &sql[span.start..span.end];

        if span.kind == SpanKind::Code {
            match (dialect.placeholder_style(), text) {
                (PlaceholderStyle::QuestionMark, "?") => {
                    if let Some(value) = params.get(next_marker) {
                        out.push_str(&display_value(value));
                        next_marker += 1;
                        i += 1;
                        continue;
                    }
                }
                (PlaceholderStyle::Numbered, "$") => {
                    let digits = spans[i + 1..].iter().take_while(|s| is_digit(s)).count();
                    if digits > 0 {
                        let number = &sql[spans[i + 1].start..spans[i + digits].end];
                        let value = number
                            .parse::<usize>()
                            .ok()
                            .and_then(|n| n.checked_sub(1))
                            .and_then(|n| params.get(n));
                        if let Some(value) = value {
                            out.push_str(&display_value(value));
                            i += 1 + digits;
                            continue;
                        }
                    }
                }
                _ => {}
            }
        }

        out.push_str(text);
        i += 1;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_quote_ident_doubles_quotes() {
        assert_eq!(SqlDialect::Postgres.quote_ident("users"), "\"users\"");
        assert_eq!(SqlDialect::Postgres.quote_ident("we\"ird"), "\"we\"\"ird\"");
        assert_eq!(SqlDialect::MySql.quote_ident("a`b"), "`a``b`");
    }

    #[test]
    fn test_qualified() {
        assert_eq!(SqlDialect::Postgres.qualified(Some("public"), "t"), "\"public\".\"t\"");
        assert_eq!(SqlDialect::Sqlite.qualified(None, "t"), "\"t\"");
    }

    #[test]
    fn test_placeholders() {
        assert_eq!(SqlDialect::Postgres.placeholder(3), "$3");
        assert_eq!(SqlDialect::Sqlite.placeholder(3), "?");
    }

    #[test]
    fn test_display_values() {
        assert_eq!(display_value(&json!(null)), "NULL");
        assert_eq!(display_value(&json!("O'Brien")), "'O''Brien'");
        assert_eq!(display_value(&json!(42)), "42");
        assert_eq!(display_value(&json!(true)), "TRUE");
    }

    #[test]
    fn test_inline_for_display() {
        let params: Vec<_> = (1..=10).map(|i| json!(i)).collect();
        let sql = "VALUES ($1, $10)";
        assert_eq!(inline_for_display(SqlDialect::Postgres, sql, &params), "VALUES (1, 10)");
        assert_eq!(
            inline_for_display(SqlDialect::Sqlite, "SELECT ?, ?", &[json!("a"), json!(null)]),
            "SELECT 'a', NULL"
        );
    }
}
