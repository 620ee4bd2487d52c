//! Engine-independent SQL text handling.
//!
//! - `splitter` - StatementSplitter
//! - `placeholders` - `?` to `$n` rewriting
//! - `dialect` - identifier quoting and display literals

pub mod dialect;
pub mod placeholders;
mod scanner;
pub mod splitter;

pub use dialect::{display_value, inline_for_display, quote_literal, PlaceholderStyle, SqlDialect};
pub use placeholders::{count_question_marks, rewrite_question_marks};
pub use splitter::StatementSplitter;

use scanner::{Scanner, SpanKind};

/// First keyword of a statement, skipping whitespace, comments and opening
/// parentheses. Empty when the statement does not start with a word.
pub fn leading_keyword(sql: &str) -> &str {
    let start = Scanner::new(sql).find(|span| {
        span.kind == SpanKind::Code && {
            let text = &sql[span.start..span.end];
            !text.trim().is_empty() && text != "("
        }
    });

    match start {
        Some(span) => {
            let rest = &sql[span.start..];
            let end = rest.find(|c: char| !(c.is_alphanumeric() || c == '_')).unwrap_or(rest.len());
            &rest[..end]
        }
        None => "",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_leading_keyword() {
        assert_eq!(leading_keyword("  select 1"), "select");
        assert_eq!(leading_keyword("-- x\n/* y */ INSERT INTO t"), "INSERT");
        assert_eq!(leading_keyword("(SELECT 1) UNION (SELECT 2)"), "SELECT");
        assert_eq!(leading_keyword("'literal'"), "");
        assert_eq!(leading_keyword(""), "");
    }
}
