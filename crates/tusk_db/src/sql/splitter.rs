//! Statement splitting.

use super::scanner::{Scanner, SpanKind};

/// Splits SQL scripts on top-level semicolons.
///
/// Semicolons inside quotes, quoted identifiers, dollar-quoted bodies and
/// comments are ignored. A segment counts as a statement only if it has
/// content other than whitespace and comments.
///
/// Dollar quoting is recognised on every engine. A `$tag$` opens a body that
/// runs to the matching tag, or to the end of the script when the tag never
/// closes, so `SELECT $$; SELECT 1` is one statement. SQLite has no dollar
/// quoting and would see two.
pub struct StatementSplitter;

impl StatementSplitter {
    /// Whether `sql` holds two or more statements.
    ///
    /// A single trailing terminator does not make a script multi-statement.
    pub fn has_multiple_statements(sql: &str) -> bool {
        let mut statements = 0;
        let mut has_content = false;

        for span in Scanner::new(sql) {
            match span.kind {
                SpanKind::Comment => {}
                SpanKind::Code if &sql[span.start..span.end] == ";" => {
                    if has_content {
                        statements += 1;
                        has_content = false;
                    }
                }
                SpanKind::Code => {
                    if !sql[span.start..span.end].trim().is_empty() {
                        if statements >= 1 {
                            return true;
                        }
                        has_content = true;
                    }
                }
                SpanKind::Quoted => {
                    if statements >= 1 {
                        return true;
                    }
                    has_content = true;
                }
            }
        }

        false
    }

    /// The statements in `sql`, trimmed, without their terminators.
    pub fn split(sql: &str) -> Vec<String> {
        let mut statements = Vec::new();
        let mut segment_start = 0;
        let mut has_content = false;

        for span in Scanner::new(sql) {
            match span.kind {
                SpanKind::Comment => {}
                SpanKind::Code if &sql[span.start..span.end] == ";" => {
                    if has_content {
                        statements.push(sql[segment_start..span.start].trim().to_string());
                    }
                    segment_start = span.end;
                    has_content = false;
                }
                SpanKind::Code => {
                    if !sql[span.start..span.end].trim().is_empty() {
                        has_content = true;
                    }
                }
                SpanKind::Quoted => has_content = true,
            }
        }

        if has_content {
            statements.push(sql[segment_start..].trim().to_string());
        }
        statements
    }
}
