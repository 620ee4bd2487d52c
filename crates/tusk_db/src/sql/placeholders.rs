//! Positional placeholder rewriting.

use super::scanner::{Scanner, SpanKind};

/// Rewrite `?` markers to `$1..$N`, in order of appearance.
///
/// Markers inside quotes, comments and dollar-quoted bodies are left alone.
pub fn rewrite_question_marks(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len() + 8);
    let mut index = 0;

    for span in Scanner::new(sql) {
        let text = &sql[span.start..span.end];
        if span.kind == SpanKind::Code && text == "?" {
            index += 1;
            out.push('$');
            out.push_str(&index.to_string());
        } else {
            out.push_str(text);
        }
    }
    out
}

/// Number of `?` markers outside quotes and comments.
pub fn count_question_marks(sql: &str) -> usize {
    Scanner::new(sql)
        .filter(|s| s.kind == SpanKind::Code && &sql[s.start..s.end] == "?")
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rewrites_in_order() {
        assert_eq!(
            rewrite_question_marks("SELECT * FROM users WHERE id = ? AND name = ?"),
            "SELECT * FROM users WHERE id = $1 AND name = $2"
        );
    }

    #[test]
    fn test_skips_literals_and_comments() {
        assert_eq!(
            rewrite_question_marks("SELECT '?', \"?\" FROM t WHERE a = ? -- ?\n AND b = ?"),
            "SELECT '?', \"?\" FROM t WHERE a = $1 -- ?\n AND b = $2"
        );
        assert_eq!(count_question_marks("SELECT $$?$$, ?"), 1);
    }

    #[test]
    fn test_no_markers_is_unchanged() {
        let sql = "SELECT $1::int";
        assert_eq!(rewrite_question_marks(sql), sql);
        assert_eq!(count_question_marks(sql), 0);
    }
}
