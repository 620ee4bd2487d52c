//! Lexical scanner shared by the splitter and placeholder rewriter.
//!
//! Splits SQL text into spans of plain code (one character each), quoted
//! text (string literals, quoted identifiers, dollar-quoted bodies) and
//! comments. The same rules apply to every engine's SQL.

/// What a span of SQL text is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SpanKind {
    /// A single character outside any quote or comment.
    Code,
    /// A complete quoted section, delimiters included.
    Quoted,
    /// A line or block comment, delimiters included.
    Comment,
}

/// A span of the input, as byte offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Span {
    pub kind: SpanKind,
    pub start: usize,
    pub end: usize,
}

/// Iterator over the spans of a SQL string.
///
/// Unterminated quotes and comments run to the end of the input.
pub(crate) struct Scanner<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Scanner<'a> {
    pub fn new(src: &'a str) -> Self {
        Self { src, pos: 0 }
    }

    /// End offset of a quoted section opened at `start` by `quote`.
    /// A doubled quote character is an escaped literal.
    fn quoted_end(&self, start: usize, quote: char) -> usize {
        let bytes = self.src.as_bytes();
        let q = quote as u8;
        let mut i = start + 1;
        while i < bytes.len() {
            if bytes[i] == q {
                if bytes.get(i + 1) == Some(&q) {
                    i += 2;
                    continue;
                }
                return i + 1;
            }
            i += 1;
        }
        bytes.len()
    }

    /// The `$tag$` opener at `start`, if there is one.
    fn dollar_tag(&self, start: usize) -> Option<&'a str> {
        // `a$b` is an identifier, not a tag.
        if let Some(prev) = self.src[..start].chars().next_back() {
            if prev.is_alphanumeric() || prev == '_' || prev == '$' {
                return None;
            }
        }

        let rest = &self.src[start + 1..];
        let tag_len = rest.find(|c: char| !(c.is_alphanumeric() || c == '_'))?;
        if !rest[tag_len..].starts_with('$') {
            return None;
        }
        // `$1` is a positional parameter.
        if rest[..tag_len].starts_with(|c: char| c.is_ascii_digit()) {
            return None;
        }
        Some(&self.src[start..start + tag_len + 2])
    }
}

impl Iterator for Scanner<'_> {
    type Item = Span;

    fn next(&mut self) -> Option<Span> {
        let start = self.pos;
        let rest = self.src.get(start..)?;
        let ch = rest.chars().next()?;

        let (kind, end) = if rest.starts_with("--") {
            let end = rest.find('\n').map_or(self.src.len(), |i| start + i);
            (SpanKind::Comment, end)
        } else if rest.starts_with("/*") {
            let end = rest[2..].find("*/").map_or(self.src.len(), |i| start + 2 + i + 2);
            (SpanKind::Comment, end)
        } else if matches!(ch, '\'' | '"' | '`') {
            (SpanKind::Quoted, self.quoted_end(start, ch))
        } else if let Some(tag) = (ch == '$').then(|| self.dollar_tag(start)).flatten() {
            let body = start + tag.len();
            let end = self.src[body..].find(tag).map_or(self.src.len(), |i| body + i + tag.len());
            (SpanKind::Quoted, end)
        } else {
            (SpanKind::Code, start + ch.len_utf8())
        };

        self.pos = end;
        Some(Span { kind, start, end })
    }
}
