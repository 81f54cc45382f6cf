use crate::Spanned;
use serde::{Deserialize, Serialize};
use std::{fmt, path::PathBuf, sync::Arc};

/// A 1-based line/column position inside a source file.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LineCol {
    pub line: usize,
    pub col: usize,
}

impl fmt::Display for LineCol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.col)
    }
}

/// A region of a source file. The whole source is kept alive behind an `Arc`,
/// so cloning a span is cheap and `as_str` needs no allocation.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Span {
    src: Arc<str>,
    start: usize,
    end: usize,
    path: Option<Arc<PathBuf>>,
}

impl Span {
    pub fn new(src: Arc<str>, start: usize, end: usize, path: Option<Arc<PathBuf>>) -> Option<Span> {
        src.get(start..end)?;
        Some(Span {
            src,
            start,
            end,
            path,
        })
    }

    /// An empty span pointing at nothing, for synthesized constructs.
    pub fn dummy() -> Span {
        Span {
            src: "".into(),
            start: 0,
            end: 0,
            path: None,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.src[self.start..self.end]
    }

    pub fn src(&self) -> &Arc<str> {
        &self.src
    }

    pub fn start(&self) -> usize {
        self.start
    }

    pub fn end(&self) -> usize {
        self.end
    }

    pub fn path(&self) -> Option<&Arc<PathBuf>> {
        self.path.as_ref()
    }

    pub fn is_dummy(&self) -> bool {
        self.src.is_empty() && self.start == 0 && self.end == 0
    }

    pub fn join(lhs: &Span, rhs: &Span) -> Span {
        assert!(Arc::ptr_eq(&lhs.src, &rhs.src));
        assert_eq!(lhs.path, rhs.path);
        Span {
            src: lhs.src.clone(),
            start: lhs.start.min(rhs.start),
            end: lhs.end.max(rhs.end),
            path: lhs.path.clone(),
        }
    }

    /// Line/column of the start of this span. Lines are counted with
    /// `bytecount` over the prefix, columns in chars since the last newline.
    pub fn start_pos(&self) -> LineCol {
        let prefix = &self.src[..self.start];
        let line = bytecount::count(prefix.as_bytes(), b'\n') + 1;
        let col = prefix
            .chars()
            .rev()
            .take_while(|c| *c != '\n')
            .count()
            + 1;
        LineCol { line, col }
    }

    /// 1-based line number of the start of this span.
    pub fn start_line(&self) -> usize {
        self.start_pos().line
    }

    /// Shrink the span on both sides so it covers no surrounding whitespace.
    pub fn trim(self) -> Span {
        let text = self.as_str();
        let trimmed_start = text.len() - text.trim_start().len();
        let trimmed_end = text.trim_end().len() + trimmed_start;
        Span {
            src: self.src,
            start: self.start + trimmed_start,
            end: self.start + trimmed_end,
            path: self.path,
        }
    }
}

impl Spanned for Span {
    fn span(&self) -> Span {
        self.clone()
    }
}

impl fmt::Debug for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Span")
            .field("start", &self.start)
            .field("end", &self.end)
            .field("as_str", &self.as_str())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_pos_counts_lines_and_columns() {
        let src: Arc<str> = "let a = 1\nlet b = 2\n".into();
        let span = Span::new(src.clone(), 14, 15, None).unwrap();
        assert_eq!(span.as_str(), "b");
        assert_eq!(span.start_pos(), LineCol { line: 2, col: 5 });
    }

    #[test]
    fn dummy_span_is_line_one() {
        assert_eq!(Span::dummy().start_pos(), LineCol { line: 1, col: 1 });
        assert!(Span::dummy().is_dummy());
    }

    #[test]
    fn trim_strips_whitespace() {
        let src: Arc<str> = "  name  ".into();
        let span = Span::new(src, 0, 8, None).unwrap().trim();
        assert_eq!(span.as_str(), "name");
    }
}
