use std::ops::Range;

/// A byte range inside an AST source file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Span {
    pub start: u32,
    pub end: u32,
}

impl Span {
    pub fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }

    pub fn dummy() -> Self {
        Self { start: 0, end: 0 }
    }

    pub fn is_dummy(&self) -> bool {
        self.start == 0 && self.end == 0
    }

    /// Span of the single character at a 1-based `line`/`column` pair, the
    /// convention `serde_json` reports errors in. Positions past the end of
    /// the source clamp to the last byte.
    pub fn at_line_col(source: &str, line: usize, column: usize) -> Self {
        let mut offset = 0usize;
        for (idx, text) in source.split_inclusive('\n').enumerate() {
            if idx + 1 == line {
                let col = column.saturating_sub(1).min(text.len());
                offset += col;
                break;
            }
            offset += text.len();
        }
        let start = offset.min(source.len().saturating_sub(1));
        let end = (start + 1).min(source.len());
        Self::new(start as u32, end as u32)
    }

    pub fn range(&self) -> Range<usize> {
        self.start as usize..self.end as usize
    }

    pub fn merge(self, other: Span) -> Span {
        Span {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_at_line_col_first_line() {
        let span = Span::at_line_col("{\"kind\": 3}", 1, 10);
        assert_eq!(span, Span::new(9, 10));
    }

    #[test]
    fn test_at_line_col_later_line() {
        let src = "{\n  \"kind\":\n  oops\n}";
        let span = Span::at_line_col(src, 3, 3);
        assert_eq!(&src[span.range()], "o");
    }

    #[test]
    fn test_at_line_col_clamps_past_end() {
        let src = "{}";
        let span = Span::at_line_col(src, 9, 9);
        assert_eq!(span, Span::new(1, 2));
    }

    #[test]
    fn test_merge() {
        let merged = Span::new(4, 6).merge(Span::new(1, 5));
        assert_eq!(merged, Span::new(1, 6));
        assert!(!merged.is_dummy());
        assert!(Span::dummy().is_dummy());
    }
}
