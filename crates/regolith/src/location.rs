//! Source buffers and byte-span locations.
//!
//! Every AST node and every diagnostic carries a [`Location`]: a shared
//! source buffer plus a byte offset and length. Compiled bundles keep their
//! module sources alive so diagnostics emitted at evaluation time can still
//! point into policy text.

use std::fmt;
use std::sync::Arc;

/// A named source buffer (a module file, a data document, or a query).
#[derive(Debug)]
pub struct Source {
    origin: String,
    text: String,
    /// Byte offsets of line starts, for row/column resolution.
    line_starts: Vec<usize>,
}

impl Source {
    pub fn new(origin: impl Into<String>, text: impl Into<String>) -> Arc<Self> {
        let text = text.into();
        let mut line_starts = vec![0];
        for (i, b) in text.bytes().enumerate() {
            if b == b'\n' {
                line_starts.push(i + 1);
            }
        }
        Arc::new(Self {
            origin: origin.into(),
            text,
            line_starts,
        })
    }

    /// A source with no backing file, used for synthesized nodes.
    pub fn synthetic() -> Arc<Self> {
        Self::new("<synthetic>", "")
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Resolves a byte offset to a 1-based (row, column) pair.
    pub fn row_col(&self, offset: usize) -> (usize, usize) {
        let row = match self.line_starts.binary_search(&offset) {
            Ok(idx) => idx,
            Err(idx) => idx - 1,
        };
        (row + 1, offset - self.line_starts[row] + 1)
    }
}

/// A byte span inside a [`Source`].
#[derive(Clone)]
pub struct Location {
    pub source: Arc<Source>,
    pub pos: usize,
    pub len: usize,
}

impl Location {
    pub fn new(source: Arc<Source>, pos: usize, len: usize) -> Self {
        Self { source, pos, len }
    }

    /// An empty span into an empty synthetic source.
    pub fn synthetic() -> Self {
        Self {
            source: Source::synthetic(),
            pos: 0,
            len: 0,
        }
    }

    /// The source text covered by this span.
    pub fn view(&self) -> &str {
        let end = (self.pos + self.len).min(self.source.text().len());
        &self.source.text()[self.pos.min(end)..end]
    }

    /// 1-based (row, column) of the span start.
    pub fn row_col(&self) -> (usize, usize) {
        self.source.row_col(self.pos)
    }

    pub fn origin(&self) -> &str {
        self.source.origin()
    }
}

impl fmt::Debug for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (row, col) = self.row_col();
        write!(f, "{}:{row}:{col}", self.source.origin())
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (row, col) = self.row_col();
        write!(f, "{}:{row}:{col}", self.source.origin())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_col_resolution() {
        let source = Source::new("test.rego", "package p\n\nx := 1\n");
        assert_eq!(source.row_col(0), (1, 1));
        assert_eq!(source.row_col(8), (1, 9));
        assert_eq!(source.row_col(11), (3, 1));
        assert_eq!(source.row_col(16), (3, 6));
    }

    #[test]
    fn location_view() {
        let source = Source::new("test.rego", "package p");
        let loc = Location::new(source, 8, 1);
        assert_eq!(loc.view(), "p");
        assert_eq!(loc.row_col(), (1, 9));
    }
}
