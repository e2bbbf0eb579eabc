use std::fmt;

/// A position within a source text.
///
/// Offsets are byte offsets into the UTF-8 source. Lines and columns are
/// zero-based internally; the `Display` implementation adds one to both for
/// human-facing output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct SourceLocation {
    /// Byte offset from the start of the source.
    pub offset: usize,
    /// Zero-based line number.
    pub line: u32,
    /// Zero-based column, counted in bytes from the start of the line.
    pub column: u32,
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line + 1, self.column + 1)
    }
}

/// A half-open span of source text between two locations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct SourceRange {
    pub start: SourceLocation,
    pub end: SourceLocation,
}

impl SourceRange {
    #[must_use]
    pub fn new(start: SourceLocation, end: SourceLocation) -> Self {
        Self { start, end }
    }

    /// A zero-width range at a single location.
    #[must_use]
    pub fn at(location: SourceLocation) -> Self {
        Self { start: location, end: location }
    }

    /// The smallest range covering both `self` and `other`.
    #[must_use]
    pub fn union(self, other: Self) -> Self {
        let start = if other.start.offset < self.start.offset { other.start } else { self.start };
        let end = if other.end.offset > self.end.offset { other.end } else { self.end };
        Self { start, end }
    }
}

impl fmt::Display for SourceRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.start == self.end {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}-{}", self.start, self.end)
        }
    }
}
