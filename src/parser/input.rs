//! Types representing parsed targets and results.

use std::fmt;

use super::error::ParseError;

/// Kind of target detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    /// URL with a supported scheme
    Url,
    /// BitTorrent magnet link
    Magnet,
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Url => write!(f, "URL"),
            Self::Magnet => write!(f, "Magnet"),
        }
    }
}

/// A target accepted from the list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedTarget {
    /// 1-indexed source line
    pub line: usize,
    /// Detected kind
    pub kind: TargetKind,
    /// Target with quotes and whitespace stripped
    pub value: String,
}

impl fmt::Display for ParsedTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind, self.value)
    }
}

/// A line that was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedLine {
    /// 1-indexed source line
    pub line: usize,
    /// The line as written
    pub content: String,
    /// Why it was rejected
    pub error: ParseError,
}

impl fmt::Display for SkippedLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: {}", self.line, self.error)
    }
}

/// Collection of parsed targets.
#[derive(Debug, Default)]
pub struct ParseResult {
    /// Accepted targets, in input order
    pub items: Vec<ParsedTarget>,
    /// Rejected lines (for logging)
    pub skipped: Vec<SkippedLine>,
}

impl ParseResult {
    /// Creates a new empty result.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if no target was accepted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Returns count of accepted targets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns count of rejected lines.
    #[must_use]
    pub fn skipped_count(&self) -> usize {
        self.skipped.len()
    }

    /// Accepted target strings, in input order.
    #[must_use]
    pub fn targets(&self) -> Vec<String> {
        self.items.iter().map(|item| item.value.clone()).collect()
    }

    /// Appends another result, renumbering nothing.
    pub fn extend(&mut self, other: Self) {
        self.items.extend(other.items);
        self.skipped.extend(other.skipped);
    }
}

impl fmt::Display for ParseResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} target(s) parsed, {} skipped",
            self.len(),
            self.skipped_count()
        )
    }
}
