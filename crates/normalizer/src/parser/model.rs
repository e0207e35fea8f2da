use std::fmt;

use thiserror::Error;

use super::record::Record;

/// Result tag delivered with every completed logical line.
#[derive(Debug, Clone, PartialEq)]
pub enum ParseOutcome {
    /// Record present and finalized, or absent when a pattern dropped it.
    Success,
    /// The line was empty; no record.
    Empty,
    /// No pattern matched, or matching was disabled or exhausted; the record
    /// is the raw fallback.
    NotFound,
    /// Processing failed; the record is whatever was built before the failure.
    Failed(ParseError),
}

impl ParseOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParseOutcome::Success => "success",
            ParseOutcome::Empty => "empty",
            ParseOutcome::NotFound => "not_found",
            ParseOutcome::Failed(_) => "failed",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ParseOutcome::Success)
    }
}

impl fmt::Display for ParseOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseOutcome::Failed(e) => write!(f, "failed: {}", e),
            other => f.write_str(other.as_str()),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error("Line too large: {0} bytes (max: {1} bytes)")]
    LineTooLarge(usize, usize),

    #[error("Parser panic: {0}")]
    ParserPanic(String),
}

/// One completed logical line: its source, outcome and optional record.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedLine {
    pub source: String,
    pub outcome: ParseOutcome,
    pub record: Option<Record>,
}

impl ParsedLine {
    pub fn new(source: impl Into<String>, outcome: ParseOutcome, record: Option<Record>) -> Self {
        Self {
            source: source.into(),
            outcome,
            record,
        }
    }
}

/// Result of trying a single pattern against a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchOutcome {
    NoMatch,
    Matched,
    /// Structurally matched, but a predicate or filter asked to discard it.
    MatchedAndDropped,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_labels() {
        assert_eq!(ParseOutcome::Success.as_str(), "success");
        assert_eq!(ParseOutcome::NotFound.to_string(), "not_found");
        let failed = ParseOutcome::Failed(ParseError::LineTooLarge(10, 5));
        assert_eq!(
            failed.to_string(),
            "failed: Line too large: 10 bytes (max: 5 bytes)"
        );
        assert!(!failed.is_success());
    }
}
