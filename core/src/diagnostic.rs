//! Diagnostics and source positions.

use serde::{Deserialize, Serialize};

use crate::error::DockerfileError;

/// Inclusive range of 1-based physical line numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LineRange {
    pub start: usize,
    pub end: usize,
}

impl LineRange {
    pub fn new(start: usize, end: usize) -> Self {
        Self {
            start,
            end: end.max(start),
        }
    }

    /// A range covering one physical line.
    pub fn single(line: usize) -> Self {
        Self {
            start: line,
            end: line,
        }
    }

    /// Smallest range covering both `self` and `other`.
    pub fn merge(self, other: LineRange) -> Self {
        Self {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }

    pub fn contains(&self, line: usize) -> bool {
        (self.start..=self.end).contains(&line)
    }
}

impl std::fmt::Display for LineRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.start == self.end {
            write!(f, "line {}", self.start)
        } else {
            write!(f, "lines {}-{}", self.start, self.end)
        }
    }
}

/// Diagnostic severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
        }
    }
}

/// A structured diagnostic record. Rendering is left to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub severity: Severity,
    /// Stable rule or error name, e.g. `UndeclaredVariable`.
    pub code: String,
    pub message: String,
    /// `None` for document-level findings.
    pub lines: Option<LineRange>,
}

impl Diagnostic {
    pub fn warning(code: impl Into<String>, message: impl Into<String>, lines: LineRange) -> Self {
        Self {
            severity: Severity::Warning,
            code: code.into(),
            message: message.into(),
            lines: Some(lines),
        }
    }

    /// Record a fatal error as an error-severity diagnostic.
    pub fn from_error(error: &DockerfileError) -> Self {
        Self {
            severity: Severity::Error,
            code: error.code().to_string(),
            message: error.to_string(),
            lines: error.lines(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.lines {
            Some(lines) => write!(f, "{} [{}] {}: {}", self.severity, self.code, lines, self.message),
            None => write!(f, "{} [{}] {}", self.severity, self.code, self.message),
        }
    }
}
