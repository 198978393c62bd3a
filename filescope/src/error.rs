//! Error types for characterization.
//!
//! Only [`ContractViolation`] ever escapes [`crate::Scraper::characterize`].
//! Everything that can go wrong with a *file* ends up as text in the result.

use std::io;
use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

/// Why a checker could not do its job.
///
/// Checkers convert these into entries of their error list; they never
/// propagate past the checker that produced them.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CheckerFailure {
    #[error("{tool} could not be started: {source}")]
    ToolNotFound {
        tool: String,
        #[source]
        source: io::Error,
    },
    #[error("{tool} exited abnormally ({status}): {stderr}")]
    ToolFailed {
        tool: String,
        status: String,
        stderr: String,
    },
    #[error("Error when reading the file: {0}")]
    Io(#[from] io::Error),
    #[error("Could not parse {tool} output: {message}")]
    Parse { tool: String, message: String },
}

/// A checker broke the result contract. This is a plugin bug, not a file
/// problem, and aborts the characterization of the current file.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum ContractViolation {
    #[error("checker {checker} reported stream index {index} more than once")]
    DuplicateStreamIndex { checker: String, index: usize },
    #[error("checker {expected} returned a result labelled {found}")]
    UnknownChecker { expected: String, found: String },
}

/// Configuration file problems.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("Failed to read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Failed to parse config file {}: {message}", path.display())]
    Parse { path: PathBuf, message: String },
    #[error("Failed to expand path '{value}': {message}")]
    Expand { value: String, message: String },
}

/// The kind of discovery-level failure that kept a file out of a batch run.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[non_exhaustive]
pub enum SourceErrorKind {
    /// An I/O error occurred while resolving the path.
    IoError,
    /// A directory traversal error (permission denied, loop detected, etc.).
    WalkError,
    /// The resolved path is outside the scan root (symlink escape).
    OutsideRoot,
    /// An exclude glob pattern could not be parsed.
    InvalidExcludePattern,
    /// The `max_files` limit was reached, truncating the run.
    LimitExceeded,
    /// A checker broke the result contract while processing the file.
    ContractViolation,
}

/// A file that could not be characterized at all during a batch run.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[non_exhaustive]
pub struct SourceError {
    pub file: PathBuf,
    pub kind: SourceErrorKind,
    pub message: String,
}

impl SourceError {
    #[must_use]
    pub fn new(file: PathBuf, kind: SourceErrorKind, message: impl Into<String>) -> Self {
        Self {
            file,
            kind,
            message: message.into(),
        }
    }

    /// Format the error for human-readable output.
    #[must_use]
    pub fn format_human_readable(&self) -> String {
        format!("{}: [source error] {}", self.file.display(), self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_not_found_message() {
        let err = CheckerFailure::ToolNotFound {
            tool: "jhove".to_owned(),
            source: io::Error::new(io::ErrorKind::NotFound, "No such file or directory"),
        };
        assert_eq!(
            err.to_string(),
            "jhove could not be started: No such file or directory"
        );
    }

    #[test]
    fn test_source_error_human_readable() {
        let err = SourceError::new(
            PathBuf::from("data/a.pdf"),
            SourceErrorKind::WalkError,
            "Directory traversal error: permission denied",
        );
        let formatted = err.format_human_readable();
        assert!(formatted.starts_with("data/a.pdf: [source error]"));
        assert!(formatted.contains("permission denied"));
    }
}
