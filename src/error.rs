//! Analysis-level error handling.

use std::fmt;

use thiserror::Error;

/// Pipeline stage a fatal error originated from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    /// Opening the repository and reading history.
    Repository,
    /// Reading source files for code-unit extraction.
    Extraction,
    /// Sentiment scoring.
    Classification,
    /// Statistics over scored commits.
    Aggregation,
    /// Final report assembly and persistence.
    Report,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Repository => "repository",
            Self::Extraction => "extraction",
            Self::Classification => "classification",
            Self::Aggregation => "aggregation",
            Self::Report => "report",
        };
        f.write_str(name)
    }
}

impl Stage {
    /// Context message attached to errors escaping this stage.
    pub fn failure_message(self) -> String {
        format!("{self} stage failed")
    }
}

/// Errors raised by the analysis pipeline outside the classifier.
#[derive(Error, Debug)]
pub enum AnalysisError {
    /// The path does not point at a git repository.
    #[error("Not a git repository: {path}")]
    RepositoryNotFound {
        /// Path that was tried.
        path: String,
    },

    /// A file could not be read as text at the requested commit.
    #[error("File unavailable: {path} ({reason})")]
    FileUnavailable {
        /// Repository-relative path.
        path: String,
        /// Why the file was rejected (binary, missing, not UTF-8).
        reason: String,
    },

    /// An internal report invariant does not hold.
    #[error("Malformed report: {0}")]
    MalformedReport(String),

    /// The run was cancelled before all classification finished.
    #[error("Analysis cancelled")]
    Cancelled,
}
