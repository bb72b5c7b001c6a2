//! Error types for interchange and dataset files.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using the aggregate error type.
pub type Result<T> = std::result::Result<T, AggregateError>;

/// Failures reading or writing session files.
///
/// Per-message extraction failures never surface here; they degrade to
/// empty records.
#[derive(Debug, Error)]
pub enum AggregateError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The file holds no recognisable top-level structure.
    #[error("Invalid format: {0}")]
    Format(String),

    #[error("Invalid dataset: {0}")]
    Dataset(String),
}

impl AggregateError {
    pub(crate) fn read(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Read {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn write(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Write {
            path: path.into(),
            source,
        }
    }
}
