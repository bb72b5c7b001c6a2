//! Error types for the graph crate.

use rusqlite::ErrorCode;
use thiserror::Error;

/// Errors raised by graph stores and the loader.
#[derive(Debug, Error)]
pub enum GraphError {
    /// The store could not be opened or reached (locked, busy, unreadable).
    #[error("Connection error: {0}")]
    Connection(String),

    /// A write broke a store constraint, or required constraints are missing.
    #[error("Schema violation: {0}")]
    SchemaViolation(String),

    /// Any other database failure.
    #[error("Database error: {0}")]
    Database(rusqlite::Error),

    /// Property maps could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Stored data is not in the expected shape.
    #[error("Invalid data: {0}")]
    InvalidData(String),
}

impl GraphError {
    /// Short machine-readable category, reported in load results.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Connection(_) => "connection",
            Self::SchemaViolation(_) => "schema_violation",
            Self::Database(_) => "database",
            Self::Serialization(_) => "serialization",
            Self::InvalidData(_) => "invalid_data",
        }
    }

    pub fn is_connectivity(&self) -> bool {
        matches!(self, Self::Connection(_))
    }
}

impl From<rusqlite::Error> for GraphError {
    fn from(err: rusqlite::Error) -> Self {
        match err.sqlite_error_code() {
            Some(
                ErrorCode::CannotOpen
                | ErrorCode::DatabaseBusy
                | ErrorCode::DatabaseLocked
                | ErrorCode::NotADatabase
                | ErrorCode::SystemIoFailure
                | ErrorCode::PermissionDenied,
            ) => Self::Connection(err.to_string()),
            Some(ErrorCode::ConstraintViolation) => Self::SchemaViolation(err.to_string()),
            _ => Self::Database(err),
        }
    }
}

/// Result type alias for graph operations.
pub type Result<T> = std::result::Result<T, GraphError>;
