//! Error types for the storage layer.

use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur in storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Database error from SQLite.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Object not found.
    #[error("object not found: {0}")]
    NotFound(String),

    /// Create called for an identity that already exists.
    #[error("object already exists: {0}")]
    AlreadyExists(String),

    /// A write was attempted outside a unit of work.
    #[error("no unit of work in progress")]
    NoUnitOfWork,

    /// `begin_unit_of_work` was called while one is open.
    #[error("a unit of work is already in progress")]
    UnitOfWorkActive,

    /// IO error (file system).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid data.
    #[error("invalid data: {0}")]
    InvalidData(String),
}
