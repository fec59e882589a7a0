//! Error types for the sync layer.

use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur in sync operations.
///
/// Per-record problems (malformed input, unknown types, rejections) are
/// reported in the merge outcome, not here.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The batch's unit of work failed and was rolled back.
    #[error("store commit failed, batch rolled back: {0}")]
    StoreCommit(#[source] meridian_storage::StorageError),

    /// Store error outside a merge unit of work.
    #[error("storage error: {0}")]
    Storage(#[from] meridian_storage::StorageError),

    /// Tombstone registry error.
    #[error("tombstone registry error: {0}")]
    Tombstone(#[from] rusqlite::Error),

    /// Catalog or ordering error.
    #[error("model error: {0}")]
    Model(#[from] meridian_model::ModelError),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error (config, cache snapshots).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Channel closed.
    #[error("channel closed")]
    ChannelClosed,

    /// Remote repository error.
    #[error("remote error: {0}")]
    Remote(String),
}
