//! Core type definitions for Meridian.
//!
//! This crate defines the identity and clock types shared by every other
//! crate in the workspace:
//! - Object identities ([`Oid`])
//! - Modification timestamps used as the conflict-resolution key ([`ModDatetime`])
//!
//! Domain types (products, usages, requirements) are described by the schema
//! catalog in `meridian-model`, not here.

mod ids;
mod timestamp;

pub use ids::Oid;
pub use timestamp::ModDatetime;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in type operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid identity: {0:?}")]
    InvalidOid(String),

    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),
}
