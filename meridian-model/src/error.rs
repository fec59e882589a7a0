//! Error types for the model layer.

use thiserror::Error;

/// Result type for model operations.
pub type ModelResult<T> = Result<T, ModelError>;

/// Errors raised while loading a catalog, resolving the type order, or
/// decoding a payload.
#[derive(Debug, Error)]
pub enum ModelError {
    /// Required foreign keys form a cycle between types. This is a schema
    /// defect and must stop startup.
    #[error("cyclic required-reference dependency among types: {}", types.join(", "))]
    CyclicDependency { types: Vec<String> },

    /// A type name was looked up that the catalog does not declare.
    #[error("unknown object type: {0}")]
    UnknownType(String),

    /// Catalog or payload JSON could not be parsed.
    #[error("schema error: {0}")]
    Schema(#[from] serde_json::Error),

    /// A payload had the wrong top-level shape.
    #[error("invalid payload: {0}")]
    Payload(String),
}
