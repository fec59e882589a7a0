//! Object model for Meridian.
//!
//! Defines the types every other Meridian subsystem agrees on:
//! - [`SchemaCatalog`]: per-type field declarations, foreign keys and their
//!   requirement level, inverse relations, and the structural role a type
//!   plays for the derived caches
//! - [`DomainObject`]: the stored form of an object
//! - [`SerializedObject`]: the flat wire/at-rest form consumed by a merge
//! - [`TypeOrder`]: the dependency order types are merged in
//!
//! The catalog is supplied by an external registry; this crate only reads it.

mod error;
mod object;
mod order;
mod schema;
mod serialized;

pub use error::{ModelError, ModelResult};
pub use object::{DomainObject, ValueRecord};
pub use order::TypeOrder;
pub use schema::{
    FieldKind, FieldSchema, RefRequirement, SchemaCatalog, StructuralRole, TypeSchema,
};
pub use serialized::{
    decode_batch, DecodedBatch, SerializedObject, DATA_ELEMENTS_KEY, MOD_DATETIME_KEY, OID_KEY,
    PARAMETERS_KEY, TYPE_KEY,
};
