//! Store adapters for Meridian.
//!
//! The merge engine never talks to a database directly. It goes through the
//! [`ObjectStore`] trait, which exposes existence checks, reads, and writes
//! grouped into a unit of work that commits or rolls back as a whole.
//!
//! # Implementations
//!
//! - [`MemoryStore`] keeps committed objects in a map and stages writes in a
//!   second map until commit. Used by tests and by hosts with their own
//!   persistence.
//! - [`SqliteStore`] stores objects as JSON rows plus a reference index used
//!   to answer inverse-relation queries; a unit of work is a SQLite
//!   transaction.

mod adapter;
mod error;
mod memory;
mod sqlite;

pub use adapter::ObjectStore;
pub use error::{StorageError, StorageResult};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
