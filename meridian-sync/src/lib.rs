//! Merge engine and sync service for Meridian.
//!
//! Takes batches of serialized domain objects, from the local editor or a
//! remote repository, and merges them into the local store.
//!
//! # Architecture
//!
//! Conflicts are resolved by a strictly-later last-writer-wins rule on each
//! object's `mod_datetime`. There is no causal history: equal timestamps
//! keep the local state, and a locally deleted object stays deleted until
//! the user restores it from the trash.
//!
//! ## Components
//!
//! - **Engine**: orders a batch by type dependency and decides each record
//! - **Tombstones**: durable registry of local deletions, plus the trash
//! - **Caches**: assembly components, requirement allocations, parameter rollups
//! - **Invalidator**: refreshes only the cache roots a merge touched
//! - **Service**: single-writer wrapper with notifications and reconnect
//!
//! ## Merge process
//!
//! 1. **Filter**: drop records without identity or type, or of unknown type
//! 2. **Order**: stable-sort by type rank so referenced types come first
//! 3. **Decide**: reference data, tombstone and access gates, then timestamps
//! 4. **Commit**: one unit of work per batch, rolled back on any store error
//! 5. **Invalidate**: recompute affected cache roots and notify observers
//!
//! # Example
//!
//! ```
//! use meridian_model::{RefRequirement, SchemaCatalog, SerializedObject, TypeSchema};
//! use meridian_storage::MemoryStore;
//! use meridian_sync::{MergeEngine, MergeOptions, TombstoneRegistry};
//! use std::sync::Arc;
//!
//! let catalog = SchemaCatalog::new()
//!     .with_type(TypeSchema::new("Organization").scalar("name"))
//!     .with_type(
//!         TypeSchema::new("Project")
//!             .scalar("name")
//!             .reference("owner", "Organization", RefRequirement::HardRequired),
//!     );
//! let engine = MergeEngine::new(Arc::new(catalog)).unwrap();
//! let mut store = MemoryStore::new();
//! let tombstones = TombstoneRegistry::open_in_memory().unwrap();
//!
//! let batch = vec![
//!     SerializedObject::new("H1", "Project").with("owner", "O1"),
//!     SerializedObject::new("O1", "Organization").with("name", "ACME"),
//! ];
//! let outcome = engine
//!     .merge(batch, &mut store, &tombstones, &MergeOptions::default())
//!     .unwrap();
//! assert_eq!(outcome.created.len(), 2);
//! ```

mod cache;
mod config;
mod engine;
mod error;
mod invalidator;
mod outcome;
pub mod policy;
pub mod protocol;
pub mod remote;
mod service;
mod tombstone;

pub use cache::{Allocation, Component, DerivedCache, DerivedCaches};
pub use config::SyncConfig;
pub use engine::{MergeEngine, MergeOptions};
pub use error::{SyncError, SyncResult};
pub use invalidator::{CacheInvalidator, RefreshedRoots};
pub use outcome::{ChangeCategory, DropCounts, MergeOutcome, TaggedChange};
pub use policy::{AccessGate, AllowAll, ReadOnlyObjects};
pub use protocol::{LocalIntent, MergeEvent, MergeSource, RemoteCommand, MAX_BATCH_SIZE};
pub use remote::RemoteRepository;
pub use service::SyncService;
pub use tombstone::{Tombstone, TombstoneRegistry};
