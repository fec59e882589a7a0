//! Messages crossing the sync service boundary.
//!
//! Inbound: local editor intents and opaque remote payloads.
//! Outbound: merge notifications to observers and commands to the remote
//! repository.

use crate::invalidator::RefreshedRoots;
use crate::outcome::MergeOutcome;
use meridian_model::SerializedObject;
use meridian_types::Oid;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Maximum number of objects requested from the remote in one fetch.
pub const MAX_BATCH_SIZE: usize = 100;

/// An edit made by the local user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LocalIntent {
    /// Create or update an object. The editor stamps `mod_datetime`.
    Upsert(SerializedObject),
    /// Delete an object (and its hard-required dependents).
    Delete(Oid),
}

/// Where a batch came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeSource {
    Local,
    Remote,
    Restore,
}

/// Published after every committed merge or deletion.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MergeEvent {
    pub source: MergeSource,
    pub created: BTreeSet<Oid>,
    pub updated: BTreeSet<Oid>,
    pub rejected: BTreeSet<Oid>,
    pub deleted: BTreeSet<Oid>,
    pub refreshed_cache_roots: RefreshedRoots,
}

impl MergeEvent {
    pub(crate) fn from_outcome(
        source: MergeSource,
        outcome: &MergeOutcome,
        refreshed: RefreshedRoots,
    ) -> Self {
        Self {
            source,
            created: outcome.created.clone(),
            updated: outcome.updated.clone(),
            rejected: outcome.rejected.clone(),
            deleted: BTreeSet::new(),
            refreshed_cache_roots: refreshed,
        }
    }

    pub(crate) fn from_deletion(deleted: BTreeSet<Oid>, refreshed: RefreshedRoots) -> Self {
        Self {
            source: MergeSource::Local,
            created: BTreeSet::new(),
            updated: BTreeSet::new(),
            rejected: BTreeSet::new(),
            deleted,
            refreshed_cache_roots: refreshed,
        }
    }
}

/// Sent to the remote repository while connected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RemoteCommand {
    /// Delete these objects remotely.
    Delete(Vec<Oid>),
}
