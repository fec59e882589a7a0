//! Remote repository boundary used on reconnect.

use crate::error::SyncResult;
use async_trait::async_trait;
use meridian_model::SerializedObject;
use meridian_types::Oid;
use std::collections::BTreeSet;

/// The shared repository the local store syncs against.
#[async_trait]
pub trait RemoteRepository: Send + Sync {
    /// Identities of every object the user owns remotely.
    async fn owned_oids(&self, user: &str) -> SyncResult<BTreeSet<Oid>>;

    /// Serialized state of the given objects. Unknown identities are skipped.
    async fn fetch_objects(&self, oids: &[Oid]) -> SyncResult<Vec<SerializedObject>>;
}
