//! The sync service: single writer over store, tombstones and caches.
//!
//! Every mutation takes the same lock and runs to completion (store commit
//! and cache invalidation) before the next one starts. Observers learn about
//! committed work through a broadcast channel.

use crate::cache::DerivedCaches;
use crate::config::SyncConfig;
use crate::engine::{MergeEngine, MergeOptions};
use crate::error::{SyncError, SyncResult};
use crate::invalidator::{CacheInvalidator, RefreshedRoots};
use crate::outcome::MergeOutcome;
use crate::protocol::{LocalIntent, MergeEvent, MergeSource, RemoteCommand, MAX_BATCH_SIZE};
use crate::remote::RemoteRepository;
use crate::tombstone::{Tombstone, TombstoneRegistry};
use meridian_model::{DomainObject, SchemaCatalog, SerializedObject};
use meridian_storage::ObjectStore;
use meridian_types::Oid;
use std::collections::{BTreeSet, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, Mutex};
use tracing::{debug, info, warn};

/// State guarded by the service lock.
struct Inner {
    engine: MergeEngine,
    store: Box<dyn ObjectStore>,
    tombstones: TombstoneRegistry,
    caches: DerivedCaches,
    invalidator: CacheInvalidator,
    /// A refresh failed after a commit; the next write rebuilds instead.
    caches_stale: bool,
    /// Outbound channel while connected.
    outbound: Option<mpsc::Sender<RemoteCommand>>,
}

impl Inner {
    /// Brings the caches in line with a write that is already committed, so
    /// it never fails: an incremental refresh that errors falls back to a
    /// full rebuild, and a failed rebuild leaves the caches marked stale.
    fn refresh_caches<F>(&mut self, incremental: F) -> RefreshedRoots
    where
        F: FnOnce(
            &CacheInvalidator,
            &mut DerivedCaches,
            &dyn ObjectStore,
        ) -> SyncResult<RefreshedRoots>,
    {
        if !self.caches_stale {
            match incremental(&self.invalidator, &mut self.caches, self.store.as_ref()) {
                Ok(refreshed) => return refreshed,
                Err(e) => warn!("incremental cache refresh failed, rebuilding: {e}"),
            }
        }
        match self
            .invalidator
            .rebuild_all(&mut self.caches, self.store.as_ref())
        {
            Ok(refreshed) => {
                self.caches_stale = false;
                refreshed
            }
            Err(e) => {
                warn!("cache rebuild failed, caches stale until the next write: {e}");
                self.caches_stale = true;
                RefreshedRoots::default()
            }
        }
    }
}

/// Serializes merges, deletions and reconciliation over one local store.
pub struct SyncService {
    inner: Mutex<Inner>,
    events: broadcast::Sender<MergeEvent>,
    options: MergeOptions,
    cache_dir: Option<PathBuf>,
}

impl SyncService {
    /// Builds a service from configuration: resolves the type order, opens
    /// the tombstone registry and loads (or rebuilds) the caches.
    pub fn open(
        catalog: SchemaCatalog,
        store: Box<dyn ObjectStore>,
        config: &SyncConfig,
    ) -> SyncResult<Self> {
        let engine = MergeEngine::new(Arc::new(catalog))?
            .with_reference_oids(config.reference_oids.iter().cloned());
        let tombstones = match &config.tombstone_path {
            Some(path) => TombstoneRegistry::open(path)?,
            None => TombstoneRegistry::open_in_memory()?,
        };
        Self::new(engine, store, tombstones, config)
    }

    /// Builds a service from parts.
    pub fn new(
        engine: MergeEngine,
        store: Box<dyn ObjectStore>,
        tombstones: TombstoneRegistry,
        config: &SyncConfig,
    ) -> SyncResult<Self> {
        let invalidator = CacheInvalidator::new(Arc::clone(engine.catalog()));
        let loaded = match &config.cache_dir {
            Some(dir) => DerivedCaches::load(dir)?,
            None => None,
        };
        let caches = match loaded {
            Some(caches) => caches,
            None => {
                let mut caches = DerivedCaches::new();
                invalidator.rebuild_all(&mut caches, store.as_ref())?;
                caches
            }
        };
        let (events, _) = broadcast::channel(config.event_buffer.max(1));
        info!(
            types = engine.order().len(),
            "sync service ready ({} objects)",
            store.oids()?.len()
        );
        Ok(Self {
            inner: Mutex::new(Inner {
                engine,
                store,
                tombstones,
                caches,
                invalidator,
                caches_stale: false,
                outbound: None,
            }),
            events,
            options: config.merge_options(),
            cache_dir: config.cache_dir.clone(),
        })
    }

    /// Receives a [`MergeEvent`] for every committed merge or deletion.
    pub fn subscribe(&self) -> broadcast::Receiver<MergeEvent> {
        self.events.subscribe()
    }

    fn publish(&self, event: MergeEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }

    // ── Merging ──────────────────────────────────────────────────

    /// Merges a batch received from the remote repository.
    pub async fn merge_batch(&self, batch: Vec<SerializedObject>) -> SyncResult<MergeOutcome> {
        self.merge_from(MergeSource::Remote, batch).await
    }

    /// Decodes and merges an opaque transport payload.
    pub async fn merge_payload(&self, payload: &[u8]) -> SyncResult<MergeOutcome> {
        let mut inner = self.inner.lock().await;
        let Inner {
            engine,
            store,
            tombstones,
            ..
        } = &mut *inner;
        let outcome = engine.merge_payload(payload, store.as_mut(), tombstones, &self.options)?;
        Ok(self.finish(&mut inner, MergeSource::Remote, outcome))
    }

    /// Applies a local create or update.
    pub async fn upsert(&self, record: SerializedObject) -> SyncResult<MergeOutcome> {
        self.merge_from(MergeSource::Local, vec![record]).await
    }

    /// Dispatches an editor intent.
    pub async fn apply_intent(&self, intent: LocalIntent) -> SyncResult<()> {
        match intent {
            LocalIntent::Upsert(record) => {
                self.upsert(record).await?;
            }
            LocalIntent::Delete(oid) => {
                self.delete(&oid).await?;
            }
        }
        Ok(())
    }

    /// Applies intents until the sender side is dropped.
    pub async fn run_intents(&self, mut intents: mpsc::Receiver<LocalIntent>) -> SyncResult<()> {
        while let Some(intent) = intents.recv().await {
            self.apply_intent(intent).await?;
        }
        debug!("intent channel closed");
        Ok(())
    }

    async fn merge_from(
        &self,
        source: MergeSource,
        batch: Vec<SerializedObject>,
    ) -> SyncResult<MergeOutcome> {
        let mut inner = self.inner.lock().await;
        let Inner {
            engine,
            store,
            tombstones,
            ..
        } = &mut *inner;
        let outcome = engine.merge(batch, store.as_mut(), tombstones, &self.options)?;
        if source == MergeSource::Local {
            for oid in &outcome.created {
                if let Err(e) = tombstones.mark_created_locally(oid) {
                    warn!("could not record local creation of {oid}: {e}");
                }
            }
        }
        Ok(self.finish(&mut inner, source, outcome))
    }

    /// Invalidates caches for a committed merge and publishes the event.
    fn finish(
        &self,
        inner: &mut Inner,
        source: MergeSource,
        outcome: MergeOutcome,
    ) -> MergeOutcome {
        let refreshed = inner.refresh_caches(|invalidator, caches, store| {
            invalidator.invalidate(caches, &outcome, store)
        });
        self.publish(MergeEvent::from_outcome(source, &outcome, refreshed));
        outcome
    }

    // ── Deletion ─────────────────────────────────────────────────

    /// Deletes an object together with every object that hard-requires it,
    /// transitively. Returns the deleted identities (empty if `oid` is not
    /// stored).
    pub async fn delete(&self, oid: &Oid) -> SyncResult<BTreeSet<Oid>> {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;
        let doomed = collect_cascade(inner, oid)?;
        if doomed.is_empty() {
            return Ok(BTreeSet::new());
        }

        let Inner {
            store, tombstones, ..
        } = &mut *inner;
        store.begin_unit_of_work().map_err(SyncError::StoreCommit)?;
        if let Err(e) = stage_deletion(store.as_mut(), tombstones, &doomed) {
            if let Err(rb) = store.rollback() {
                warn!("rollback failed: {rb}");
            }
            return Err(match e {
                SyncError::Storage(inner) => SyncError::StoreCommit(inner),
                other => other,
            });
        }
        if let Err(e) = store.commit() {
            if store.in_unit_of_work() {
                if let Err(rb) = store.rollback() {
                    warn!("rollback failed: {rb}");
                }
            }
            return Err(SyncError::StoreCommit(e));
        }

        let refreshed = inner.refresh_caches(|invalidator, caches, store| {
            invalidator.invalidate_deleted(caches, &doomed, store)
        });
        let deleted: BTreeSet<Oid> = doomed.iter().map(|o| o.oid.clone()).collect();
        info!("deleted {} object(s) starting at {oid}", deleted.len());

        if let Some(tx) = &inner.outbound {
            let command = RemoteCommand::Delete(deleted.iter().cloned().collect());
            if tx.send(command).await.is_err() {
                warn!("outbound channel closed, marking disconnected");
                inner.outbound = None;
            }
        }

        self.publish(MergeEvent::from_deletion(deleted.clone(), refreshed));
        Ok(deleted)
    }

    // ── Trash ────────────────────────────────────────────────────

    /// Deleted objects the local user created, most recent first.
    pub async fn trash(&self) -> SyncResult<Vec<Tombstone>> {
        let inner = self.inner.lock().await;
        inner.tombstones.trash()
    }

    /// Undoes a delete: lifts the tombstone and merges the last state back.
    /// Returns `None` if `oid` had no active tombstone. If the merge fails
    /// the tombstone is put back.
    pub async fn restore(&self, oid: &Oid) -> SyncResult<Option<MergeOutcome>> {
        let mut inner = self.inner.lock().await;
        let Some(last_state) = inner.tombstones.restore(oid)? else {
            return Ok(None);
        };
        let Inner {
            engine,
            store,
            tombstones,
            ..
        } = &mut *inner;
        let options = MergeOptions {
            include_reference_data: true,
            ..self.options
        };
        let outcome = match engine.merge(vec![last_state], store.as_mut(), tombstones, &options) {
            Ok(outcome) => outcome,
            Err(e) => {
                if let Err(re) = tombstones.reinstate(oid) {
                    warn!("could not reinstate tombstone of {oid}: {re}");
                }
                return Err(e);
            }
        };
        if !outcome.rejected.is_empty() {
            warn!("restored {oid} could not be recreated (missing dependencies)");
        }
        Ok(Some(self.finish(&mut inner, MergeSource::Restore, outcome)))
    }

    // ── Reconnect ────────────────────────────────────────────────

    /// Routes remote commands to `outbound` from now on.
    pub async fn connect(&self, outbound: mpsc::Sender<RemoteCommand>) -> SyncResult<()> {
        if outbound.is_closed() {
            return Err(SyncError::ChannelClosed);
        }
        self.inner.lock().await.outbound = Some(outbound);
        Ok(())
    }

    pub async fn disconnect(&self) {
        self.inner.lock().await.outbound = None;
    }

    pub async fn is_connected(&self) -> bool {
        self.inner.lock().await.outbound.is_some()
    }

    /// Fetches objects the remote owns that are missing locally and were not
    /// deleted here, and merges them.
    pub async fn reconcile(
        &self,
        remote: &dyn RemoteRepository,
        user: &str,
    ) -> SyncResult<MergeOutcome> {
        let owned = remote.owned_oids(user).await?;
        let missing = {
            let inner = self.inner.lock().await;
            let local = inner.store.oids()?;
            inner.tombstones.restore_set(&owned, &local)?
        };
        debug!(
            owned = owned.len(),
            missing = missing.len(),
            "reconcile against remote for {user}"
        );
        if missing.is_empty() {
            return Ok(MergeOutcome::default());
        }

        let missing: Vec<Oid> = missing.into_iter().collect();
        let mut fetched = Vec::with_capacity(missing.len());
        for chunk in missing.chunks(MAX_BATCH_SIZE) {
            fetched.extend(remote.fetch_objects(chunk).await?);
        }
        self.merge_from(MergeSource::Remote, fetched).await
    }

    // ── Reads ────────────────────────────────────────────────────

    pub async fn get(&self, oid: &Oid) -> SyncResult<Option<DomainObject>> {
        Ok(self.inner.lock().await.store.get(oid)?)
    }

    /// Copy of the current derived caches.
    pub async fn caches(&self) -> DerivedCaches {
        self.inner.lock().await.caches.clone()
    }

    pub async fn is_tombstoned(&self, oid: &Oid) -> SyncResult<bool> {
        self.inner.lock().await.tombstones.is_tombstoned(oid)
    }

    /// Writes the cache snapshot if a cache directory is configured.
    pub async fn save_caches(&self) -> SyncResult<()> {
        let Some(dir) = &self.cache_dir else {
            return Ok(());
        };
        let inner = self.inner.lock().await;
        inner.caches.save(dir)?;
        debug!("saved cache snapshot to {}", dir.display());
        Ok(())
    }

    /// Recomputes every cache from the store.
    pub async fn rebuild_caches(&self) -> SyncResult<RefreshedRoots> {
        let mut inner = self.inner.lock().await;
        let Inner {
            store,
            caches,
            invalidator,
            caches_stale,
            ..
        } = &mut *inner;
        let refreshed = invalidator.rebuild_all(caches, store.as_ref())?;
        *caches_stale = false;
        Ok(refreshed)
    }

    /// True while a failed refresh has left the caches out of date.
    pub async fn caches_stale(&self) -> bool {
        self.inner.lock().await.caches_stale
    }
}

/// `root` plus every live object whose hard-required reference points into
/// the set, transitively, in discovery order.
fn collect_cascade(inner: &Inner, root: &Oid) -> SyncResult<Vec<DomainObject>> {
    let catalog = inner.engine.catalog();
    let mut seen = BTreeSet::new();
    let mut doomed = Vec::new();
    let mut queue = VecDeque::from([root.clone()]);
    while let Some(oid) = queue.pop_front() {
        if !seen.insert(oid.clone()) {
            continue;
        }
        let Some(obj) = inner.store.get(&oid)? else {
            continue;
        };
        for dependent in inner.store.referrers(&oid)? {
            let hard = catalog.hard_required(&dependent.object_type);
            if hard.iter().any(|field| dependent.get_ref(field) == Some(&oid)) {
                queue.push_back(dependent.oid);
            }
        }
        doomed.push(obj);
    }
    Ok(doomed)
}

fn stage_deletion(
    store: &mut dyn ObjectStore,
    tombstones: &TombstoneRegistry,
    doomed: &[DomainObject],
) -> SyncResult<()> {
    for obj in doomed {
        let created_locally = tombstones.is_local_creation(&obj.oid)?;
        tombstones.record_delete(&obj.oid, &obj.to_serialized(), created_locally)?;
        store.delete(&obj.oid)?;
    }
    Ok(())
}
