//! In-memory object store.

use crate::adapter::ObjectStore;
use crate::error::{StorageError, StorageResult};
use meridian_model::DomainObject;
use meridian_types::Oid;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Map-backed store.
///
/// While a unit of work is open, writes land in `staged` (`None` marks a
/// deletion) and reads consult `staged` before `committed`.
#[derive(Debug, Default)]
pub struct MemoryStore {
    committed: BTreeMap<Oid, DomainObject>,
    staged: Option<BTreeMap<Oid, Option<DomainObject>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a store pre-populated with committed objects.
    pub fn with_objects(objects: impl IntoIterator<Item = DomainObject>) -> Self {
        Self {
            committed: objects.into_iter().map(|o| (o.oid.clone(), o)).collect(),
            staged: None,
        }
    }

    /// Number of live objects as currently visible.
    pub fn len(&self) -> usize {
        self.view().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lookup(&self, oid: &Oid) -> Option<&DomainObject> {
        if let Some(staged) = &self.staged {
            if let Some(entry) = staged.get(oid) {
                return entry.as_ref();
            }
        }
        self.committed.get(oid)
    }

    /// Merged view of committed and staged objects, ordered by oid.
    fn view(&self) -> impl Iterator<Item = &DomainObject> {
        let mut merged: BTreeMap<&Oid, &DomainObject> = self.committed.iter().collect();
        if let Some(staged) = &self.staged {
            for (oid, entry) in staged {
                match entry {
                    Some(obj) => {
                        merged.insert(oid, obj);
                    }
                    None => {
                        merged.remove(oid);
                    }
                }
            }
        }
        merged.into_values()
    }

    fn staging(&mut self) -> StorageResult<&mut BTreeMap<Oid, Option<DomainObject>>> {
        self.staged.as_mut().ok_or(StorageError::NoUnitOfWork)
    }
}

impl ObjectStore for MemoryStore {
    fn exists(&self, oid: &Oid) -> StorageResult<bool> {
        Ok(self.lookup(oid).is_some())
    }

    fn get(&self, oid: &Oid) -> StorageResult<Option<DomainObject>> {
        Ok(self.lookup(oid).cloned())
    }

    fn list_by_type(&self, object_type: &str) -> StorageResult<Vec<DomainObject>> {
        Ok(self
            .view()
            .filter(|o| o.object_type == object_type)
            .cloned()
            .collect())
    }

    fn referrers(&self, oid: &Oid) -> StorageResult<Vec<DomainObject>> {
        Ok(self
            .view()
            .filter(|o| o.refs.values().any(|t| t.as_ref() == Some(oid)))
            .cloned()
            .collect())
    }

    fn oids(&self) -> StorageResult<BTreeSet<Oid>> {
        Ok(self.view().map(|o| o.oid.clone()).collect())
    }

    fn begin_unit_of_work(&mut self) -> StorageResult<()> {
        if self.staged.is_some() {
            return Err(StorageError::UnitOfWorkActive);
        }
        self.staged = Some(BTreeMap::new());
        Ok(())
    }

    fn in_unit_of_work(&self) -> bool {
        self.staged.is_some()
    }

    fn create(&mut self, object: DomainObject) -> StorageResult<()> {
        if self.lookup(&object.oid).is_some() {
            return Err(StorageError::AlreadyExists(object.oid.to_string()));
        }
        let staged = self.staging()?;
        staged.insert(object.oid.clone(), Some(object));
        Ok(())
    }

    fn update(&mut self, object: DomainObject) -> StorageResult<()> {
        if self.lookup(&object.oid).is_none() {
            return Err(StorageError::NotFound(object.oid.to_string()));
        }
        let staged = self.staging()?;
        staged.insert(object.oid.clone(), Some(object));
        Ok(())
    }

    fn delete(&mut self, oid: &Oid) -> StorageResult<()> {
        if self.lookup(oid).is_none() {
            return Err(StorageError::NotFound(oid.to_string()));
        }
        let staged = self.staging()?;
        staged.insert(oid.clone(), None);
        Ok(())
    }

    fn commit(&mut self) -> StorageResult<()> {
        let staged = self.staged.take().ok_or(StorageError::NoUnitOfWork)?;
        debug!(writes = staged.len(), "committing unit of work");
        for (oid, entry) in staged {
            match entry {
                Some(obj) => {
                    self.committed.insert(oid, obj);
                }
                None => {
                    self.committed.remove(&oid);
                }
            }
        }
        Ok(())
    }

    fn rollback(&mut self) -> StorageResult<()> {
        let staged = self.staged.take().ok_or(StorageError::NoUnitOfWork)?;
        debug!(discarded = staged.len(), "rolled back unit of work");
        Ok(())
    }
}
