use crate::error::StorageResult;
use meridian_model::DomainObject;
use meridian_types::Oid;
use std::collections::BTreeSet;

/// Persistence boundary used by the merge engine, the deleter and the cache
/// invalidator.
///
/// Reads always see the writes staged by the current unit of work, so a
/// record merged early in a batch can be referenced by a later one before
/// anything is committed. Writes are only legal inside a unit of work.
pub trait ObjectStore: Send {
    /// Returns true if a live object with this identity exists.
    fn exists(&self, oid: &Oid) -> StorageResult<bool>;

    /// Fetches an object.
    fn get(&self, oid: &Oid) -> StorageResult<Option<DomainObject>>;

    /// All live objects of one type, ordered by oid.
    fn list_by_type(&self, object_type: &str) -> StorageResult<Vec<DomainObject>>;

    /// Objects with any reference field pointing at `oid` (the inverse
    /// relations of `oid`), ordered by oid.
    fn referrers(&self, oid: &Oid) -> StorageResult<Vec<DomainObject>>;

    /// Every live identity.
    fn oids(&self) -> StorageResult<BTreeSet<Oid>>;

    /// Opens a unit of work. Nested units are not supported.
    fn begin_unit_of_work(&mut self) -> StorageResult<()>;

    /// True while a unit of work is open.
    fn in_unit_of_work(&self) -> bool;

    /// Stages a new object. Fails if the identity already exists.
    fn create(&mut self, object: DomainObject) -> StorageResult<()>;

    /// Stages a replacement of an existing object.
    fn update(&mut self, object: DomainObject) -> StorageResult<()>;

    /// Stages removal of an object.
    fn delete(&mut self, oid: &Oid) -> StorageResult<()>;

    /// Makes every staged write visible together.
    fn commit(&mut self) -> StorageResult<()>;

    /// Discards every staged write.
    fn rollback(&mut self) -> StorageResult<()>;
}
