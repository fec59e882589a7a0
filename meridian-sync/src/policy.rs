//! Write gate consulted for every record that passes the tombstone check.
//!
//! Policy evaluation itself lives outside this crate; the engine only needs
//! a yes/no answer per object.

use meridian_model::SerializedObject;
use meridian_types::Oid;
use std::collections::BTreeSet;

/// Decides whether an incoming record may be written locally.
pub trait AccessGate: Send + Sync {
    fn may_write(&self, oid: &Oid, object_type: &str, record: &SerializedObject) -> bool;
}

/// Gate that allows everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl AccessGate for AllowAll {
    fn may_write(&self, _oid: &Oid, _object_type: &str, _record: &SerializedObject) -> bool {
        true
    }
}

/// Gate that refuses writes to a fixed set of read-only objects.
#[derive(Debug, Clone, Default)]
pub struct ReadOnlyObjects {
    oids: BTreeSet<Oid>,
}

impl ReadOnlyObjects {
    pub fn new(oids: impl IntoIterator<Item = Oid>) -> Self {
        Self {
            oids: oids.into_iter().collect(),
        }
    }
}

impl AccessGate for ReadOnlyObjects {
    fn may_write(&self, oid: &Oid, _object_type: &str, _record: &SerializedObject) -> bool {
        !self.oids.contains(oid)
    }
}
