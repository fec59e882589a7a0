//! Merge results.

use meridian_model::DomainObject;
use meridian_types::Oid;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// What kind of derived data a change can affect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeCategory {
    AssemblyMembership,
    RequirementAllocation,
    ParameterValue,
}

/// One created, updated or parameter-changed object.
#[derive(Debug, Clone, PartialEq)]
pub struct TaggedChange {
    pub oid: Oid,
    pub object_type: String,
    pub categories: BTreeSet<ChangeCategory>,
    /// The object as stored before this merge; `None` for creations.
    pub previous: Option<DomainObject>,
}

impl TaggedChange {
    pub fn has(&self, category: ChangeCategory) -> bool {
        self.categories.contains(&category)
    }
}

/// Records dropped before ordering.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DropCounts {
    /// Missing `oid` or `type`, or not a JSON object at all.
    pub malformed: usize,
    /// `type` not present in the catalog.
    pub unknown_type: usize,
}

/// Partition of a merged batch.
///
/// Every accepted oid lands in exactly one of `created`, `updated`,
/// `ignored` or `rejected`. An oid repeated within a batch is reported
/// once: created if any of its records created it, else updated if any
/// record updated it, else whatever its last record decided.
/// `parameters_updated` overlaps with the others: an ignored or rejected
/// object can still have had parameters merged.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergeOutcome {
    pub created: BTreeSet<Oid>,
    pub updated: BTreeSet<Oid>,
    pub ignored: BTreeSet<Oid>,
    pub rejected: BTreeSet<Oid>,
    pub parameters_updated: BTreeSet<Oid>,
    pub changes: Vec<TaggedChange>,
    pub dropped: DropCounts,
}

impl MergeOutcome {
    /// Number of records that reached a decision.
    pub fn decided(&self) -> usize {
        self.created.len() + self.updated.len() + self.ignored.len() + self.rejected.len()
    }

    /// True if nothing was written.
    pub fn is_noop(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn change(&self, oid: &Oid) -> Option<&TaggedChange> {
        self.changes.iter().find(|c| &c.oid == oid)
    }
}
