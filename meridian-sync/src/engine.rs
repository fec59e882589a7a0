//! The merge engine: applies a batch of serialized objects to a store.
//!
//! A batch is merged in one unit of work. Records are filtered, ordered by
//! type dependency so referenced objects are written before the objects that
//! point at them, then decided one by one:
//!
//! 1. reference data is ignored unless explicitly included
//! 2. tombstoned identities are rejected, whatever their timestamp
//! 3. the access gate can reject
//! 4. existing objects update only on a strictly later `mod_datetime`
//!    (or under `force_update`); parameters and data elements are merged
//!    per record regardless of the object-level decision
//! 5. new objects are created unless a hard-required reference is empty
//!
//! Any store failure rolls the whole batch back.

use crate::error::{SyncError, SyncResult};
use crate::outcome::{ChangeCategory, DropCounts, MergeOutcome, TaggedChange};
use crate::policy::{AccessGate, AllowAll};
use crate::tombstone::TombstoneRegistry;
use meridian_model::{
    decode_batch, DomainObject, ModelResult, SchemaCatalog, SerializedObject, StructuralRole,
    TypeOrder, TypeSchema, ValueRecord,
};
use meridian_storage::ObjectStore;
use meridian_types::Oid;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Per-call merge switches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeOptions {
    /// Merge reference (seed) objects instead of ignoring them.
    pub include_reference_data: bool,
    /// Apply existing-object updates regardless of timestamp order.
    pub force_update: bool,
}

/// A record that passed the structural checks.
struct Prepared {
    oid: Oid,
    object_type: String,
    record: SerializedObject,
}

/// A write made for one record.
struct Applied {
    change: TaggedChange,
    /// Parameters or data elements were inserted or replaced.
    sub_records: bool,
}

/// What happened to one record.
enum Decision {
    Created(Applied),
    Updated(Applied),
    /// Object-level update skipped; carries a write if sub-records moved.
    Ignored(Option<Applied>),
    /// Object-level write refused; sub-records of an existing object may
    /// still have been merged.
    Rejected(Option<Applied>),
}

/// Outcome class of one oid within a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Class {
    Created,
    Updated,
    Ignored,
    Rejected,
}

impl Class {
    /// Folds a later record's class for the same oid into the earlier one.
    /// A write is never downgraded, and an object created in this batch
    /// stays created however often it is updated afterwards.
    fn then(self, later: Class) -> Class {
        match (self, later) {
            (Class::Created, _) | (_, Class::Created) => Class::Created,
            (Class::Updated, _) | (_, Class::Updated) => Class::Updated,
            (_, later) => later,
        }
    }
}

/// Per-oid decisions of one batch, folded so that every oid lands in
/// exactly one class and carries at most one tagged change.
#[derive(Default)]
struct Tally {
    classes: BTreeMap<Oid, Class>,
    changes: Vec<TaggedChange>,
    change_index: BTreeMap<Oid, usize>,
    parameters_updated: BTreeSet<Oid>,
}

impl Tally {
    fn record(&mut self, oid: &Oid, decision: Decision) {
        let (class, applied) = match decision {
            Decision::Created(applied) => (Class::Created, Some(applied)),
            Decision::Updated(applied) => (Class::Updated, Some(applied)),
            Decision::Ignored(applied) => (Class::Ignored, applied),
            Decision::Rejected(applied) => (Class::Rejected, applied),
        };
        let folded = match self.classes.get(oid) {
            Some(earlier) => earlier.then(class),
            None => class,
        };
        self.classes.insert(oid.clone(), folded);
        if let Some(applied) = applied {
            self.push_change(applied);
        }
    }

    fn push_change(&mut self, applied: Applied) {
        let Applied { change, sub_records } = applied;
        if sub_records {
            self.parameters_updated.insert(change.oid.clone());
        }
        match self.change_index.get(&change.oid) {
            // keep the pre-batch `previous`, widen the categories
            Some(&i) => self.changes[i].categories.extend(change.categories),
            None => {
                self.change_index.insert(change.oid.clone(), self.changes.len());
                self.changes.push(change);
            }
        }
    }

    fn into_outcome(self, outcome: &mut MergeOutcome) {
        for (oid, class) in self.classes {
            let set = match class {
                Class::Created => &mut outcome.created,
                Class::Updated => &mut outcome.updated,
                Class::Ignored => &mut outcome.ignored,
                Class::Rejected => &mut outcome.rejected,
            };
            set.insert(oid);
        }
        outcome.parameters_updated = self.parameters_updated;
        outcome.changes = self.changes;
    }
}

/// Merges batches of serialized objects into an [`ObjectStore`].
pub struct MergeEngine {
    catalog: Arc<SchemaCatalog>,
    order: TypeOrder,
    reference_oids: BTreeSet<Oid>,
    gate: Arc<dyn AccessGate>,
}

impl MergeEngine {
    /// Creates an engine, resolving the type order from the catalog.
    ///
    /// Fails if the catalog's required references form a cycle.
    pub fn new(catalog: Arc<SchemaCatalog>) -> ModelResult<Self> {
        let order = TypeOrder::resolve(&catalog)?;
        Ok(Self::with_order(catalog, order))
    }

    /// Creates an engine with an explicit type order.
    pub fn with_order(catalog: Arc<SchemaCatalog>, order: TypeOrder) -> Self {
        Self {
            catalog,
            order,
            reference_oids: BTreeSet::new(),
            gate: Arc::new(AllowAll),
        }
    }

    pub fn with_reference_oids(mut self, oids: impl IntoIterator<Item = Oid>) -> Self {
        self.reference_oids = oids.into_iter().collect();
        self
    }

    pub fn with_gate(mut self, gate: Arc<dyn AccessGate>) -> Self {
        self.gate = gate;
        self
    }

    pub fn catalog(&self) -> &Arc<SchemaCatalog> {
        &self.catalog
    }

    pub fn order(&self) -> &TypeOrder {
        &self.order
    }

    /// Decodes a transport payload and merges it.
    pub fn merge_payload(
        &self,
        payload: &[u8],
        store: &mut dyn ObjectStore,
        tombstones: &TombstoneRegistry,
        options: &MergeOptions,
    ) -> SyncResult<MergeOutcome> {
        let decoded = decode_batch(payload)?;
        let mut outcome = self.merge(decoded.records, store, tombstones, options)?;
        outcome.dropped.malformed += decoded.malformed;
        Ok(outcome)
    }

    /// Merges a single local edit. The caller stamps `mod_datetime`.
    pub fn upsert(
        &self,
        record: SerializedObject,
        store: &mut dyn ObjectStore,
        tombstones: &TombstoneRegistry,
        options: &MergeOptions,
    ) -> SyncResult<MergeOutcome> {
        self.merge(vec![record], store, tombstones, options)
    }

    /// Merges a batch in one unit of work.
    ///
    /// Returns [`SyncError::StoreCommit`] if any store operation fails; in
    /// that case nothing from the batch is visible.
    pub fn merge(
        &self,
        batch: Vec<SerializedObject>,
        store: &mut dyn ObjectStore,
        tombstones: &TombstoneRegistry,
        options: &MergeOptions,
    ) -> SyncResult<MergeOutcome> {
        let mut outcome = MergeOutcome::default();
        let records = self.prepare(batch, &mut outcome.dropped);
        if records.is_empty() {
            return Ok(outcome);
        }

        store.begin_unit_of_work().map_err(SyncError::StoreCommit)?;

        let mut tally = Tally::default();
        for item in &records {
            let decision = match self.decide(item, store, tombstones, options) {
                Ok(d) => d,
                Err(e) => {
                    abort(store);
                    return Err(as_commit_error(e));
                }
            };
            tally.record(&item.oid, decision);
        }

        if let Err(e) = store.commit() {
            warn!("merge commit failed: {e}");
            abort(store);
            return Err(SyncError::StoreCommit(e));
        }
        tally.into_outcome(&mut outcome);

        info!(
            created = outcome.created.len(),
            updated = outcome.updated.len(),
            ignored = outcome.ignored.len(),
            rejected = outcome.rejected.len(),
            parameters = outcome.parameters_updated.len(),
            "merged batch of {}",
            records.len()
        );
        Ok(outcome)
    }

    /// Drops malformed and unknown-type records, then stable-sorts by type
    /// rank so arrival order is kept within a type.
    fn prepare(&self, batch: Vec<SerializedObject>, dropped: &mut DropCounts) -> Vec<Prepared> {
        let mut accepted = Vec::with_capacity(batch.len());
        for record in batch {
            let (Some(oid), Some(object_type)) =
                (record.oid(), record.object_type().map(str::to_string))
            else {
                dropped.malformed += 1;
                continue;
            };
            if !self.catalog.contains(&object_type) {
                debug!("dropping {oid}: unknown type {object_type}");
                dropped.unknown_type += 1;
                continue;
            }
            accepted.push(Prepared {
                oid,
                object_type,
                record,
            });
        }
        accepted.sort_by(|a, b| {
            self.order
                .sort_key(&a.object_type)
                .cmp(&self.order.sort_key(&b.object_type))
        });
        accepted
    }

    fn decide(
        &self,
        item: &Prepared,
        store: &mut dyn ObjectStore,
        tombstones: &TombstoneRegistry,
        options: &MergeOptions,
    ) -> SyncResult<Decision> {
        let Prepared {
            oid,
            object_type,
            record,
        } = item;

        if !options.include_reference_data && self.reference_oids.contains(oid) {
            debug!("ignoring reference object {oid}");
            return Ok(Decision::Ignored(None));
        }
        if tombstones.is_tombstoned(oid)? {
            debug!("rejecting {oid}: tombstoned");
            return Ok(Decision::Rejected(None));
        }
        if !self.gate.may_write(oid, object_type, record) {
            debug!("rejecting {oid}: write not permitted");
            return Ok(Decision::Rejected(None));
        }

        let schema = self.catalog.require(object_type)?;
        match store.get(oid)? {
            Some(existing) if existing.object_type != *object_type => {
                warn!(
                    "rejecting {oid}: stored as {} but received as {object_type}",
                    existing.object_type
                );
                Ok(Decision::Rejected(None))
            }
            Some(existing) => self.update_existing(existing, schema, record, store, options),
            None => self.create_new(oid, schema, record, store),
        }
    }

    fn update_existing(
        &self,
        existing: DomainObject,
        schema: &TypeSchema,
        record: &SerializedObject,
        store: &mut dyn ObjectStore,
        options: &MergeOptions,
    ) -> SyncResult<Decision> {
        let incoming = record.mod_datetime();
        let wins = options.force_update
            || match (incoming, existing.mod_datetime) {
                (Some(inc), Some(stored)) => inc.is_after(&stored),
                (Some(_), None) => true,
                (None, _) => false,
            };

        let mut next = existing.clone();
        let mut categories = BTreeSet::new();
        let mut rejected = false;
        if wins {
            assign_declared(&mut next, schema, record, store)?;
            if let Some(field) = first_empty_hard_required(&next, schema) {
                debug!("rejecting update of {}: {field} would be empty", next.oid);
                // object-level fields stay as stored; sub-records still merge
                next = existing.clone();
                rejected = true;
            } else {
                // never let the stored timestamp move backwards
                next.mod_datetime = existing.mod_datetime.max(incoming);
                categories.extend(role_categories(schema.role.as_ref()));
            }
        }
        let wins = wins && !rejected;

        let sub_changed = merge_sub_records(&mut next.parameters, record.parameters())
            | merge_sub_records(&mut next.data_elements, record.data_elements());
        if sub_changed {
            categories.insert(ChangeCategory::ParameterValue);
        }

        if !wins && !sub_changed {
            return Ok(if rejected {
                Decision::Rejected(None)
            } else {
                Decision::Ignored(None)
            });
        }

        let change = TaggedChange {
            oid: next.oid.clone(),
            object_type: next.object_type.clone(),
            categories,
            previous: Some(existing),
        };
        store.update(next)?;

        let applied = Applied {
            change,
            sub_records: sub_changed,
        };
        if wins {
            Ok(Decision::Updated(applied))
        } else if rejected {
            Ok(Decision::Rejected(Some(applied)))
        } else {
            Ok(Decision::Ignored(Some(applied)))
        }
    }

    fn create_new(
        &self,
        oid: &Oid,
        schema: &TypeSchema,
        record: &SerializedObject,
        store: &mut dyn ObjectStore,
    ) -> SyncResult<Decision> {
        let mut object = DomainObject::new(oid.clone(), schema.name.clone());
        assign_declared(&mut object, schema, record, store)?;
        if let Some(field) = first_empty_hard_required(&object, schema) {
            debug!("rejecting new {oid}: hard-required {field} is empty");
            return Ok(Decision::Rejected(None));
        }
        object.mod_datetime = record.mod_datetime();

        let mut categories: BTreeSet<ChangeCategory> =
            role_categories(schema.role.as_ref()).into_iter().collect();
        let sub_changed = merge_sub_records(&mut object.parameters, record.parameters())
            | merge_sub_records(&mut object.data_elements, record.data_elements());
        if sub_changed {
            categories.insert(ChangeCategory::ParameterValue);
        }

        let change = TaggedChange {
            oid: oid.clone(),
            object_type: schema.name.clone(),
            categories,
            previous: None,
        };
        store.create(object)?;
        debug!("created {oid} ({})", schema.name);
        Ok(Decision::Created(Applied {
            change,
            sub_records: sub_changed,
        }))
    }
}

/// Replaces the object's declared value fields and non-inverse references
/// with what the record carries. References resolve only to objects that
/// exist in the store (including writes staged earlier in this batch).
/// Inverse and undeclared fields are never copied.
fn assign_declared(
    object: &mut DomainObject,
    schema: &TypeSchema,
    record: &SerializedObject,
    store: &dyn ObjectStore,
) -> SyncResult<()> {
    object.fields = schema
        .value_fields()
        .filter_map(|f| {
            record
                .get(&f.name)
                .filter(|v| !v.is_null())
                .map(|v| (f.name.clone(), v.clone()))
        })
        .collect();

    let mut refs = BTreeMap::new();
    for (field, _target, _requirement) in schema.references() {
        let resolved = match record.reference(field) {
            Some(target) if store.exists(&target)? => Some(target),
            Some(target) => {
                debug!("{}: {field} -> {target} not present, leaving unset", object.oid);
                None
            }
            None => None,
        };
        refs.insert(field.to_string(), resolved);
    }
    object.refs = refs;
    Ok(())
}

fn first_empty_hard_required<'a>(object: &DomainObject, schema: &'a TypeSchema) -> Option<&'a str> {
    schema
        .hard_required_refs()
        .find(|field| object.get_ref(field).is_none())
}

/// Merges incoming value records into `local`, each by its own timestamp.
/// Returns true if anything changed.
fn merge_sub_records(
    local: &mut BTreeMap<String, ValueRecord>,
    incoming: BTreeMap<String, ValueRecord>,
) -> bool {
    let mut changed = false;
    for (id, record) in incoming {
        let replace = match local.get(&id) {
            Some(current) => record.supersedes(current),
            None => true,
        };
        if replace {
            local.insert(id, record);
            changed = true;
        }
    }
    changed
}

/// Categories of derived data that a write to an object of this role can
/// disturb.
pub(crate) fn role_categories(role: Option<&StructuralRole>) -> Vec<ChangeCategory> {
    match role {
        Some(StructuralRole::AssemblyUsage { .. }) => vec![
            ChangeCategory::AssemblyMembership,
            ChangeCategory::RequirementAllocation,
            ChangeCategory::ParameterValue,
        ],
        Some(StructuralRole::SystemUsage { .. }) | Some(StructuralRole::Requirement { .. }) => {
            vec![ChangeCategory::RequirementAllocation]
        }
        Some(StructuralRole::Product) | None => Vec::new(),
    }
}

fn abort(store: &mut dyn ObjectStore) {
    if store.in_unit_of_work() {
        if let Err(e) = store.rollback() {
            warn!("rollback failed: {e}");
        }
    }
}

fn as_commit_error(e: SyncError) -> SyncError {
    match e {
        SyncError::Storage(inner) => SyncError::StoreCommit(inner),
        other => other,
    }
}
