//! Incremental maintenance of the derived caches.
//!
//! After a merge commits, the tagged changes name which cache roots can be
//! stale. Only those roots are recomputed from store state; every other
//! entry is left exactly as it was.

use crate::cache::{Allocation, Component, DerivedCaches};
use crate::engine::role_categories;
use crate::error::SyncResult;
use crate::outcome::{ChangeCategory, MergeOutcome, TaggedChange};
use meridian_model::{DomainObject, SchemaCatalog, StructuralRole};
use meridian_storage::ObjectStore;
use meridian_types::Oid;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;
use tracing::{debug, warn};

/// Roots recomputed by one invalidation, per cache.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RefreshedRoots {
    pub assemblies: BTreeSet<Oid>,
    pub allocations: BTreeSet<Oid>,
    pub parameters: BTreeSet<Oid>,
}

impl RefreshedRoots {
    /// Union over the three caches.
    pub fn all(&self) -> BTreeSet<Oid> {
        self.assemblies
            .iter()
            .chain(&self.allocations)
            .chain(&self.parameters)
            .cloned()
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.assemblies.is_empty() && self.allocations.is_empty() && self.parameters.is_empty()
    }
}

/// Computes and refreshes stale cache roots.
pub struct CacheInvalidator {
    catalog: Arc<SchemaCatalog>,
}

impl CacheInvalidator {
    pub fn new(catalog: Arc<SchemaCatalog>) -> Self {
        Self { catalog }
    }

    /// Refreshes the roots affected by a committed merge.
    pub fn invalidate(
        &self,
        caches: &mut DerivedCaches,
        outcome: &MergeOutcome,
        store: &dyn ObjectStore,
    ) -> SyncResult<RefreshedRoots> {
        let roots = self.collect_roots(&outcome.changes, store)?;
        self.refresh(caches, roots, store)
    }

    /// Drops the entries of deleted objects and refreshes the roots they
    /// contributed to. Call after the deletion has committed.
    pub fn invalidate_deleted(
        &self,
        caches: &mut DerivedCaches,
        deleted: &[DomainObject],
        store: &dyn ObjectStore,
    ) -> SyncResult<RefreshedRoots> {
        let changes: Vec<TaggedChange> = deleted
            .iter()
            .map(|obj| {
                let mut categories: BTreeSet<ChangeCategory> =
                    role_categories(self.catalog.role_of(&obj.object_type))
                        .into_iter()
                        .collect();
                categories.insert(ChangeCategory::ParameterValue);
                TaggedChange {
                    oid: obj.oid.clone(),
                    object_type: obj.object_type.clone(),
                    categories,
                    previous: Some(obj.clone()),
                }
            })
            .collect();

        let mut roots = self.collect_roots(&changes, store)?;
        // the deleted objects' parents still list them until refreshed
        for obj in deleted {
            roots.parameters.extend(caches.parents_of(&obj.oid));
        }
        for obj in deleted {
            caches.assemblies.remove(&obj.oid);
            caches.allocations.remove(&obj.oid);
            caches.parameters.remove(&obj.oid);
        }
        self.refresh(caches, roots, store)
    }

    /// Recomputes every cache from scratch.
    pub fn rebuild_all(
        &self,
        caches: &mut DerivedCaches,
        store: &dyn ObjectStore,
    ) -> SyncResult<RefreshedRoots> {
        caches.assemblies.clear();
        caches.allocations.clear();
        caches.parameters.clear();

        let mut roots = RefreshedRoots::default();
        for schema in self.catalog.iter() {
            match &schema.role {
                Some(StructuralRole::AssemblyUsage { assembly, .. }) => {
                    for usage in store.list_by_type(&schema.name)? {
                        roots.assemblies.extend(usage.get_ref(assembly).cloned());
                    }
                }
                Some(StructuralRole::Requirement { .. }) => {
                    for req in store.list_by_type(&schema.name)? {
                        roots.allocations.insert(req.oid);
                    }
                }
                Some(StructuralRole::Product) => {
                    for product in store.list_by_type(&schema.name)? {
                        roots.parameters.insert(product.oid);
                    }
                }
                _ => {}
            }
        }
        let refreshed = self.refresh(caches, roots, store)?;
        debug!(
            assemblies = caches.assemblies.len(),
            allocations = caches.allocations.len(),
            parameters = caches.parameters.len(),
            "rebuilt derived caches"
        );
        Ok(refreshed)
    }

    // ── Root collection ──────────────────────────────────────────

    fn collect_roots(
        &self,
        changes: &[TaggedChange],
        store: &dyn ObjectStore,
    ) -> SyncResult<RefreshedRoots> {
        let mut roots = RefreshedRoots::default();
        for change in changes {
            let role = self.catalog.role_of(&change.object_type);
            let current = store.get(&change.oid)?;
            let versions = [current.as_ref(), change.previous.as_ref()];

            match role {
                Some(StructuralRole::AssemblyUsage { assembly, .. }) => {
                    for target in versions.iter().flatten().filter_map(|o| o.get_ref(assembly)) {
                        if change.has(ChangeCategory::AssemblyMembership) {
                            roots.assemblies.insert(target.clone());
                        }
                        if change.has(ChangeCategory::ParameterValue) {
                            roots.parameters.insert(target.clone());
                        }
                    }
                    if change.has(ChangeCategory::RequirementAllocation) {
                        roots
                            .allocations
                            .extend(self.allocated_requirements(&change.oid, store)?);
                    }
                }
                Some(StructuralRole::SystemUsage { .. }) => {
                    if change.has(ChangeCategory::RequirementAllocation) {
                        roots
                            .allocations
                            .extend(self.allocated_requirements(&change.oid, store)?);
                    }
                }
                Some(StructuralRole::Requirement { .. }) => {
                    roots.allocations.insert(change.oid.clone());
                }
                Some(StructuralRole::Product) | None => {
                    if change.has(ChangeCategory::ParameterValue) {
                        roots.parameters.insert(change.oid.clone());
                    }
                }
            }
        }
        Ok(roots)
    }

    /// Requirements whose allocation points at `usage`.
    fn allocated_requirements(
        &self,
        usage: &Oid,
        store: &dyn ObjectStore,
    ) -> SyncResult<Vec<Oid>> {
        let mut found = Vec::new();
        for obj in store.referrers(usage)? {
            if let Some(StructuralRole::Requirement { allocated_to }) =
                self.catalog.role_of(&obj.object_type)
            {
                if obj.get_ref(allocated_to) == Some(usage) {
                    found.push(obj.oid);
                }
            }
        }
        Ok(found)
    }

    // ── Refresh ──────────────────────────────────────────────────

    /// Recomputes roots in dependency order: assemblies first, since
    /// allocations and rollups read the refreshed assembly index.
    fn refresh(
        &self,
        caches: &mut DerivedCaches,
        mut roots: RefreshedRoots,
        store: &dyn ObjectStore,
    ) -> SyncResult<RefreshedRoots> {
        for root in &roots.assemblies {
            match self.compute_components(root, store)? {
                Some(components) => caches.assemblies.replace(root.clone(), components),
                None => {
                    caches.assemblies.remove(root);
                }
            }
        }

        for root in &roots.allocations {
            match self.compute_allocation(root, store)? {
                Some(allocation) => caches.allocations.replace(root.clone(), allocation),
                None => {
                    caches.allocations.remove(root);
                }
            }
        }

        roots.parameters = ancestors_inclusive(caches, &roots.parameters);
        for root in &roots.parameters {
            match self.compute_rollup(root, caches, store)? {
                Some(values) => caches.parameters.replace(root.clone(), values),
                None => {
                    caches.parameters.remove(root);
                }
            }
        }

        Ok(roots)
    }

    fn compute_components(
        &self,
        assembly: &Oid,
        store: &dyn ObjectStore,
    ) -> SyncResult<Option<Vec<Component>>> {
        if !store.exists(assembly)? {
            return Ok(None);
        }
        let mut components = Vec::new();
        for usage in store.referrers(assembly)? {
            let Some(StructuralRole::AssemblyUsage {
                assembly: assembly_field,
                component: component_field,
                quantity,
            }) = self.catalog.role_of(&usage.object_type)
            else {
                continue;
            };
            if usage.get_ref(assembly_field) != Some(assembly) {
                continue;
            }
            let Some(component) = usage.get_ref(component_field) else {
                continue;
            };
            components.push(Component {
                component: component.clone(),
                usage: usage.oid.clone(),
                quantity: quantity
                    .as_deref()
                    .and_then(|q| usage.get_f64(q))
                    .unwrap_or(1.0),
            });
        }
        Ok((!components.is_empty()).then_some(components))
    }

    fn compute_allocation(
        &self,
        requirement: &Oid,
        store: &dyn ObjectStore,
    ) -> SyncResult<Option<Allocation>> {
        let Some(req) = store.get(requirement)? else {
            return Ok(None);
        };
        let Some(StructuralRole::Requirement { allocated_to }) =
            self.catalog.role_of(&req.object_type)
        else {
            return Ok(None);
        };
        let Some(target) = req.get_ref(allocated_to) else {
            return Ok(None);
        };
        let Some(usage) = store.get(target)? else {
            return Ok(None);
        };
        let (context, item) = match self.catalog.role_of(&usage.object_type) {
            Some(StructuralRole::AssemblyUsage {
                assembly,
                component,
                ..
            }) => (usage.get_ref(assembly), usage.get_ref(component)),
            Some(StructuralRole::SystemUsage { project, system }) => {
                (usage.get_ref(project), usage.get_ref(system))
            }
            _ => (None, None),
        };
        Ok(Some(Allocation {
            allocated_to: target.clone(),
            usage_type: usage.object_type.clone(),
            context: context.cloned(),
            item: item.cloned(),
        }))
    }

    fn compute_rollup(
        &self,
        product: &Oid,
        caches: &DerivedCaches,
        store: &dyn ObjectStore,
    ) -> SyncResult<Option<BTreeMap<String, f64>>> {
        let Some(obj) = store.get(product)? else {
            return Ok(None);
        };
        if !matches!(
            self.catalog.role_of(&obj.object_type),
            Some(StructuralRole::Product)
        ) {
            return Ok(None);
        }
        let mut values = BTreeMap::new();
        for param in self.catalog.rollup_parameters() {
            let mut path = Vec::new();
            if let Some(v) = rollup(product, param, caches, store, &mut path)? {
                values.insert(param.clone(), v);
            }
        }
        Ok((!values.is_empty()).then_some(values))
    }
}

/// Quantity-weighted sum over components, or the object's own value when it
/// has none. `path` holds the assemblies being expanded; revisiting one is a
/// cycle and contributes nothing.
fn rollup(
    oid: &Oid,
    param: &str,
    caches: &DerivedCaches,
    store: &dyn ObjectStore,
    path: &mut Vec<Oid>,
) -> SyncResult<Option<f64>> {
    if path.contains(oid) {
        warn!("assembly cycle through {oid} while rolling up {param}");
        return Ok(None);
    }
    match caches.assemblies.get(oid) {
        Some(components) if !components.is_empty() => {
            path.push(oid.clone());
            let mut total: Option<f64> = None;
            for c in components {
                if let Some(v) = rollup(&c.component, param, caches, store, path)? {
                    *total.get_or_insert(0.0) += c.quantity * v;
                }
            }
            path.pop();
            Ok(total)
        }
        _ => Ok(store.get(oid)?.and_then(|o| o.parameter_f64(param))),
    }
}

/// `roots` plus every assembly that contains one of them, transitively.
fn ancestors_inclusive(caches: &DerivedCaches, roots: &BTreeSet<Oid>) -> BTreeSet<Oid> {
    let mut seen: BTreeSet<Oid> = roots.clone();
    let mut queue: VecDeque<Oid> = roots.iter().cloned().collect();
    while let Some(next) = queue.pop_front() {
        for parent in caches.parents_of(&next) {
            if seen.insert(parent.clone()) {
                queue.push_back(parent);
            }
        }
    }
    seen
}
