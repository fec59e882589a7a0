//! Type Ordering Resolver.
//!
//! Derives the order in which a batch's types are merged from the catalog's
//! required references: if `B` has a required (or hard-required) reference
//! into `A`, every `A` record is merged before any `B` record, so the `B`
//! record finds its target already staged in the store.

use crate::error::{ModelError, ModelResult};
use crate::schema::SchemaCatalog;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Total order over the catalog's types. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeOrder {
    order: Vec<String>,
    rank: HashMap<String, usize>,
}

impl TypeOrder {
    /// Resolves the order by layered topological sort.
    ///
    /// Each layer holds the types whose order-relevant dependencies are all
    /// in earlier layers, sorted alphabetically, so types with no such
    /// dependencies come first and the result is deterministic. Self
    /// references and references to types outside the catalog impose no
    /// constraint.
    pub fn resolve(catalog: &SchemaCatalog) -> ModelResult<Self> {
        let mut indegree: BTreeMap<&str, usize> =
            catalog.type_names().map(|name| (name, 0)).collect();
        let mut dependents: HashMap<&str, BTreeSet<&str>> = HashMap::new();

        for schema in catalog.iter() {
            for (_, target, requirement) in schema.references() {
                if !requirement.orders() || target == schema.name || !catalog.contains(target) {
                    continue;
                }
                if dependents.entry(target).or_default().insert(schema.name.as_str()) {
                    *indegree.entry(schema.name.as_str()).or_default() += 1;
                }
            }
        }

        let mut order = Vec::with_capacity(indegree.len());
        let mut layer: Vec<&str> = indegree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(name, _)| *name)
            .collect();

        while !layer.is_empty() {
            let mut next = BTreeSet::new();
            for name in &layer {
                order.push(name.to_string());
                if let Some(deps) = dependents.get(name) {
                    for dep in deps {
                        if let Some(d) = indegree.get_mut(dep) {
                            *d -= 1;
                            if *d == 0 {
                                next.insert(*dep);
                            }
                        }
                    }
                }
            }
            layer = next.into_iter().collect();
        }

        if order.len() < indegree.len() {
            let types = indegree
                .into_iter()
                .filter(|(_, d)| *d > 0)
                .map(|(name, _)| name.to_string())
                .collect();
            return Err(ModelError::CyclicDependency { types });
        }

        Ok(Self::from_vec(order))
    }

    fn from_vec(order: Vec<String>) -> Self {
        let rank = order
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect();
        Self { order, rank }
    }

    /// The same types in the opposite order. Only useful for demonstrating
    /// what goes wrong without the resolver.
    pub fn reversed(&self) -> Self {
        Self::from_vec(self.order.iter().rev().cloned().collect())
    }

    /// Rank of a type; types outside the order share the final rank.
    pub fn position(&self, object_type: &str) -> usize {
        self.rank
            .get(object_type)
            .copied()
            .unwrap_or(self.order.len())
    }

    /// Sort key placing ordered types by rank and the final bucket
    /// alphabetically after them.
    pub fn sort_key<'a>(&self, object_type: &'a str) -> (usize, &'a str) {
        match self.rank.get(object_type) {
            Some(r) => (*r, ""),
            None => (self.order.len(), object_type),
        }
    }

    pub fn contains(&self, object_type: &str) -> bool {
        self.rank.contains_key(object_type)
    }

    pub fn as_slice(&self) -> &[String] {
        &self.order
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
