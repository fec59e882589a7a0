//! Derived caches kept alongside the object store.
//!
//! Each cache maps a root object to a value computed from store state. An
//! entry is always replaced as a whole, never patched.

use crate::error::SyncResult;
use meridian_types::Oid;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;
use tracing::debug;

const ASSEMBLIES_FILE: &str = "assemblies.json";
const ALLOCATIONS_FILE: &str = "allocations.json";
const PARAMETERS_FILE: &str = "parameters.json";

/// Root-keyed cache with wholesale replacement per root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DerivedCache<V> {
    entries: BTreeMap<Oid, V>,
}

impl<V> Default for DerivedCache<V> {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }
}

impl<V> DerivedCache<V> {
    pub fn get(&self, root: &Oid) -> Option<&V> {
        self.entries.get(root)
    }

    pub fn replace(&mut self, root: Oid, value: V) {
        self.entries.insert(root, value);
    }

    pub fn remove(&mut self, root: &Oid) -> Option<V> {
        self.entries.remove(root)
    }

    pub fn contains(&self, root: &Oid) -> bool {
        self.entries.contains_key(root)
    }

    pub fn roots(&self) -> impl Iterator<Item = &Oid> {
        self.entries.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Oid, &V)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// One component placed in an assembly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Component {
    pub component: Oid,
    /// The usage object that places it.
    pub usage: Oid,
    pub quantity: f64,
}

/// Where a requirement is allocated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Allocation {
    /// The usage the requirement points at.
    pub allocated_to: Oid,
    pub usage_type: String,
    /// The usage's assembly or project.
    pub context: Option<Oid>,
    /// The usage's component or system.
    pub item: Option<Oid>,
}

/// The three derived caches.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DerivedCaches {
    /// Assembly oid to its components.
    pub assemblies: DerivedCache<Vec<Component>>,
    /// Requirement oid to its allocation.
    pub allocations: DerivedCache<Allocation>,
    /// Product oid to rolled-up parameter values.
    pub parameters: DerivedCache<BTreeMap<String, f64>>,
}

impl DerivedCaches {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assemblies that list `component`, found through the assembly cache.
    pub fn parents_of(&self, component: &Oid) -> BTreeSet<Oid> {
        self.assemblies
            .iter()
            .filter(|(_, comps)| comps.iter().any(|c| &c.component == component))
            .map(|(root, _)| root.clone())
            .collect()
    }

    /// Loads a snapshot written by [`save`](Self::save).
    ///
    /// Returns `None` when the directory holds no snapshot, in which case the
    /// caller should rebuild from the store.
    pub fn load(dir: impl AsRef<Path>) -> SyncResult<Option<Self>> {
        let dir = dir.as_ref();
        if !dir.join(ASSEMBLIES_FILE).exists() {
            return Ok(None);
        }
        let caches = Self {
            assemblies: read_json(&dir.join(ASSEMBLIES_FILE))?,
            allocations: read_json(&dir.join(ALLOCATIONS_FILE))?,
            parameters: read_json(&dir.join(PARAMETERS_FILE))?,
        };
        debug!(
            assemblies = caches.assemblies.len(),
            allocations = caches.allocations.len(),
            parameters = caches.parameters.len(),
            "loaded cache snapshot from {}",
            dir.display()
        );
        Ok(Some(caches))
    }

    /// Writes all three caches as JSON files into `dir`.
    pub fn save(&self, dir: impl AsRef<Path>) -> SyncResult<()> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        write_json(&dir.join(ALLOCATIONS_FILE), &self.allocations)?;
        write_json(&dir.join(PARAMETERS_FILE), &self.parameters)?;
        // written last: its presence marks a complete snapshot
        write_json(&dir.join(ASSEMBLIES_FILE), &self.assemblies)?;
        Ok(())
    }
}

fn read_json<T: DeserializeOwned + Default>(path: &Path) -> SyncResult<T> {
    if !path.exists() {
        return Ok(T::default());
    }
    let raw = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> SyncResult<()> {
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, serde_json::to_vec_pretty(value)?)?;
    fs::rename(&tmp, path)?;
    Ok(())
}
