#![allow(dead_code)]

use meridian_model::{
    DomainObject, RefRequirement, SchemaCatalog, SerializedObject, StructuralRole, TypeSchema,
    ValueRecord,
};
use meridian_storage::{MemoryStore, ObjectStore, StorageError, StorageResult};
use meridian_sync::{MergeEngine, MergeOptions, MergeOutcome, TombstoneRegistry};
use meridian_types::{ModDatetime, Oid};
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// A small engineering data model: products assembled from products,
/// projects with top-level systems, and requirements allocated to usages.
pub fn engineering_catalog() -> SchemaCatalog {
    SchemaCatalog::new()
        .with_type(TypeSchema::new("Organization").scalar("name"))
        .with_type(
            TypeSchema::new("Person")
                .scalar("name")
                .reference("org", "Organization", RefRequirement::Optional),
        )
        .with_type(
            TypeSchema::new("Project")
                .scalar("name")
                .reference("owner", "Organization", RefRequirement::HardRequired),
        )
        .with_type(
            TypeSchema::new("Product")
                .scalar("name")
                .date("released")
                .reference("owner", "Organization", RefRequirement::Optional)
                .inverse("where_used", "Acu")
                .with_role(StructuralRole::Product),
        )
        .with_type(
            TypeSchema::new("Acu")
                .scalar("quantity")
                .scalar("reference_designator")
                .reference("assembly", "Product", RefRequirement::HardRequired)
                .reference("component", "Product", RefRequirement::HardRequired)
                .with_role(StructuralRole::AssemblyUsage {
                    assembly: "assembly".into(),
                    component: "component".into(),
                    quantity: Some("quantity".into()),
                }),
        )
        .with_type(
            TypeSchema::new("ProjectSystemUsage")
                .reference("project", "Project", RefRequirement::HardRequired)
                .reference("system", "Product", RefRequirement::HardRequired)
                .with_role(StructuralRole::SystemUsage {
                    project: "project".into(),
                    system: "system".into(),
                }),
        )
        .with_type(
            TypeSchema::new("Port")
                .scalar("name")
                .reference("of_product", "Product", RefRequirement::HardRequired),
        )
        .with_type(
            TypeSchema::new("Requirement")
                .scalar("text")
                .reference("allocated_to", "Acu", RefRequirement::Required)
                .with_role(StructuralRole::Requirement {
                    allocated_to: "allocated_to".into(),
                }),
        )
        .with_rollup_parameters(["m"])
}

/// Routes engine logs to the test output; `RUST_LOG` controls the level.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn engine() -> MergeEngine {
    MergeEngine::new(Arc::new(engineering_catalog())).unwrap()
}

pub fn ts(s: &str) -> ModDatetime {
    ModDatetime::parse(s).unwrap()
}

pub const T1: &str = "2024-01-01T00:00:00Z";
pub const T2: &str = "2024-02-01T00:00:00Z";
pub const T3: &str = "2024-03-01T00:00:00Z";

pub fn oid(s: &str) -> Oid {
    Oid::from(s)
}

pub fn oids(items: &[&str]) -> BTreeSet<Oid> {
    items.iter().map(|s| Oid::from(*s)).collect()
}

// ── Record builders ──────────────────────────────────────────────

pub fn org(id: &str, at: &str) -> SerializedObject {
    SerializedObject::new(id, "Organization")
        .stamped(ts(at))
        .with("name", format!("Org {id}"))
}

pub fn product(id: &str, name: &str, at: &str) -> SerializedObject {
    SerializedObject::new(id, "Product")
        .stamped(ts(at))
        .with("name", name)
}

pub fn product_with_mass(id: &str, mass: f64, at: &str) -> SerializedObject {
    product(id, id, at).with_parameter("m", ValueRecord::new(json!(mass), Some("kg"), Some(ts(at))))
}

pub fn acu(id: &str, assembly: &str, component: &str, quantity: f64, at: &str) -> SerializedObject {
    SerializedObject::new(id, "Acu")
        .stamped(ts(at))
        .with("assembly", assembly)
        .with("component", component)
        .with("quantity", quantity)
}

pub fn project(id: &str, owner: &str, at: &str) -> SerializedObject {
    SerializedObject::new(id, "Project")
        .stamped(ts(at))
        .with("name", format!("Project {id}"))
        .with("owner", owner)
}

pub fn system_usage(id: &str, project: &str, system: &str, at: &str) -> SerializedObject {
    SerializedObject::new(id, "ProjectSystemUsage")
        .stamped(ts(at))
        .with("project", project)
        .with("system", system)
}

pub fn requirement(id: &str, allocated_to: &str, at: &str) -> SerializedObject {
    SerializedObject::new(id, "Requirement")
        .stamped(ts(at))
        .with("text", format!("Requirement {id}"))
        .with("allocated_to", allocated_to)
}

pub fn port(id: &str, of_product: &str, at: &str) -> SerializedObject {
    SerializedObject::new(id, "Port")
        .stamped(ts(at))
        .with("name", format!("Port {id}"))
        .with("of_product", of_product)
}

// ── Harness ──────────────────────────────────────────────────────

/// Engine, store and registry wired together for one test.
pub struct Harness {
    pub engine: MergeEngine,
    pub store: MemoryStore,
    pub tombstones: TombstoneRegistry,
    pub options: MergeOptions,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            engine: engine(),
            store: MemoryStore::new(),
            tombstones: TombstoneRegistry::open_in_memory().unwrap(),
            options: MergeOptions::default(),
        }
    }

    pub fn merge(&mut self, batch: Vec<SerializedObject>) -> MergeOutcome {
        self.engine
            .merge(batch, &mut self.store, &self.tombstones, &self.options)
            .unwrap()
    }

    pub fn get(&self, id: &str) -> Option<DomainObject> {
        self.store.get(&oid(id)).unwrap()
    }

    /// Deletes directly in the store and tombstones the object.
    pub fn delete(&mut self, id: &str) {
        let obj = self.get(id).unwrap();
        self.tombstones
            .record_delete(&obj.oid, &obj.to_serialized(), false)
            .unwrap();
        self.store.begin_unit_of_work().unwrap();
        self.store.delete(&obj.oid).unwrap();
        self.store.commit().unwrap();
    }
}

/// Basic assembly: P1 contains 2 x P2 and 3 x P3.
pub fn assembly_batch() -> Vec<SerializedObject> {
    vec![
        product_with_mass("P1", 1.0, T1),
        product_with_mass("P2", 2.0, T1),
        product_with_mass("P3", 5.0, T1),
        acu("A1", "P1", "P2", 2.0, T1),
        acu("A2", "P1", "P3", 3.0, T1),
    ]
}

// ── Failure injection ────────────────────────────────────────────

/// Fault switches shared with a boxed [`FailingStore`].
#[derive(Clone, Default)]
pub struct StoreFaults {
    commits_fail: Arc<AtomicBool>,
    reads_armed: Arc<AtomicUsize>,
    reads_failing: Arc<AtomicUsize>,
}

impl StoreFaults {
    pub fn fail_commits(&self, on: bool) {
        self.commits_fail.store(on, Ordering::SeqCst);
    }

    /// The next `n` reads after the next successful commit fail.
    pub fn fail_reads_after_commit(&self, n: usize) {
        self.reads_armed.store(n, Ordering::SeqCst);
    }

    pub fn clear(&self) {
        self.commits_fail.store(false, Ordering::SeqCst);
        self.reads_armed.store(0, Ordering::SeqCst);
        self.reads_failing.store(0, Ordering::SeqCst);
    }

    fn commits_fail(&self) -> bool {
        self.commits_fail.load(Ordering::SeqCst)
    }

    fn committed(&self) {
        let armed = self.reads_armed.swap(0, Ordering::SeqCst);
        if armed > 0 {
            self.reads_failing.store(armed, Ordering::SeqCst);
        }
    }

    fn check_read(&self) -> StorageResult<()> {
        let failing = self
            .reads_failing
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        match failing {
            Ok(_) => Err(StorageError::InvalidData("injected read failure".into())),
            Err(_) => Ok(()),
        }
    }
}

/// Store whose commit, n-th write or post-commit reads fail, for rollback
/// and recovery tests.
pub struct FailingStore {
    pub inner: MemoryStore,
    pub fail_commit: bool,
    pub fail_on_write: Option<usize>,
    pub faults: StoreFaults,
    writes: usize,
}

impl FailingStore {
    pub fn new(inner: MemoryStore) -> Self {
        Self {
            inner,
            fail_commit: false,
            fail_on_write: None,
            faults: StoreFaults::default(),
            writes: 0,
        }
    }

    fn count_write(&mut self) -> StorageResult<()> {
        self.writes += 1;
        if self.fail_on_write == Some(self.writes) {
            return Err(StorageError::InvalidData("injected write failure".into()));
        }
        Ok(())
    }
}

impl ObjectStore for FailingStore {
    fn exists(&self, oid: &Oid) -> StorageResult<bool> {
        self.faults.check_read()?;
        self.inner.exists(oid)
    }

    fn get(&self, oid: &Oid) -> StorageResult<Option<DomainObject>> {
        self.faults.check_read()?;
        self.inner.get(oid)
    }

    fn list_by_type(&self, object_type: &str) -> StorageResult<Vec<DomainObject>> {
        self.faults.check_read()?;
        self.inner.list_by_type(object_type)
    }

    fn referrers(&self, oid: &Oid) -> StorageResult<Vec<DomainObject>> {
        self.faults.check_read()?;
        self.inner.referrers(oid)
    }

    fn oids(&self) -> StorageResult<BTreeSet<Oid>> {
        self.faults.check_read()?;
        self.inner.oids()
    }

    fn begin_unit_of_work(&mut self) -> StorageResult<()> {
        self.inner.begin_unit_of_work()
    }

    fn in_unit_of_work(&self) -> bool {
        self.inner.in_unit_of_work()
    }

    fn create(&mut self, object: DomainObject) -> StorageResult<()> {
        self.count_write()?;
        self.inner.create(object)
    }

    fn update(&mut self, object: DomainObject) -> StorageResult<()> {
        self.count_write()?;
        self.inner.update(object)
    }

    fn delete(&mut self, oid: &Oid) -> StorageResult<()> {
        self.count_write()?;
        self.inner.delete(oid)
    }

    fn commit(&mut self) -> StorageResult<()> {
        if self.fail_commit || self.faults.commits_fail() {
            return Err(StorageError::InvalidData("injected commit failure".into()));
        }
        self.inner.commit()?;
        self.faults.committed();
        Ok(())
    }

    fn rollback(&mut self) -> StorageResult<()> {
        self.inner.rollback()
    }
}
