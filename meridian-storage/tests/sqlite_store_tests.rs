use meridian_model::{DomainObject, ValueRecord};
use meridian_storage::{ObjectStore, SqliteStore, StorageError};
use meridian_types::{ModDatetime, Oid};
use pretty_assertions::assert_eq;
use serde_json::json;
use tempfile::TempDir;

fn product(oid: &str, name: &str) -> DomainObject {
    let mut obj = DomainObject::new(Oid::from(oid), "Product");
    obj.mod_datetime = Some(ModDatetime::parse("2024-03-01T12:00:00Z").unwrap());
    obj.fields.insert("name".into(), json!(name));
    obj.parameters.insert(
        "m".into(),
        ValueRecord::new(json!(2.5), Some("kg"), obj.mod_datetime),
    );
    obj
}

fn acu(oid: &str, assembly: &str, component: Option<&str>) -> DomainObject {
    let mut obj = DomainObject::new(Oid::from(oid), "Acu");
    obj.refs.insert("assembly".into(), Some(Oid::from(assembly)));
    obj.refs.insert("component".into(), component.map(Oid::from));
    obj
}

fn insert(store: &mut SqliteStore, objects: Vec<DomainObject>) {
    store.begin_unit_of_work().unwrap();
    for obj in objects {
        store.create(obj).unwrap();
    }
    store.commit().unwrap();
}

#[test]
fn create_then_get_roundtrips_body() {
    let mut store = SqliteStore::open_in_memory().unwrap();
    let original = product("P1", "Widget");
    insert(&mut store, vec![original.clone()]);
    assert_eq!(store.get(&Oid::from("P1")).unwrap(), Some(original));
    assert_eq!(store.get(&Oid::from("missing")).unwrap(), None);
}

#[test]
fn writes_outside_unit_rejected() {
    let mut store = SqliteStore::open_in_memory().unwrap();
    assert!(matches!(
        store.create(product("P1", "Widget")),
        Err(StorageError::NoUnitOfWork)
    ));
    assert!(matches!(store.rollback(), Err(StorageError::NoUnitOfWork)));
}

#[test]
fn rollback_restores_previous_state() {
    let mut store = SqliteStore::open_in_memory().unwrap();
    insert(&mut store, vec![product("P1", "Widget")]);

    store.begin_unit_of_work().unwrap();
    store.create(product("P2", "Gadget")).unwrap();
    store.update(product("P1", "Renamed")).unwrap();
    assert!(store.exists(&Oid::from("P2")).unwrap());
    store.rollback().unwrap();

    assert!(!store.exists(&Oid::from("P2")).unwrap());
    let p1 = store.get(&Oid::from("P1")).unwrap().unwrap();
    assert_eq!(p1.get_str("name"), Some("Widget"));
}

#[test]
fn list_by_type_is_ordered() {
    let mut store = SqliteStore::open_in_memory().unwrap();
    insert(
        &mut store,
        vec![
            product("P2", "b"),
            product("P1", "a"),
            acu("A1", "P1", Some("P2")),
        ],
    );
    let names: Vec<String> = store
        .list_by_type("Product")
        .unwrap()
        .into_iter()
        .map(|o| o.oid.to_string())
        .collect();
    assert_eq!(names, vec!["P1", "P2"]);
    assert_eq!(store.oids().unwrap().len(), 3);
}

#[test]
fn referrer_index_tracks_updates_and_deletes() {
    let mut store = SqliteStore::open_in_memory().unwrap();
    insert(
        &mut store,
        vec![
            product("P1", "a"),
            product("P2", "b"),
            acu("A1", "P1", Some("P2")),
            acu("A2", "P1", None),
        ],
    );
    assert_eq!(store.referrers(&Oid::from("P1")).unwrap().len(), 2);
    assert_eq!(store.referrers(&Oid::from("P2")).unwrap().len(), 1);

    store.begin_unit_of_work().unwrap();
    store.update(acu("A1", "P2", None)).unwrap();
    store.delete(&Oid::from("A2")).unwrap();
    store.commit().unwrap();

    assert!(store.referrers(&Oid::from("P1")).unwrap().is_empty());
    let to_p2 = store.referrers(&Oid::from("P2")).unwrap();
    assert_eq!(to_p2.len(), 1);
    assert_eq!(to_p2[0].oid, Oid::from("A1"));
}

#[test]
fn delete_missing_is_not_found() {
    let mut store = SqliteStore::open_in_memory().unwrap();
    store.begin_unit_of_work().unwrap();
    assert!(matches!(
        store.delete(&Oid::from("nope")),
        Err(StorageError::NotFound(_))
    ));
}

#[test]
fn persists_across_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("objects.db");
    {
        let mut store = SqliteStore::open(&path).unwrap();
        insert(&mut store, vec![product("P1", "Widget")]);
    }
    let store = SqliteStore::open(&path).unwrap();
    let p1 = store.get(&Oid::from("P1")).unwrap().unwrap();
    assert_eq!(p1.parameter_f64("m"), Some(2.5));
}

#[test]
fn uncommitted_unit_lost_on_close() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("objects.db");
    {
        let mut store = SqliteStore::open(&path).unwrap();
        store.begin_unit_of_work().unwrap();
        store.create(product("P1", "Widget")).unwrap();
    }
    let store = SqliteStore::open(&path).unwrap();
    assert!(!store.exists(&Oid::from("P1")).unwrap());
}
