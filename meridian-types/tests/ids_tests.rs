use meridian_types::Oid;
use std::collections::HashSet;

#[test]
fn new_rejects_empty() {
    assert!(Oid::new("").is_none());
    assert!(Oid::new("   ").is_none());
}

#[test]
fn new_keeps_text_verbatim() {
    let oid = Oid::new("test:P1").unwrap();
    assert_eq!(oid.as_str(), "test:P1");
    assert_eq!(oid.to_string(), "test:P1");
}

#[test]
fn parse_roundtrip() {
    let oid: Oid = "abc".parse().unwrap();
    assert_eq!(oid, Oid::from("abc"));
    assert!("".parse::<Oid>().is_err());
}

#[test]
fn generated_ids_are_unique() {
    let ids: HashSet<Oid> = (0..1000).map(|_| Oid::generate()).collect();
    assert_eq!(ids.len(), 1000);
}

#[test]
fn generated_ids_sort_by_creation() {
    let a = Oid::generate();
    std::thread::sleep(std::time::Duration::from_millis(2));
    let b = Oid::generate();
    assert!(a < b);
}

#[test]
fn serde_is_transparent() {
    let oid = Oid::from("P1");
    assert_eq!(serde_json::to_string(&oid).unwrap(), "\"P1\"");
    let back: Oid = serde_json::from_str("\"P1\"").unwrap();
    assert_eq!(back, oid);
}

#[test]
fn borrow_as_str_for_lookups() {
    let set: HashSet<Oid> = [Oid::from("P1")].into_iter().collect();
    assert!(set.contains("P1"));
}
