use meridian_types::ModDatetime;
use proptest::prelude::*;
use serde_json::json;

// ── Parsing ──────────────────────────────────────────────────────

#[test]
fn parse_rfc3339() {
    let ts = ModDatetime::parse("2024-03-01T12:00:00Z").unwrap();
    assert_eq!(ts.to_rfc3339(), "2024-03-01T12:00:00.000000Z");
}

#[test]
fn parse_rfc3339_with_offset_normalizes_to_utc() {
    let a = ModDatetime::parse("2024-03-01T14:00:00+02:00").unwrap();
    let b = ModDatetime::parse("2024-03-01T12:00:00Z").unwrap();
    assert_eq!(a, b);
}

#[test]
fn parse_naive_space_separated() {
    let ts = ModDatetime::parse("2024-03-01 12:00:00.250000").unwrap();
    assert_eq!(ts.to_rfc3339(), "2024-03-01T12:00:00.250000Z");
}

#[test]
fn parse_naive_without_fraction() {
    let a = ModDatetime::parse("2024-03-01T12:00:00").unwrap();
    let b = ModDatetime::parse("2024-03-01T12:00:00Z").unwrap();
    assert_eq!(a, b);
}

#[test]
fn parse_garbage_fails() {
    assert!(ModDatetime::parse("yesterday").is_err());
    assert!(ModDatetime::parse("").is_err());
}

#[test]
fn from_json_string_and_millis() {
    let a = ModDatetime::from_json(&json!("2024-03-01T12:00:00Z")).unwrap();
    let b = ModDatetime::from_json(&json!(a.timestamp_millis())).unwrap();
    assert_eq!(a, b);
}

#[test]
fn from_json_other_kinds_are_none() {
    assert!(ModDatetime::from_json(&json!(null)).is_none());
    assert!(ModDatetime::from_json(&json!(true)).is_none());
    assert!(ModDatetime::from_json(&json!("not a date")).is_none());
}

// ── Ordering ─────────────────────────────────────────────────────

#[test]
fn ordering_is_chronological() {
    let a = ModDatetime::parse("2024-03-01T12:00:00Z").unwrap();
    let b = ModDatetime::parse("2024-03-01T12:00:01Z").unwrap();
    assert!(a < b);
    assert!(b.is_after(&a));
    assert!(!a.is_after(&b));
}

#[test]
fn equal_timestamps_are_not_after() {
    let a = ModDatetime::parse("2024-03-01T12:00:00Z").unwrap();
    let b = ModDatetime::parse("2024-03-01 12:00:00").unwrap();
    assert_eq!(a, b);
    assert!(!a.is_after(&b));
    assert!(!b.is_after(&a));
}

// ── Serde ────────────────────────────────────────────────────────

#[test]
fn serializes_as_string() {
    let ts = ModDatetime::parse("2024-03-01T12:00:00Z").unwrap();
    let v = serde_json::to_value(ts).unwrap();
    assert_eq!(v, json!("2024-03-01T12:00:00.000000Z"));
}

#[test]
fn deserialize_rejects_invalid_text() {
    let r: Result<ModDatetime, _> = serde_json::from_value(json!("nope"));
    assert!(r.is_err());
}

proptest! {
    #[test]
    fn text_form_preserves_order(a in 0i64..4_000_000_000_000, b in 0i64..4_000_000_000_000) {
        let ta = ModDatetime::from_millis(a).unwrap();
        let tb = ModDatetime::from_millis(b).unwrap();
        let pa = ModDatetime::parse(&ta.to_rfc3339()).unwrap();
        let pb = ModDatetime::parse(&tb.to_rfc3339()).unwrap();
        prop_assert_eq!(ta.cmp(&tb), pa.cmp(&pb));
    }
}
