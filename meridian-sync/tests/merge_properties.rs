mod common;

use common::*;
use meridian_model::{DomainObject, SerializedObject};
use meridian_storage::ObjectStore;
use meridian_types::ModDatetime;
use proptest::prelude::*;

const BASE_MILLIS: i64 = 1_704_067_200_000;

fn at(offset: u32) -> ModDatetime {
    ModDatetime::from_millis(BASE_MILLIS + i64::from(offset) * 1000).unwrap()
}

fn snapshot(h: &Harness) -> Vec<DomainObject> {
    h.store
        .oids()
        .unwrap()
        .iter()
        .filter_map(|o| h.store.get(o).unwrap())
        .collect()
}

/// Organizations `O0..On` and projects pointing at arbitrary (possibly
/// missing) organizations.
fn mixed_batch() -> impl Strategy<Value = Vec<SerializedObject>> {
    (
        prop::collection::btree_set(0u8..6, 0..6),
        prop::collection::vec((0u8..8, 0u32..50), 0..10),
    )
        .prop_map(|(orgs, projects)| {
            let mut batch: Vec<SerializedObject> = orgs
                .into_iter()
                .map(|i| {
                    SerializedObject::new(&format!("O{i}"), "Organization")
                        .stamped(at(0))
                        .with("name", format!("org {i}"))
                })
                .collect();
            for (n, (owner, offset)) in projects.into_iter().enumerate() {
                batch.push(
                    SerializedObject::new(&format!("H{n}"), "Project")
                        .stamped(at(offset))
                        .with("name", format!("project {n}"))
                        .with("owner", format!("O{owner}")),
                );
            }
            batch
        })
}

proptest! {
    #[test]
    fn merging_twice_changes_nothing(batch in mixed_batch()) {
        let mut h = Harness::new();
        h.merge(batch.clone());
        let before = snapshot(&h);

        let again = h.merge(batch);
        prop_assert!(again.created.is_empty());
        prop_assert!(again.updated.is_empty());
        prop_assert!(again.is_noop());
        prop_assert_eq!(snapshot(&h), before);
    }

    #[test]
    fn stored_timestamp_is_the_latest_seen(offsets in prop::collection::vec(0u32..20, 1..12)) {
        let mut h = Harness::new();
        for (n, offset) in offsets.iter().enumerate() {
            h.merge(vec![
                SerializedObject::new("O1", "Organization")
                    .stamped(at(*offset))
                    .with("name", format!("v{n}")),
            ]);
        }

        let max = offsets.iter().copied().max().unwrap();
        // the first edit carrying the latest timestamp wins, later equal ones are ignored
        let winner = offsets.iter().position(|o| *o == max).unwrap();
        let stored = h.get("O1").unwrap();
        prop_assert_eq!(stored.mod_datetime, Some(at(max)));
        let expected = format!("v{winner}");
        prop_assert_eq!(stored.get_str("name"), Some(expected.as_str()));
    }

    #[test]
    fn arrival_order_within_a_batch_does_not_matter(
        shuffled in Just(assembly_batch()).prop_shuffle()
    ) {
        let mut ordered = Harness::new();
        ordered.merge(assembly_batch());

        let mut h = Harness::new();
        let outcome = h.merge(shuffled);
        prop_assert_eq!(outcome.created.len(), 5);
        prop_assert_eq!(snapshot(&h), snapshot(&ordered));
    }

    #[test]
    fn hard_required_references_always_resolve(batch in mixed_batch()) {
        let mut h = Harness::new();
        let outcome = h.merge(batch);

        for obj in snapshot(&h) {
            if obj.object_type == "Project" {
                let owner = obj.get_ref("owner");
                prop_assert!(owner.is_some());
                prop_assert!(h.store.exists(owner.unwrap()).unwrap());
            }
        }
        for rejected in &outcome.rejected {
            prop_assert!(!h.store.exists(rejected).unwrap());
        }
    }
}
