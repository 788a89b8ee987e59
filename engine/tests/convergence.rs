//! Property tests for the merge rule.
//!
//! Replicas that receive the same versions, in any order and any number of
//! times, must end up holding the same object.

use loopsync_engine::{
    fields, merge, Domain, MemoryStore, ObjectKey, Replica, SchemaRegistry, SyncableObject,
};
use proptest::prelude::*;
use std::collections::HashSet;
use std::sync::Arc;

fn replica() -> Replica {
    Replica::new(
        SchemaRegistry::with_schema(Domain::Theme.schema()),
        Arc::new(MemoryStore::new()),
    )
}

fn theme(version: u64, ts: u64, scheme: &str) -> SyncableObject {
    SyncableObject::new(
        "theme",
        "t1",
        fields! { "colorScheme" => scheme, "isDarkMode" => version % 2 == 0 },
        ts,
    )
    .with_revision(version, ts)
}

fn stored(replica: &Replica) -> Option<SyncableObject> {
    replica.get(&ObjectKey::new("theme", "t1")).unwrap()
}

fn arb_scheme() -> impl Strategy<Value = &'static str> {
    prop_oneof![
        Just("green"),
        Just("purple"),
        Just("crimson"),
        Just("material"),
    ]
}

/// Versions of one object with pairwise distinct revisions.
fn arb_versions() -> impl Strategy<Value = Vec<SyncableObject>> {
    prop::collection::vec((1u64..20, 1000u64..1010, arb_scheme()), 1..12).prop_map(|raw| {
        let mut seen = HashSet::new();
        raw.into_iter()
            .filter(|(v, ts, _)| seen.insert((*v, *ts)))
            .map(|(v, ts, scheme)| theme(v, ts, scheme))
            .collect()
    })
}

proptest! {
    #[test]
    fn prop_apply_is_idempotent(versions in arb_versions()) {
        let once = replica();
        let twice = replica();
        for obj in &versions {
            once.apply(obj.clone()).unwrap();
            twice.apply(obj.clone()).unwrap();
            twice.apply(obj.clone()).unwrap();
        }
        prop_assert_eq!(stored(&once), stored(&twice));
    }

    #[test]
    fn prop_stored_revision_never_decreases(versions in arb_versions()) {
        let replica = replica();
        let mut high = None;
        for obj in versions {
            replica.apply(obj).unwrap();
            let rev = stored(&replica).unwrap().revision();
            if let Some(prev) = high {
                prop_assert!(rev >= prev);
            }
            high = Some(rev);
        }
    }

    #[test]
    fn prop_order_does_not_matter(versions in arb_versions(), seed in any::<u64>()) {
        let forward = replica();
        for obj in &versions {
            forward.apply(obj.clone()).unwrap();
        }

        // Deterministic shuffle driven by the seed
        let mut shuffled = versions.clone();
        let mut state = seed | 1;
        for i in (1..shuffled.len()).rev() {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            shuffled.swap(i, (state % (i as u64 + 1)) as usize);
        }
        let backward = replica();
        for obj in shuffled {
            backward.apply(obj).unwrap();
        }

        prop_assert_eq!(stored(&forward), stored(&backward));
    }

    #[test]
    fn prop_winner_has_highest_revision(versions in arb_versions()) {
        let replica = replica();
        for obj in &versions {
            replica.apply(obj.clone()).unwrap();
        }
        let expected = versions.iter().max_by_key(|o| o.revision()).cloned();
        prop_assert_eq!(stored(&replica), expected.clone());
        prop_assert_eq!(merge::resolve(versions.iter()).cloned(), expected);
    }

    #[test]
    fn prop_two_replicas_converge_after_exchange(
        left in arb_versions(),
        right in arb_versions(),
    ) {
        // Drop cross-side revision collisions; equal revisions with different
        // payloads keep whichever arrived first.
        let left_revs: HashSet<_> = left.iter().map(|o| o.revision()).collect();
        let right: Vec<_> = right
            .into_iter()
            .filter(|o| !left_revs.contains(&o.revision()))
            .collect();

        let a = replica();
        let b = replica();
        for obj in &left {
            a.apply(obj.clone()).unwrap();
        }
        for obj in &right {
            b.apply(obj.clone()).unwrap();
        }

        // One reconciliation: each side sends its snapshot
        let from_a = a.snapshot("theme").unwrap();
        let from_b = b.snapshot("theme").unwrap();
        for obj in from_b {
            a.apply(obj).unwrap();
        }
        for obj in from_a {
            b.apply(obj).unwrap();
        }

        prop_assert_eq!(stored(&a), stored(&b));
    }
}

#[test]
fn tie_keeps_first_arrival() {
    let a = replica();
    a.apply(theme(3, 1000, "green")).unwrap();
    a.apply(theme(3, 1000, "purple")).unwrap();
    assert_eq!(
        stored(&a).unwrap().get("colorScheme").unwrap().as_str(),
        Some("green")
    );
}
