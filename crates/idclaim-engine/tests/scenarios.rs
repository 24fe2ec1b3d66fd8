//! Integration tests: claim lifecycles against a shared in-memory store.
//!
//! Each test drives the engine the way an invoker would: persist the
//! resource, then resolve or release it, then inspect entries and tables.

use idclaim_engine::Engine;
use idclaim_kernel::{AllocError, ErrorKind, IdentifierDomain, OwnerRef, Span};
use idclaim_store::{Claim, ClaimStatus, Index, ResourceKey, SharedStore};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::thread;

struct Harness {
    engine: Arc<Engine>,
}

impl Harness {
    fn new() -> Self {
        Self {
            engine: Arc::new(Engine::new(Arc::new(SharedStore::in_memory()))),
        }
    }

    fn index(&self, index: Index) -> Index {
        let index = self
            .engine
            .store()
            .mutate(|store| store.create_index(index))
            .expect("index should persist");
        self.engine
            .create_or_update_index(&index)
            .expect("index should initialize");
        index
    }

    fn persist(&self, claim: Claim) -> Claim {
        self.engine
            .store()
            .mutate(|store| store.create_claim(claim))
            .expect("claim should persist")
    }

    fn stored(&self, key: &ResourceKey) -> Claim {
        self.engine
            .store()
            .read(|store| store.claim(key).cloned())
            .expect("read should succeed")
            .expect("claim should exist")
    }

    /// Persist an update to `key` and resolve it.
    fn resubmit(&self, key: &ResourceKey, edit: impl FnOnce(&mut Claim)) -> Result<Claim, AllocError> {
        let mut claim = self.stored(key);
        edit(&mut claim);
        self.engine
            .store()
            .mutate(|store| store.update_claim(claim))
            .expect("update should persist");
        self.engine.resolve_and_record(key)
    }

    fn entry_ids(&self, index: &str, owner: &OwnerRef) -> Vec<u64> {
        self.engine
            .store()
            .read(|store| {
                store
                    .entries_owned_by(index, owner)
                    .map(|entry| entry.spec.id)
                    .collect()
            })
            .expect("read should succeed")
    }

    fn holder(&self, index: &str, id: u64) -> Option<String> {
        self.engine
            .occupant(&ResourceKey::new("default", index), id)
            .expect("index should be cached")
            .map(|owner| owner.name)
    }
}

fn vlan() -> Index {
    Index::new("default", "vlan", IdentifierDomain::Vlan)
}

#[test]
fn dynamic_claim_on_unbounded_index_gets_domain_minimum() {
    let h = Harness::new();
    h.index(Index::new("default", "as", IdentifierDomain::As));
    let c1 = h.persist(Claim::new("default", "c1", "as"));

    let resolved = h.engine.resolve_and_record(&c1.key()).expect("c1 should resolve");
    assert_eq!(resolved.status.id, Some(0));
    assert!(resolved.status.is_ready());

    let again = h.engine.resolve_and_record(&c1.key()).expect("c1 should re-resolve");
    assert_eq!(again.status.id, Some(0));
    assert_eq!(h.entry_ids("as", &c1.owner()), vec![0]);
}

#[test]
fn second_static_claim_for_same_id_conflicts() {
    let h = Harness::new();
    h.index(vlan());
    let c2 = h.persist(Claim::new("default", "c2", "vlan").with_id(100));
    let c3 = h.persist(Claim::new("default", "c3", "vlan").with_id(100));

    let resolved = h.engine.resolve_and_record(&c2.key()).expect("c2 should resolve");
    assert_eq!(resolved.status.id, Some(100));

    let err = h.engine.resolve_and_record(&c3.key()).expect_err("c3 must conflict");
    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert_eq!(err.to_string(), "id 100 is already claimed by default/c2");
    assert_eq!(h.stored(&c3.key()).status, ClaimStatus::default());
}

#[test]
fn shrinking_range_frees_only_dropped_positions() {
    let h = Harness::new();
    h.index(vlan());
    let c4 = h.persist(Claim::new("default", "c4", "vlan").with_range("10-19"));

    let resolved = h.engine.resolve_and_record(&c4.key()).expect("c4 should resolve");
    assert_eq!(resolved.status.range.as_deref(), Some("10-19"));
    let before = h
        .engine
        .store()
        .read(|store| {
            store
                .entries_owned_by("vlan", &c4.owner())
                .find(|entry| entry.spec.id == 15)
                .map(|entry| entry.meta.uid.clone())
        })
        .expect("read should succeed");

    let shrunk = h
        .resubmit(&c4.key(), |claim| claim.spec.fields.range = Some("11-19".to_string()))
        .expect("shrink should succeed");
    assert_eq!(shrunk.status.range.as_deref(), Some("11-19"));
    assert_eq!(h.holder("vlan", 10), None);
    assert_eq!(h.entry_ids("vlan", &c4.owner()), (11..=19).collect::<Vec<_>>());

    let after = h
        .engine
        .store()
        .read(|store| {
            store
                .entries_owned_by("vlan", &c4.owner())
                .find(|entry| entry.spec.id == 15)
                .map(|entry| entry.meta.uid.clone())
        })
        .expect("read should succeed");
    assert_eq!(before, after, "unchanged positions keep their entries");
}

#[test]
fn overlapping_range_fails_without_partial_reservation() {
    let h = Harness::new();
    h.index(vlan());
    let c4 = h.persist(Claim::new("default", "c4", "vlan").with_range("10-19"));
    h.engine.resolve_and_record(&c4.key()).expect("c4 should resolve");
    let c5 = h.persist(Claim::new("default", "c5", "vlan").with_range("19-100"));

    let err = h.engine.resolve_and_record(&c5.key()).expect_err("19 is held");
    assert!(matches!(err, AllocError::Conflict { id: 19, .. }));
    for id in [20, 50, 100] {
        assert_eq!(h.holder("vlan", id), None);
    }
    assert!(h.entry_ids("vlan", &c5.owner()).is_empty());
}

#[test]
fn scoped_dynamic_claims_fill_the_range_from_the_bottom() {
    let h = Harness::new();
    h.index(vlan());
    let c4 = h.persist(
        Claim::new("default", "c4", "vlan")
            .with_range("10-19")
            .with_label("pool", "c4"),
    );
    h.engine.resolve_and_record(&c4.key()).expect("c4 should resolve");
    h.resubmit(&c4.key(), |claim| claim.spec.fields.range = Some("11-19".to_string()))
        .expect("shrink should succeed");

    let c6 = h.persist(Claim::new("default", "c6", "vlan").with_selector("pool", "c4"));
    let c7 = h.persist(Claim::new("default", "c7", "vlan").with_selector("pool", "c4"));

    let first = h.engine.resolve_and_record(&c6.key()).expect("c6 should resolve");
    assert_eq!(first.status.id, Some(11));
    let second = h.engine.resolve_and_record(&c7.key()).expect("c7 should resolve");
    assert_eq!(second.status.id, Some(12));

    let scope = h
        .engine
        .store()
        .read(|store| {
            store
                .entries_owned_by("vlan", &c6.owner())
                .map(|entry| entry.spec.scope.clone())
                .collect::<Vec<_>>()
        })
        .expect("read should succeed");
    assert_eq!(scope, vec![Some("c4".to_string())]);

    // The range itself still owns 11 in the index table.
    assert_eq!(h.holder("vlan", 11), Some("c4".to_string()));

    let err = h
        .resubmit(&c4.key(), |claim| claim.spec.fields.range = Some("13-19".to_string()))
        .expect_err("range cannot shrink below its sub-allocations");
    assert!(matches!(err, AllocError::Conflict { id: 11, .. }));
}

#[test]
fn selector_without_matching_range_is_not_found() {
    let h = Harness::new();
    h.index(vlan());
    let c6 = h.persist(Claim::new("default", "c6", "vlan").with_selector("pool", "none"));
    let err = h.engine.resolve_and_record(&c6.key()).expect_err("no scope");
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[test]
fn deleting_an_index_twice_succeeds() {
    let h = Harness::new();
    let index = h.index(Index::new("default", "a", IdentifierDomain::As));
    let c1 = h.persist(Claim::new("default", "c1", "a").with_id(7));
    h.engine.resolve_and_record(&c1.key()).expect("c1 should resolve");

    h.engine.delete_index(&index.key()).expect("first delete");
    h.engine.delete_index(&index.key()).expect("second delete");

    assert!(h.engine.cache().keys().is_empty());
    assert!(h.entry_ids("a", &c1.owner()).is_empty());
}

#[test]
fn changing_static_value_frees_the_old_one() {
    let h = Harness::new();
    h.index(vlan());
    let c2 = h.persist(Claim::new("default", "c2", "vlan").with_id(100));
    h.engine.resolve_and_record(&c2.key()).expect("c2 should resolve");

    let moved = h
        .resubmit(&c2.key(), |claim| claim.spec.fields.id = Some(200))
        .expect("move should succeed");
    assert_eq!(moved.status.id, Some(200));
    assert_eq!(h.holder("vlan", 100), None);
    assert_eq!(h.entry_ids("vlan", &c2.owner()), vec![200]);

    let c3 = h.persist(Claim::new("default", "c3", "vlan").with_id(100));
    h.engine
        .resolve_and_record(&c3.key())
        .expect("100 is free again");
}

#[test]
fn releasing_twice_is_safe() {
    let h = Harness::new();
    h.index(vlan());
    let c1 = h.persist(Claim::new("default", "c1", "vlan").with_range("1-3"));
    h.engine.resolve_and_record(&c1.key()).expect("c1 should resolve");

    assert_eq!(h.engine.release(&c1).expect("first release"), 3);
    assert_eq!(h.engine.release(&c1).expect("second release"), 0);
    assert_eq!(h.holder("vlan", 2), None);

    let orphan = Claim::new("default", "c9", "gone");
    let err = h.engine.release(&orphan).expect_err("unknown index");
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[test]
fn releasing_a_range_drops_its_sub_allocations() {
    let h = Harness::new();
    h.index(vlan());
    let c4 = h.persist(
        Claim::new("default", "c4", "vlan")
            .with_range("10-12")
            .with_label("pool", "c4"),
    );
    h.engine.resolve_and_record(&c4.key()).expect("c4 should resolve");
    let c6 = h.persist(Claim::new("default", "c6", "vlan").with_selector("pool", "c4"));
    h.engine.resolve_and_record(&c6.key()).expect("c6 should resolve");

    assert_eq!(h.engine.release(&c4).expect("release"), 4);
    assert!(h.entry_ids("vlan", &c6.owner()).is_empty());
    assert_eq!(h.holder("vlan", 10), None);

    let orphan = h.stored(&c6.key());
    assert!(!orphan.status.is_ready());
    assert_eq!(orphan.status.id, None);
}

#[test]
fn dynamic_claims_take_lowest_free_value() {
    let h = Harness::new();
    h.index(vlan());
    for (name, id) in [("s0", 0), ("s1", 1), ("s3", 3)] {
        let claim = h.persist(Claim::new("default", name, "vlan").with_id(id));
        h.engine.resolve_and_record(&claim.key()).expect("static should resolve");
    }

    let d1 = h.persist(Claim::new("default", "d1", "vlan"));
    let d2 = h.persist(Claim::new("default", "d2", "vlan"));
    assert_eq!(h.engine.resolve_and_record(&d1.key()).expect("d1").status.id, Some(2));
    assert_eq!(h.engine.resolve_and_record(&d2.key()).expect("d2").status.id, Some(4));
}

#[test]
fn resolved_claims_never_overlap() {
    let h = Harness::new();
    h.index(Index::new("default", "small", IdentifierDomain::Vlan).with_bounds(Some(0), Some(63)));
    let requests: Vec<Claim> = vec![
        Claim::new("default", "r1", "small").with_range("0-9"),
        Claim::new("default", "r2", "small").with_range("5-14"),
        Claim::new("default", "r3", "small").with_range("10-20"),
        Claim::new("default", "s1", "small").with_id(10),
        Claim::new("default", "s2", "small").with_id(21),
        Claim::new("default", "d1", "small"),
        Claim::new("default", "d2", "small"),
        Claim::new("default", "r4", "small").with_range("60-70"),
    ];

    let mut seen: BTreeSet<u64> = BTreeSet::new();
    for claim in requests {
        let claim = h.persist(claim);
        let Ok(resolved) = h.engine.resolve_and_record(&claim.key()) else {
            continue;
        };
        let span = match (resolved.status.id, resolved.status.range.as_deref()) {
            (Some(id), _) => Span::single(id),
            (None, Some(raw)) => idclaim_kernel::parse_range(raw).expect("status range parses"),
            (None, None) => panic!("ready claim without a position"),
        };
        for id in span.ids() {
            assert!(seen.insert(id), "position {id} resolved twice");
        }
    }
    assert!(!seen.contains(&64), "max_id boundary holds");
}

#[test]
fn concurrent_static_claims_have_one_winner() {
    let h = Harness::new();
    h.index(vlan());
    let claims: Vec<Claim> = (0..8)
        .map(|n| h.persist(Claim::new("default", format!("racer-{n}"), "vlan").with_id(42)))
        .collect();

    let handles: Vec<_> = claims
        .into_iter()
        .map(|claim| {
            let engine = Arc::clone(&h.engine);
            thread::spawn(move || engine.resolve(&claim))
        })
        .collect();
    let results: Vec<Result<ClaimStatus, AllocError>> = handles
        .into_iter()
        .map(|handle| handle.join().expect("thread should not panic"))
        .collect();

    let winners = results.iter().filter(|result| result.is_ok()).count();
    assert_eq!(winners, 1);
    assert!(results
        .iter()
        .filter_map(|result| result.as_ref().err())
        .all(|err| err.kind() == ErrorKind::Conflict));
}

#[test]
fn concurrent_release_and_resolve_keep_tables_and_entries_in_step() {
    let h = Harness::new();
    h.index(vlan());
    let holders: Vec<Claim> = (0..8u64)
        .map(|n| {
            let claim = h.persist(Claim::new("default", format!("old-{n}"), "vlan").with_id(100 + n));
            h.engine.resolve_and_record(&claim.key()).expect("holder should resolve");
            claim
        })
        .collect();
    let takers: Vec<Claim> = (0..8u64)
        .map(|n| h.persist(Claim::new("default", format!("new-{n}"), "vlan").with_id(100 + n)))
        .collect();

    let mut handles = Vec::new();
    for (old, new) in holders.into_iter().zip(takers) {
        let engine = Arc::clone(&h.engine);
        handles.push(thread::spawn(move || engine.release(&old).map(drop)));
        let engine = Arc::clone(&h.engine);
        handles.push(thread::spawn(move || {
            loop {
                match engine.resolve(&new) {
                    Err(err) if err.kind() == ErrorKind::Conflict => thread::yield_now(),
                    other => return other.map(drop),
                }
            }
        }));
    }
    for handle in handles {
        handle
            .join()
            .expect("thread should not panic")
            .expect("release and resolve should both land");
    }

    for n in 0..8u64 {
        let id = 100 + n;
        let expected = format!("new-{n}");
        assert_eq!(h.holder("vlan", id), Some(expected.clone()));
        let owners: Vec<String> = h
            .engine
            .store()
            .read(|store| {
                store
                    .entries_of_index("default", "vlan")
                    .filter(|entry| entry.spec.id == id)
                    .map(|entry| entry.spec.owner.name.clone())
                    .collect()
            })
            .expect("read should succeed");
        assert_eq!(owners, vec![expected]);
    }
}
