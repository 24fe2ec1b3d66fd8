//! Allocation inline with the CRUD request.

use idclaim_engine::Engine;
use idclaim_kernel::{AllocError, ErrorKind, effective_index_bounds};
use idclaim_store::{Claim, Index, IndexStatus, StoreError};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::hooks::{InvokeError, LifecycleHooks, Resource};

#[derive(Debug, Clone)]
pub struct SyncInvoker {
    engine: Arc<Engine>,
}

impl SyncInvoker {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    fn create_claim(&self, mut claim: Claim) -> Result<Claim, InvokeError> {
        let key = claim.key();
        let store = self.engine.store();
        if store.read(|store| store.claim(&key).is_some())? {
            return Err(StoreError::AlreadyExists {
                kind: "claim",
                key: key.to_string(),
            }
            .into());
        }
        // Positions are stamped with the uid, so it must exist before resolving.
        if claim.meta.uid.is_empty() {
            claim.meta.uid = uuid::Uuid::new_v4().to_string();
        }

        claim.status = self.engine.resolve(&claim)?;
        match store.mutate(|store| store.create_claim(claim.clone())) {
            Ok(created) => Ok(created),
            Err(err) => {
                self.rollback(&claim, None);
                Err(err.into())
            }
        }
    }

    fn update_claim(&self, mut claim: Claim) -> Result<Claim, InvokeError> {
        let key = claim.key();
        let store = self.engine.store();
        let stored = store
            .read(|store| store.claim(&key).cloned())?
            .ok_or_else(|| StoreError::NotFound {
                kind: "claim",
                key: key.to_string(),
            })?;
        if stored.meta.resource_version != claim.meta.resource_version {
            return Err(StoreError::VersionConflict {
                kind: "claim",
                key: key.to_string(),
                expected: claim.meta.resource_version,
                actual: stored.meta.resource_version,
            }
            .into());
        }
        claim.meta.uid = stored.meta.uid.clone();

        claim.status = self.engine.resolve(&claim)?;
        match store.mutate(|store| store.update_claim(claim.clone())) {
            Ok(updated) => Ok(updated),
            Err(err) => {
                self.rollback(&claim, Some(&stored));
                Err(err.into())
            }
        }
    }

    /// Undo a resolution whose claim could not be persisted.
    fn rollback(&self, attempted: &Claim, previous: Option<&Claim>) {
        let result = match previous {
            Some(previous) if previous.status.is_ready() => self.engine.resolve(previous).map(drop),
            _ => self.engine.release(attempted).map(drop),
        };
        if let Err(err) = result {
            warn!(claim = %attempted.key(), error = %err, "rollback after failed persist");
        }
    }

    fn delete_claim(&self, claim: &Claim) -> Result<(), InvokeError> {
        let key = claim.key();
        let store = self.engine.store();
        let Some(stored) = store.read(|store| store.claim(&key).cloned())? else {
            debug!(claim = %key, "claim already deleted");
            return Ok(());
        };
        match self.engine.release(&stored) {
            Ok(_) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!(claim = %key, "index gone; nothing to release");
            }
            Err(err) => return Err(err.into()),
        }
        store.mutate(|store| {
            store.delete_claim(&key);
            Ok::<_, StoreError>(())
        })?;
        Ok(())
    }

    fn apply_index(&self, index: Index, create: bool) -> Result<Index, InvokeError> {
        let key = index.key();
        let store = self.engine.store();
        let rules = index.spec.domain.rules();
        effective_index_bounds(rules.as_ref(), index.spec.min_id, index.spec.max_id)
            .map_err(AllocError::from)?;

        let (persisted, previous) = if create {
            (store.mutate(|store| store.create_index(index))?, None)
        } else {
            let previous = store.read(|store| store.index(&key).cloned())?;
            if let Some(stored) = &previous
                && stored.spec.domain != index.spec.domain
            {
                return Err(AllocError::syntax(format!(
                    "index {key} domain is immutable: {} cannot become {}",
                    stored.spec.domain, index.spec.domain
                ))
                .into());
            }
            (store.mutate(|store| store.update_index(index))?, previous)
        };

        if let Err(err) = self.engine.create_or_update_index(&persisted) {
            self.revert_index(&persisted, previous.as_ref());
            return Err(err.into());
        }
        let recorded = store.mutate(|store| {
            store.set_index_status(
                &key,
                IndexStatus {
                    ready: true,
                    message: None,
                },
            )
        })?;
        Ok(recorded)
    }

    /// Undo an index create or update the engine rejected.
    fn revert_index(&self, attempted: &Index, previous: Option<&Index>) {
        let key = attempted.key();
        let store = self.engine.store();
        let result = match previous {
            Some(previous) => {
                let mut restored = previous.clone();
                restored.meta.resource_version = attempted.meta.resource_version;
                store
                    .mutate(|store| store.update_index(restored))
                    .map_err(AllocError::from)
                    .and_then(|restored| self.engine.create_or_update_index(&restored))
            }
            None => store
                .mutate(|store| {
                    store.delete_index(&key);
                    Ok::<_, AllocError>(())
                })
                .and_then(|()| self.engine.delete_index(&key)),
        };
        match result {
            Ok(()) => debug!(index = %key, "rejected index change reverted"),
            Err(err) => warn!(index = %key, error = %err, "could not revert index"),
        }
    }

    fn delete_index(&self, index: &Index) -> Result<(), InvokeError> {
        let key = index.key();
        // Without the record, resolves can no longer bootstrap the index.
        self.engine.store().mutate(|store| {
            store.delete_index(&key);
            Ok::<_, StoreError>(())
        })?;
        self.engine.delete_index(&key)?;
        Ok(())
    }
}

impl LifecycleHooks for SyncInvoker {
    fn invoke_create(&self, resource: Resource) -> Result<Resource, InvokeError> {
        match resource {
            Resource::Index(index) => self.apply_index(index, true).map(Resource::Index),
            Resource::Claim(claim) => self.create_claim(claim).map(Resource::Claim),
        }
    }

    fn invoke_update(&self, resource: Resource) -> Result<Resource, InvokeError> {
        match resource {
            Resource::Index(index) => self.apply_index(index, false).map(Resource::Index),
            Resource::Claim(claim) => self.update_claim(claim).map(Resource::Claim),
        }
    }

    fn invoke_delete(&self, resource: Resource) -> Result<(), InvokeError> {
        match resource {
            Resource::Index(index) => self.delete_index(&index),
            Resource::Claim(claim) => self.delete_claim(&claim),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use idclaim_kernel::IdentifierDomain;
    use idclaim_store::{ResourceKey, SharedStore};

    fn invoker() -> SyncInvoker {
        let invoker = SyncInvoker::new(Arc::new(Engine::new(Arc::new(SharedStore::in_memory()))));
        invoker
            .invoke_create(Resource::Index(Index::new("default", "vlan", IdentifierDomain::Vlan)))
            .expect("index should create");
        invoker
    }

    fn stored_claim(invoker: &SyncInvoker, name: &str) -> Option<Claim> {
        invoker
            .engine()
            .store()
            .read(|store| store.claim(&ResourceKey::new("default", name)).cloned())
            .expect("read should succeed")
    }

    #[test]
    fn create_persists_resolved_claim() {
        let invoker = invoker();
        let created = invoker
            .invoke_create(Resource::Claim(Claim::new("default", "c1", "vlan").with_id(100)))
            .expect("claim should create");
        let Resource::Claim(created) = created else {
            panic!("expected a claim");
        };
        assert_eq!(created.status.id, Some(100));
        assert!(created.status.is_ready());
        assert!(!created.meta.uid.is_empty());
    }

    #[test]
    fn failed_resolution_persists_nothing() {
        let invoker = invoker();
        invoker
            .invoke_create(Resource::Claim(Claim::new("default", "c2", "vlan").with_id(100)))
            .expect("c2 should create");
        let err = invoker
            .invoke_create(Resource::Claim(Claim::new("default", "c3", "vlan").with_id(100)))
            .expect_err("c3 must conflict");
        assert_eq!(err.failure_class(), "claim_conflict");
        assert!(stored_claim(&invoker, "c3").is_none());
    }

    #[test]
    fn update_requires_current_version_and_moves_the_claim() {
        let invoker = invoker();
        let Resource::Claim(created) = invoker
            .invoke_create(Resource::Claim(Claim::new("default", "c1", "vlan").with_id(10)))
            .expect("create")
        else {
            panic!("expected a claim");
        };

        let mut stale = created.clone().with_id(11);
        stale.meta.resource_version = 0;
        let err = invoker
            .invoke_update(Resource::Claim(stale))
            .expect_err("stale version must fail");
        assert!(err.is_retryable());

        let Resource::Claim(updated) = invoker
            .invoke_update(Resource::Claim(created.with_id(11)))
            .expect("update")
        else {
            panic!("expected a claim");
        };
        assert_eq!(updated.status.id, Some(11));
        let key = ResourceKey::new("default", "vlan");
        assert_eq!(invoker.engine().occupant(&key, 10).expect("index"), None);
    }

    #[test]
    fn delete_is_idempotent() {
        let invoker = invoker();
        invoker
            .invoke_create(Resource::Claim(Claim::new("default", "c1", "vlan")))
            .expect("create");
        let target = Resource::Claim(Claim::new("default", "c1", "vlan"));
        invoker.invoke_delete(target.clone()).expect("first delete");
        invoker.invoke_delete(target).expect("second delete");
        assert!(stored_claim(&invoker, "c1").is_none());
    }

    #[test]
    fn index_bounds_are_validated_before_persisting() {
        let invoker = invoker();
        let err = invoker
            .invoke_create(Resource::Index(
                Index::new("default", "bad", IdentifierDomain::Vlan).with_bounds(Some(10), Some(5)),
            ))
            .expect_err("min above max");
        assert_eq!(err.failure_class(), "claim_out_of_bounds");
        let persisted = invoker
            .engine()
            .store()
            .read(|store| store.index(&ResourceKey::new("default", "bad")).is_some())
            .expect("read");
        assert!(!persisted);
    }

    #[test]
    fn rejected_bound_change_keeps_the_stored_index() {
        let invoker = invoker();
        invoker
            .invoke_create(Resource::Claim(Claim::new("default", "high", "vlan").with_id(4000)))
            .expect("claim should create");
        let key = ResourceKey::new("default", "vlan");
        let stored = invoker
            .engine()
            .store()
            .read(|store| store.index(&key).cloned())
            .expect("read")
            .expect("index exists");

        let err = invoker
            .invoke_update(Resource::Index(stored.clone().with_bounds(None, Some(3000))))
            .expect_err("4000 is held");
        assert_eq!(err.failure_class(), "claim_conflict");

        let after = invoker
            .engine()
            .store()
            .read(|store| store.index(&key).cloned())
            .expect("read")
            .expect("index exists");
        assert_eq!(after.spec, stored.spec);
        assert!(after.status.ready);

        // A restart replays the stored bounds without tripping over 4000.
        let restarted = Engine::new(Arc::clone(invoker.engine().store()));
        assert_eq!(restarted.bootstrap_index(&after).expect("bootstrap"), 1);
    }

    #[test]
    fn rejected_create_leaves_no_index_behind() {
        let invoker = invoker();
        let mut index = Index::new("default", "pool", IdentifierDomain::Vlan);
        for name in ["first", "second"] {
            index.spec.claims.push(idclaim_store::EmbeddedClaim {
                name: name.to_string(),
                fields: idclaim_kernel::ClaimFields::static_id(3),
                labels: Default::default(),
            });
        }
        let err = invoker
            .invoke_create(Resource::Index(index))
            .expect_err("embedded claims collide");
        assert_eq!(err.failure_class(), "claim_conflict");

        let key = ResourceKey::new("default", "pool");
        let (index_left, claims_left) = invoker
            .engine()
            .store()
            .read(|store| {
                (
                    store.index(&key).is_some(),
                    store.claims_in_index("default", "pool").count(),
                )
            })
            .expect("read");
        assert!(!index_left);
        assert_eq!(claims_left, 0);
        assert!(invoker.engine().occupant(&key, 3).is_err());
    }

    #[test]
    fn index_status_reports_readiness() {
        let invoker = invoker();
        let status = invoker
            .engine()
            .store()
            .read(|store| {
                store
                    .index(&ResourceKey::new("default", "vlan"))
                    .map(|index| index.status.clone())
            })
            .expect("read")
            .expect("index exists");
        assert!(status.ready);
    }
}
