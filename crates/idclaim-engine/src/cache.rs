//! Per-index allocation tables and their lifecycle.
//!
//! The map of handles and each handle's state sit behind separate locks:
//! work on one index never waits on another index's table.

use idclaim_kernel::{
    AllocError, AllocationTable, DomainRules, IdentifierDomain, OwnerRef, Span, TableFactory,
    interval_table_factory,
};
use idclaim_store::ResourceKey;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Sub-space of a resolved range claim, for selector-scoped dynamic claims.
#[derive(Debug)]
pub struct ScopeTable {
    pub owner: OwnerRef,
    pub table: Box<dyn AllocationTable>,
}

#[derive(Debug)]
pub struct IndexState {
    pub initialized: bool,
    /// Effective `[min_id, max_id]`; the table itself spans the whole domain.
    pub bounds: Span,
    pub table: Box<dyn AllocationTable>,
    /// Keyed by range claim name.
    pub scopes: BTreeMap<String, ScopeTable>,
}

impl IndexState {
    fn empty(factory: &TableFactory, domain: Span) -> Self {
        Self {
            initialized: false,
            bounds: domain,
            table: factory(domain),
            scopes: BTreeMap::new(),
        }
    }

    /// Drop all occupancy and mark the state uninitialized.
    pub fn reset(&mut self, factory: &TableFactory) {
        let domain = self.table.bounds();
        *self = Self::empty(factory, domain);
    }

    /// The table a placement lives in.
    pub fn table_for(&self, scope: Option<&str>) -> Option<&dyn AllocationTable> {
        match scope {
            None => Some(self.table.as_ref()),
            Some(name) => self.scopes.get(name).map(|scope| scope.table.as_ref()),
        }
    }

    pub fn table_for_mut(&mut self, scope: Option<&str>) -> Option<&mut Box<dyn AllocationTable>> {
        match scope {
            None => Some(&mut self.table),
            Some(name) => self.scopes.get_mut(name).map(|scope| &mut scope.table),
        }
    }
}

pub struct IndexHandle {
    key: ResourceKey,
    domain: IdentifierDomain,
    rules: Arc<dyn DomainRules>,
    state: RwLock<IndexState>,
}

impl fmt::Debug for IndexHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexHandle")
            .field("key", &self.key)
            .field("domain", &self.domain)
            .finish_non_exhaustive()
    }
}

impl IndexHandle {
    pub fn key(&self) -> &ResourceKey {
        &self.key
    }

    /// Fixed at creation; an index never changes domain.
    pub fn domain(&self) -> IdentifierDomain {
        self.domain
    }

    pub fn rules(&self) -> &Arc<dyn DomainRules> {
        &self.rules
    }

    pub fn read(&self) -> RwLockReadGuard<'_, IndexState> {
        self.state.read()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, IndexState> {
        self.state.write()
    }

    pub fn is_initialized(&self) -> bool {
        self.state.read().initialized
    }
}

pub struct AllocationCache {
    factory: TableFactory,
    handles: RwLock<BTreeMap<ResourceKey, Arc<IndexHandle>>>,
}

impl fmt::Debug for AllocationCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AllocationCache")
            .field("indexes", &self.keys())
            .finish_non_exhaustive()
    }
}

impl Default for AllocationCache {
    fn default() -> Self {
        Self::new(interval_table_factory())
    }
}

impl AllocationCache {
    pub fn new(factory: TableFactory) -> Self {
        Self {
            factory,
            handles: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn factory(&self) -> &TableFactory {
        &self.factory
    }

    pub fn new_table(&self, bounds: Span) -> Box<dyn AllocationTable> {
        (self.factory)(bounds)
    }

    /// Handle of an initialized index.
    pub fn get(&self, key: &ResourceKey) -> Result<Arc<IndexHandle>, AllocError> {
        let handle = self.get_ignoring_init(key)?;
        if !handle.is_initialized() {
            return Err(AllocError::NotInitialized(key.to_string()));
        }
        Ok(handle)
    }

    /// Handle regardless of bootstrap state, for diagnostics and bootstrap.
    pub fn get_ignoring_init(&self, key: &ResourceKey) -> Result<Arc<IndexHandle>, AllocError> {
        self.handles
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| AllocError::NotFound(format!("index {key}")))
    }

    /// Return the handle for `key`, creating an uninitialized one if absent.
    /// The flag is `true` when this call created it.
    pub fn create(&self, key: &ResourceKey, domain: IdentifierDomain) -> (Arc<IndexHandle>, bool) {
        if let Some(existing) = self.handles.read().get(key) {
            return (Arc::clone(existing), false);
        }

        let mut handles = self.handles.write();
        if let Some(existing) = handles.get(key) {
            return (Arc::clone(existing), false);
        }
        let rules = domain.rules();
        let handle = Arc::new(IndexHandle {
            key: key.clone(),
            domain,
            state: RwLock::new(IndexState::empty(&self.factory, rules.bounds())),
            rules,
        });
        handles.insert(key.clone(), Arc::clone(&handle));
        (handle, true)
    }

    pub fn delete(&self, key: &ResourceKey) -> Option<Arc<IndexHandle>> {
        self.handles.write().remove(key)
    }

    pub fn is_initialized(&self, key: &ResourceKey) -> bool {
        self.get_ignoring_init(key)
            .is_ok_and(|handle| handle.is_initialized())
    }

    pub fn set_initialized(&self, key: &ResourceKey) -> Result<(), AllocError> {
        let handle = self.get_ignoring_init(key)?;
        handle.write().initialized = true;
        Ok(())
    }

    pub fn keys(&self) -> Vec<ResourceKey> {
        self.handles.read().keys().cloned().collect()
    }
}
