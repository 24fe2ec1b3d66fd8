//! Canonical in-memory representation of indexes, claims and entries.
//!
//! This is the persistence boundary the engine talks to:
//! - create/update/delete with optimistic concurrency (`resource_version`)
//! - deterministic, key-ordered listing and selector queries
//! - load/store JSONL

use chrono::{DateTime, Utc};
use idclaim_kernel::{AllocError, OwnerRef};
use std::collections::BTreeMap;
use std::path::Path;

use crate::claim::{Claim, ClaimStatus};
use crate::entry::{Entry, EntryKey};
use crate::index::{Index, IndexStatus};
use crate::jsonl::{JsonlError, StoredRecord, read_records_from_path, write_records_to_path};
use crate::meta::{ObjectMeta, ResourceKey, labels_match, validate_name};

#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error(transparent)]
    Jsonl(#[from] JsonlError),

    #[error("{kind} not found: {key}")]
    NotFound { kind: &'static str, key: String },

    #[error("{kind} already exists: {key}")]
    AlreadyExists { kind: &'static str, key: String },

    #[error("version conflict on {kind} {key}: expected {expected}, stored {actual}")]
    VersionConflict {
        kind: &'static str,
        key: String,
        expected: u64,
        actual: u64,
    },

    #[error("invalid name {name:?}: {reason}")]
    InvalidName { name: String, reason: String },

    #[error("store lock {lock_path}: {message}")]
    Lock {
        lock_path: String,
        message: String,
        busy: bool,
    },
}

impl StoreError {
    /// Version conflicts and a busy lock resolve by re-reading and retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::VersionConflict { .. } | Self::Lock { busy: true, .. }
        )
    }
}

impl From<StoreError> for AllocError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { kind, key } => AllocError::NotFound(format!("{kind} {key}")),
            other => AllocError::Store {
                retryable: other.is_retryable(),
                message: other.to_string(),
            },
        }
    }
}

/// Stored resources with versioned metadata.
trait Versioned: Clone {
    const KIND: &'static str;
    fn meta(&self) -> &ObjectMeta;
    fn meta_mut(&mut self) -> &mut ObjectMeta;
}

impl Versioned for Index {
    const KIND: &'static str = "index";
    fn meta(&self) -> &ObjectMeta {
        &self.meta
    }
    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.meta
    }
}

impl Versioned for Claim {
    const KIND: &'static str = "claim";
    fn meta(&self) -> &ObjectMeta {
        &self.meta
    }
    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.meta
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    indexes: BTreeMap<ResourceKey, Index>,
    claims: BTreeMap<ResourceKey, Claim>,
    entries: BTreeMap<EntryKey, Entry>,
    /// Monotonic write counter; each write stamps it as the new version.
    revision: u64,
}

impl MemoryStore {
    /// Build a store from persisted records.
    ///
    /// Duplicate keys are resolved last-write-wins, matching append/overlay
    /// behavior of JSONL files.
    pub fn from_records(records: Vec<StoredRecord>) -> Self {
        let mut store = Self::default();
        for record in records {
            let version = match &record {
                StoredRecord::Index(index) => index.meta.resource_version,
                StoredRecord::Claim(claim) => claim.meta.resource_version,
                StoredRecord::Entry(entry) => entry.meta.resource_version,
            };
            store.revision = store.revision.max(version);
            match record {
                StoredRecord::Index(index) => {
                    store.indexes.insert(index.key(), index);
                }
                StoredRecord::Claim(claim) => {
                    store.claims.insert(claim.key(), claim);
                }
                StoredRecord::Entry(entry) => {
                    store.entries.insert(entry.key(), entry);
                }
            }
        }
        store
    }

    /// Every record in deterministic order: indexes, claims, entries.
    pub fn records(&self) -> Vec<StoredRecord> {
        self.indexes
            .values()
            .cloned()
            .map(StoredRecord::Index)
            .chain(self.claims.values().cloned().map(StoredRecord::Claim))
            .chain(self.entries.values().cloned().map(StoredRecord::Entry))
            .collect()
    }

    pub fn load_jsonl(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        Ok(Self::from_records(read_records_from_path(path)?))
    }

    pub fn save_jsonl(&self, path: impl AsRef<Path>) -> Result<(), StoreError> {
        write_records_to_path(path, &self.records())?;
        Ok(())
    }

    /// Bumped by every write, including deletes.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    fn next_revision(&mut self) -> u64 {
        self.revision += 1;
        self.revision
    }

    // ── Indexes ──

    pub fn index(&self, key: &ResourceKey) -> Option<&Index> {
        self.indexes.get(key)
    }

    pub fn indexes(&self) -> impl Iterator<Item = &Index> {
        self.indexes.values()
    }

    pub fn create_index(&mut self, index: Index) -> Result<Index, StoreError> {
        let revision = self.next_revision();
        create_in(&mut self.indexes, index, revision)
    }

    /// Replace an index; `resource_version` must match the stored one.
    pub fn update_index(&mut self, index: Index) -> Result<Index, StoreError> {
        let revision = self.next_revision();
        update_in(&mut self.indexes, index, revision)
    }

    pub fn set_index_status(
        &mut self,
        key: &ResourceKey,
        status: IndexStatus,
    ) -> Result<Index, StoreError> {
        let revision = self.next_revision();
        let index = self
            .indexes
            .get_mut(key)
            .ok_or_else(|| not_found::<Index>(key))?;
        index.status = status;
        index.meta.resource_version = revision;
        Ok(index.clone())
    }

    pub fn delete_index(&mut self, key: &ResourceKey) -> Option<Index> {
        let removed = self.indexes.remove(key);
        if removed.is_some() {
            self.next_revision();
        }
        removed
    }

    // ── Claims ──

    pub fn claim(&self, key: &ResourceKey) -> Option<&Claim> {
        self.claims.get(key)
    }

    pub fn claims(&self) -> impl Iterator<Item = &Claim> {
        self.claims.values()
    }

    pub fn create_claim(&mut self, claim: Claim) -> Result<Claim, StoreError> {
        validate_name(&claim.spec.index).map_err(|reason| StoreError::InvalidName {
            name: claim.spec.index.clone(),
            reason,
        })?;
        let revision = self.next_revision();
        create_in(&mut self.claims, claim, revision)
    }

    /// Replace a claim; `resource_version` must match the stored one.
    pub fn update_claim(&mut self, claim: Claim) -> Result<Claim, StoreError> {
        let revision = self.next_revision();
        update_in(&mut self.claims, claim, revision)
    }

    /// Write a claim's status, optionally guarded by the version the caller
    /// read it at.
    pub fn set_claim_status(
        &mut self,
        key: &ResourceKey,
        status: ClaimStatus,
        expected_version: Option<u64>,
    ) -> Result<Claim, StoreError> {
        let revision = self.next_revision();
        let claim = self
            .claims
            .get_mut(key)
            .ok_or_else(|| not_found::<Claim>(key))?;
        if let Some(expected) = expected_version
            && claim.meta.resource_version != expected
        {
            return Err(StoreError::VersionConflict {
                kind: Claim::KIND,
                key: key.to_string(),
                expected,
                actual: claim.meta.resource_version,
            });
        }
        claim.status = status;
        claim.meta.resource_version = revision;
        Ok(claim.clone())
    }

    pub fn delete_claim(&mut self, key: &ResourceKey) -> Option<Claim> {
        let removed = self.claims.remove(key);
        if removed.is_some() {
            self.next_revision();
        }
        removed
    }

    /// Claims of one index, in key order.
    pub fn claims_in_index<'a>(
        &'a self,
        namespace: &'a str,
        index: &'a str,
    ) -> impl Iterator<Item = &'a Claim> + 'a {
        self.claims
            .values()
            .filter(move |claim| claim.meta.namespace == namespace && claim.spec.index == index)
    }

    /// Claims of one index whose labels contain every selector pair.
    pub fn claims_matching<'a>(
        &'a self,
        namespace: &'a str,
        index: &'a str,
        selector: &BTreeMap<String, String>,
    ) -> Vec<&'a Claim> {
        self.claims_in_index(namespace, index)
            .filter(|claim| labels_match(selector, &claim.meta.labels))
            .collect()
    }

    pub fn expired_claims(&self, now: DateTime<Utc>) -> Vec<ResourceKey> {
        self.claims
            .values()
            .filter(|claim| claim.is_expired_at(now))
            .map(Claim::key)
            .collect()
    }

    // ── Entries ──

    pub fn entry(&self, key: &EntryKey) -> Option<&Entry> {
        self.entries.get(key)
    }

    /// Insert or refresh an entry. Returns `true` when anything changed.
    pub fn upsert_entry(&mut self, mut entry: Entry) -> bool {
        let key = entry.key();
        if let Some(existing) = self.entries.get(&key)
            && existing.same_content(&entry)
        {
            return false;
        }
        if let Some(existing) = self.entries.get(&key) {
            entry.meta.uid = existing.meta.uid.clone();
            entry.meta.created_at = existing.meta.created_at;
        } else {
            entry.meta.uid = uuid::Uuid::new_v4().to_string();
        }
        entry.meta.resource_version = self.next_revision();
        self.entries.insert(key, entry);
        true
    }

    pub fn delete_entry(&mut self, key: &EntryKey) -> Option<Entry> {
        let removed = self.entries.remove(key);
        if removed.is_some() {
            self.next_revision();
        }
        removed
    }

    pub fn entries(&self) -> impl Iterator<Item = &Entry> {
        self.entries.values()
    }

    /// Entries of one index in (scope, id) order.
    pub fn entries_of_index<'a>(
        &'a self,
        namespace: &'a str,
        index: &'a str,
    ) -> impl Iterator<Item = &'a Entry> + 'a {
        self.entries
            .values()
            .filter(move |entry| entry.meta.namespace == namespace && entry.spec.index == index)
    }

    pub fn entries_owned_by<'a>(
        &'a self,
        index: &'a str,
        owner: &'a OwnerRef,
    ) -> impl Iterator<Item = &'a Entry> + 'a {
        self.entries_of_index(&owner.namespace, index)
            .filter(move |entry| &entry.spec.owner == owner)
    }

    /// Remove every entry of an index; returns how many were removed.
    pub fn delete_entries_of_index(&mut self, namespace: &str, index: &str) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|key, _| !(key.namespace == namespace && key.index == index));
        let removed = before - self.entries.len();
        if removed > 0 {
            self.next_revision();
        }
        removed
    }
}

fn not_found<R: Versioned>(key: &ResourceKey) -> StoreError {
    StoreError::NotFound {
        kind: R::KIND,
        key: key.to_string(),
    }
}

fn check_names(meta: &ObjectMeta) -> Result<(), StoreError> {
    for name in [&meta.namespace, &meta.name] {
        validate_name(name).map_err(|reason| StoreError::InvalidName {
            name: name.clone(),
            reason,
        })?;
    }
    Ok(())
}

fn create_in<R: Versioned>(
    map: &mut BTreeMap<ResourceKey, R>,
    mut resource: R,
    revision: u64,
) -> Result<R, StoreError> {
    check_names(resource.meta())?;
    let key = resource.meta().key();
    if map.contains_key(&key) {
        return Err(StoreError::AlreadyExists {
            kind: R::KIND,
            key: key.to_string(),
        });
    }
    let meta = resource.meta_mut();
    if meta.uid.is_empty() {
        meta.uid = uuid::Uuid::new_v4().to_string();
    }
    meta.resource_version = revision;
    meta.created_at = Utc::now();
    map.insert(key, resource.clone());
    Ok(resource)
}

fn update_in<R: Versioned>(
    map: &mut BTreeMap<ResourceKey, R>,
    mut resource: R,
    revision: u64,
) -> Result<R, StoreError> {
    let key = resource.meta().key();
    let stored = map.get(&key).ok_or_else(|| not_found::<R>(&key))?;
    let expected = resource.meta().resource_version;
    let actual = stored.meta().resource_version;
    if expected != actual {
        return Err(StoreError::VersionConflict {
            kind: R::KIND,
            key: key.to_string(),
            expected,
            actual,
        });
    }
    let (uid, created_at) = (stored.meta().uid.clone(), stored.meta().created_at);
    let meta = resource.meta_mut();
    meta.uid = uid;
    meta.created_at = created_at;
    meta.resource_version = revision;
    map.insert(key, resource.clone());
    Ok(resource)
}
