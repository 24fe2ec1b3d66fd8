//! Claim resolution against per-index allocation tables.
//!
//! Every mutating operation follows the same shape:
//! 1. validate the request (no state touched)
//! 2. take the index's table write lock
//! 3. plan the placement and check it against current occupancy
//! 4. write entries through the store
//! 5. apply the plan to the table
//!
//! The table lock is always taken before the store lock.

use chrono::{DateTime, Utc};
use idclaim_kernel::{
    AllocError, AllocationTable, ClaimKind, ErrorKind, OwnerRef, Span, TableFactory,
    boundary_spans, effective_index_bounds,
};
use idclaim_store::{
    Claim, ClaimStatus, Entry, EntryKey, Index, LABEL_EMBEDDED_BY, ResourceKey, SharedStore,
    StoreError,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::cache::{AllocationCache, IndexHandle, IndexState, ScopeTable};

/// Where a claim's positions land: a span in the index table or in one
/// range claim's sub-space.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Placement {
    scope: Option<String>,
    span: Span,
}

impl Placement {
    fn unscoped(span: Span) -> Self {
        Self { scope: None, span }
    }

    fn holds(&self, scope: Option<&str>, id: u64) -> bool {
        self.scope.as_deref() == scope && self.span.contains(id)
    }

    fn status(&self, kind: ClaimKind) -> ClaimStatus {
        match kind {
            ClaimKind::Range { span } => ClaimStatus::ready_range(span),
            ClaimKind::StaticId { .. } | ClaimKind::Dynamic => {
                ClaimStatus::ready_id(self.span.start)
            }
        }
    }
}

/// Widest range a single claim may request. Each position becomes one
/// entry record.
pub const DEFAULT_MAX_RANGE_LEN: u64 = 65_536;

#[derive(Debug)]
pub struct Engine {
    cache: AllocationCache,
    store: Arc<SharedStore>,
    max_range_len: u64,
}

impl Engine {
    pub fn new(store: Arc<SharedStore>) -> Self {
        Self::with_table_factory(store, idclaim_kernel::interval_table_factory())
    }

    pub fn with_table_factory(store: Arc<SharedStore>, factory: TableFactory) -> Self {
        Self {
            cache: AllocationCache::new(factory),
            store,
            max_range_len: DEFAULT_MAX_RANGE_LEN,
        }
    }

    pub fn with_max_range_len(mut self, max_range_len: u64) -> Self {
        self.max_range_len = max_range_len;
        self
    }

    pub fn max_range_len(&self) -> u64 {
        self.max_range_len
    }

    pub fn store(&self) -> &Arc<SharedStore> {
        &self.store
    }

    pub fn cache(&self) -> &AllocationCache {
        &self.cache
    }

    // ── Index lifecycle ──

    /// Bring the cache in line with `index`: bootstrap on first sight,
    /// (re)place boundary pseudo-claims, then materialize embedded claims.
    pub fn create_or_update_index(&self, index: &Index) -> Result<(), AllocError> {
        let key = index.key();
        let rules = index.spec.domain.rules();
        let effective = effective_index_bounds(rules.as_ref(), index.spec.min_id, index.spec.max_id)?;

        let (handle, created) = self.cache.create(&key, index.spec.domain);
        check_domain(&handle, index)?;
        {
            let mut state = handle.write();
            if created || !state.initialized {
                let replayed = self.replay(&handle, &mut state)?;
                state.initialized = true;
                info!(index = %key, domain = %index.spec.domain, replayed, "index bootstrapped");
            }
            apply_bounds(&mut state, &key, effective)?;
        }
        debug!(index = %key, bounds = %effective, "index bounds applied");

        self.sync_embedded_claims(index)
    }

    /// Rebuild the table from persisted entries and mark it initialized.
    pub fn bootstrap_index(&self, index: &Index) -> Result<usize, AllocError> {
        let (_, replayed) = self.bootstrap(index, true)?;
        Ok(replayed)
    }

    /// Replay under the table lock. Without `force`, an index some other
    /// caller already initialized is left alone.
    fn bootstrap(&self, index: &Index, force: bool) -> Result<(Arc<IndexHandle>, usize), AllocError> {
        let key = index.key();
        let rules = index.spec.domain.rules();
        let effective = effective_index_bounds(rules.as_ref(), index.spec.min_id, index.spec.max_id)?;

        let (handle, _) = self.cache.create(&key, index.spec.domain);
        check_domain(&handle, index)?;
        let replayed = {
            let mut state = handle.write();
            if state.initialized && !force {
                return Ok((Arc::clone(&handle), 0));
            }
            let replayed = self.replay(&handle, &mut state)?;
            apply_bounds(&mut state, &key, effective)?;
            state.initialized = true;
            replayed
        };
        info!(index = %key, replayed, "index bootstrapped");
        Ok((handle, replayed))
    }

    /// Forget the index: cache entry, entries, embedded claims. Deleting an
    /// unknown index succeeds.
    pub fn delete_index(&self, key: &ResourceKey) -> Result<(), AllocError> {
        let handle = self.cache.get_ignoring_init(key).ok();
        let _state = handle.as_ref().map(|handle| handle.write());

        let (entries, embedded) = self.store.mutate(|store| {
            let entries = store.delete_entries_of_index(&key.namespace, &key.name);
            let embedded: Vec<ResourceKey> = store
                .claims_in_index(&key.namespace, &key.name)
                .filter(|claim| is_embedded_by(claim, &key.name))
                .map(Claim::key)
                .collect();
            for claim in &embedded {
                store.delete_claim(claim);
            }
            Ok::<_, AllocError>((entries, embedded.len()))
        })?;
        self.cache.delete(key);

        if handle.is_some() || entries > 0 {
            info!(index = %key, entries, embedded, "index deleted");
        } else {
            debug!(index = %key, "index already absent");
        }
        Ok(())
    }

    // ── Claims ──

    /// Resolve `claim` against its index and commit the placement.
    ///
    /// Positions the claim already holds and still requests are left as
    /// they are; positions it no longer requests are freed in the same step.
    pub fn resolve(&self, claim: &Claim) -> Result<ClaimStatus, AllocError> {
        let index_key = claim.index_key();
        let handle = self.handle_for(&index_key)?;
        let kind = handle
            .rules()
            .classify_and_validate(&claim.spec.fields)?;
        if let ClaimKind::Range { span } = kind
            && span.len() > u128::from(self.max_range_len)
        {
            return Err(AllocError::bounds(format!(
                "range {span} spans {} positions, more than the limit of {}",
                span.len(),
                self.max_range_len
            )));
        }

        let mut guard = handle.write();
        if !guard.initialized {
            return Err(AllocError::NotInitialized(index_key.to_string()));
        }
        let state = &mut *guard;
        let owner = claim.owner();

        let placement = self.plan(state, claim, kind, &owner)?;
        check_placement(state, &placement, &owner)?;
        check_sub_allocations(state, claim, kind, &owner)?;

        let user_labels = claim.meta.user_labels();
        let rules = Arc::clone(handle.rules());
        let index = claim.spec.index.as_str();
        let (removed, written) = self.store.mutate(|store| {
            let stale: Vec<EntryKey> = store
                .entries_owned_by(index, &owner)
                .filter(|entry| !placement.holds(entry.spec.scope.as_deref(), entry.spec.id))
                .map(Entry::key)
                .collect();
            for key in &stale {
                store.delete_entry(key);
            }
            let mut written = 0usize;
            for id in placement.span.ids() {
                let entry = Entry::build(
                    index,
                    placement.scope.as_deref(),
                    rules.build_entry(id),
                    &owner,
                    &user_labels,
                );
                if store.upsert_entry(entry) {
                    written += 1;
                }
            }
            Ok::<_, AllocError>((stale.len(), written))
        })?;

        self.apply_placement(state, claim, kind, &owner, &placement)?;

        info!(
            index = %index_key,
            claim = %claim.key(),
            kind = kind.as_str(),
            scope = placement.scope.as_deref().unwrap_or("-"),
            span = %placement.span,
            removed,
            written,
            "claim resolved"
        );
        Ok(placement.status(kind))
    }

    /// Read a claim, resolve it and write its status back, guarded by the
    /// version it was read at.
    pub fn resolve_and_record(&self, key: &ResourceKey) -> Result<Claim, AllocError> {
        let claim = self
            .store
            .read(|store| store.claim(key).cloned())?
            .ok_or_else(|| AllocError::NotFound(format!("claim {key}")))?;
        let status = self.resolve(&claim)?;
        let recorded = self.store.mutate(|store| {
            store.set_claim_status(key, status, Some(claim.meta.resource_version))
        })?;
        Ok(recorded)
    }

    /// Record `err` as the claim's failed condition.
    pub fn record_failure(&self, key: &ResourceKey, err: &AllocError) -> Result<Claim, AllocError> {
        let status = ClaimStatus::failed(
            err.kind().failure_class(),
            err.to_string(),
            err.is_retryable(),
        );
        warn!(claim = %key, error = %err, "claim failed");
        Ok(self
            .store
            .mutate(|store| store.set_claim_status(key, status, None))?)
    }

    /// Free every position the claim holds, including its sub-space and
    /// whatever was allocated inside it. Claims that held a position in the
    /// sub-space lose it in the same store write and are marked failed.
    /// Returns how many entries were removed.
    pub fn release(&self, claim: &Claim) -> Result<usize, AllocError> {
        let index_key = claim.index_key();
        let handle = self.handle_for(&index_key)?;
        let mut guard = handle.write();
        if !guard.initialized {
            return Err(AllocError::NotInitialized(index_key.to_string()));
        }
        let state = &mut *guard;
        let owner = claim.owner();
        let own_scope = state
            .scopes
            .get(&claim.meta.name)
            .filter(|scope| scope.owner == owner)
            .map(|_| claim.meta.name.clone());

        let index = claim.spec.index.as_str();
        let (removed, orphaned) = self.store.mutate(|store| {
            let mut orphaned: Vec<ResourceKey> = Vec::new();
            let keys: Vec<EntryKey> = store
                .entries_of_index(&owner.namespace, index)
                .filter(|entry| {
                    entry.spec.owner == owner
                        || (own_scope.is_some() && entry.spec.scope == own_scope)
                })
                .inspect(|entry| {
                    let holder = &entry.spec.owner;
                    if *holder != owner {
                        let key = ResourceKey::new(holder.namespace.clone(), holder.name.clone());
                        if !orphaned.contains(&key) {
                            orphaned.push(key);
                        }
                    }
                })
                .map(Entry::key)
                .collect();
            for key in &keys {
                store.delete_entry(key);
            }
            for child in &orphaned {
                let status = ClaimStatus::failed(
                    ErrorKind::NotFound.failure_class(),
                    format!("range claim {} was released", claim.key()),
                    false,
                );
                match store.set_claim_status(child, status, None) {
                    Ok(_) | Err(StoreError::NotFound { .. }) => {}
                    Err(err) => return Err(AllocError::from(err)),
                }
            }
            Ok::<_, AllocError>((keys.len(), orphaned))
        })?;

        let freed = state.table.free_owner(&owner).len();
        for scope in state.scopes.values_mut() {
            scope.table.free_owner(&owner);
        }
        if let Some(name) = &own_scope {
            state.scopes.remove(name);
        }

        for child in &orphaned {
            warn!(index = %index_key, claim = %child, range = %claim.key(), "sub-allocation dropped with its range");
        }
        if removed > 0 || freed > 0 {
            info!(index = %index_key, claim = %claim.key(), removed, "claim released");
        } else {
            debug!(index = %index_key, claim = %claim.key(), "claim held nothing");
        }
        Ok(removed)
    }

    /// Keys of claims whose expiry is at or before `now`.
    pub fn expired_claims(&self, now: DateTime<Utc>) -> Result<Vec<ResourceKey>, AllocError> {
        Ok(self.store.read(|store| store.expired_claims(now))?)
    }

    /// Current holder of one position in an index table.
    pub fn occupant(&self, index: &ResourceKey, id: u64) -> Result<Option<OwnerRef>, AllocError> {
        let handle = self.cache.get_ignoring_init(index)?;
        let state = handle.read();
        Ok(state.table.owner_of(id))
    }

    // ── Internals ──

    /// Initialized handle for `key`. A persisted index this engine has not
    /// seen yet is bootstrapped on first use.
    fn handle_for(&self, key: &ResourceKey) -> Result<Arc<IndexHandle>, AllocError> {
        if let Ok(handle) = self.cache.get(key) {
            return Ok(handle);
        }
        let index = self
            .store
            .read(|store| store.index(key).cloned())?
            .ok_or_else(|| AllocError::NotFound(format!("index {key}")))?;
        let (handle, _) = self.bootstrap(&index, false)?;
        Ok(handle)
    }

    fn plan(
        &self,
        state: &IndexState,
        claim: &Claim,
        kind: ClaimKind,
        owner: &OwnerRef,
    ) -> Result<Placement, AllocError> {
        match kind {
            ClaimKind::StaticId { id } => Ok(Placement::unscoped(Span::single(id))),
            ClaimKind::Range { span } => Ok(Placement::unscoped(span)),
            ClaimKind::Dynamic => match claim.scope_selector() {
                None => {
                    if let Some(held) = state.table.spans_of(owner).first() {
                        return Ok(Placement::unscoped(Span::single(held.start)));
                    }
                    state
                        .table
                        .first_free(state.bounds)
                        .map(|id| Placement::unscoped(Span::single(id)))
                        .ok_or_else(|| AllocError::Exhausted {
                            scope: format!("index {}", claim.index_key()),
                        })
                }
                Some(selector) => self.plan_scoped(state, claim, selector, owner),
            },
        }
    }

    fn plan_scoped(
        &self,
        state: &IndexState,
        claim: &Claim,
        selector: &BTreeMap<String, String>,
        owner: &OwnerRef,
    ) -> Result<Placement, AllocError> {
        let ranges: Vec<String> = self.store.read(|store| {
            store
                .claims_matching(&claim.meta.namespace, &claim.spec.index, selector)
                .into_iter()
                .filter(|candidate| {
                    candidate.spec.fields.range.is_some() && candidate.spec.fields.id.is_none()
                })
                .map(|candidate| candidate.meta.name.clone())
                .collect()
        })?;
        if ranges.is_empty() {
            return Err(AllocError::NotFound(format!(
                "no range claim in {} matches selector {}",
                claim.index_key(),
                format_selector(selector)
            )));
        }

        let eligible: Vec<(&String, &ScopeTable)> = ranges
            .iter()
            .filter_map(|name| state.scopes.get_key_value(name))
            .collect();

        for (name, scope) in &eligible {
            if let Some(held) = scope.table.spans_of(owner).first() {
                return Ok(Placement {
                    scope: Some((*name).clone()),
                    span: Span::single(held.start),
                });
            }
        }

        eligible
            .iter()
            .filter_map(|(name, scope)| {
                scope
                    .table
                    .first_free(scope.table.bounds())
                    .map(|id| (id, *name))
            })
            .min()
            .map(|(id, name)| Placement {
                scope: Some(name.clone()),
                span: Span::single(id),
            })
            .ok_or_else(|| AllocError::Exhausted {
                scope: format!("selector {}", format_selector(selector)),
            })
    }

    /// Apply a checked placement to the tables. Cannot conflict: every
    /// position was verified free or already ours.
    fn apply_placement(
        &self,
        state: &mut IndexState,
        claim: &Claim,
        kind: ClaimKind,
        owner: &OwnerRef,
        placement: &Placement,
    ) -> Result<(), AllocError> {
        free_dropped(state.table.as_mut(), owner, placement, None);
        for (name, scope) in state.scopes.iter_mut() {
            free_dropped(scope.table.as_mut(), owner, placement, Some(name));
        }

        let table = state
            .table_for_mut(placement.scope.as_deref())
            .ok_or_else(|| AllocError::NotFound(format!("scope {:?}", placement.scope)))?;
        table.reserve(placement.span, owner)?;

        let name = &claim.meta.name;
        match kind {
            ClaimKind::Range { span } => {
                let current = state
                    .scopes
                    .get(name)
                    .is_some_and(|scope| scope.owner == *owner && scope.table.bounds() == span);
                if !current {
                    let mut table = self.cache.new_table(span);
                    if let Some(previous) = state.scopes.remove(name) {
                        for (segment, child) in previous.table.occupants(previous.table.bounds()) {
                            table.reserve(segment, &child)?;
                        }
                    }
                    state.scopes.insert(
                        name.clone(),
                        ScopeTable {
                            owner: owner.clone(),
                            table,
                        },
                    );
                }
            }
            ClaimKind::StaticId { .. } | ClaimKind::Dynamic => {
                if state
                    .scopes
                    .get(name)
                    .is_some_and(|scope| scope.owner == *owner)
                {
                    state.scopes.remove(name);
                }
            }
        }
        Ok(())
    }

    /// Load the index's persisted entries into a fresh table.
    fn replay(&self, handle: &IndexHandle, state: &mut IndexState) -> Result<usize, AllocError> {
        state.reset(self.cache.factory());
        let key = handle.key();
        let (entries, ranges, orphans) = self.store.read(|store| {
            let live: Vec<OwnerRef> = store
                .claims_in_index(&key.namespace, &key.name)
                .map(Claim::owner)
                .collect();
            let (entries, orphans): (Vec<Entry>, Vec<Entry>) = store
                .entries_of_index(&key.namespace, &key.name)
                .cloned()
                .partition(|entry| live.contains(&entry.spec.owner));
            let ranges: Vec<(String, OwnerRef)> = store
                .claims_in_index(&key.namespace, &key.name)
                .filter(|claim| claim.spec.fields.range.is_some())
                .map(|claim| (claim.meta.name.clone(), claim.owner()))
                .collect();
            (entries, ranges, orphans)
        })?;
        for entry in &orphans {
            warn!(index = %key, entry = %entry.meta.name, owner = %entry.spec.owner, "skipping entry of a deleted claim");
        }

        let (scoped, unscoped): (Vec<Entry>, Vec<Entry>) = entries
            .into_iter()
            .partition(|entry| entry.spec.scope.is_some());

        let mut replayed = 0usize;
        for entry in &unscoped {
            match state.table.reserve_id(entry.spec.id, &entry.spec.owner) {
                Ok(()) => replayed += 1,
                Err(err) => warn!(index = %key, entry = %entry.meta.name, error = %err, "skipping entry"),
            }
        }

        for (name, owner) in ranges {
            let spans = state.table.spans_of(&owner);
            if let (Some(first), Some(last)) = (spans.first(), spans.last())
                && let Some(span) = Span::new(first.start, last.end)
            {
                let table = self.cache.new_table(span);
                state.scopes.insert(name, ScopeTable { owner, table });
            }
        }

        for entry in &scoped {
            let Some(table) = state.table_for_mut(entry.spec.scope.as_deref()) else {
                warn!(index = %key, entry = %entry.meta.name, "skipping entry without scope");
                continue;
            };
            match table.reserve_id(entry.spec.id, &entry.spec.owner) {
                Ok(()) => replayed += 1,
                Err(err) => warn!(index = %key, entry = %entry.meta.name, error = %err, "skipping entry"),
            }
        }
        Ok(replayed)
    }

    /// Upsert the index's embedded claims, resolve each, and drop the ones
    /// no longer listed. Every claim is attempted; the first failure is
    /// returned.
    fn sync_embedded_claims(&self, index: &Index) -> Result<(), AllocError> {
        let index_name = index.meta.name.clone();
        let desired: Vec<Claim> = index
            .spec
            .claims
            .iter()
            .map(|embedded| {
                let mut claim = Claim::new(
                    index.meta.namespace.clone(),
                    index.embedded_claim_name(embedded),
                    index_name.clone(),
                );
                claim.spec.fields = embedded.fields.clone();
                claim.meta.labels = embedded.labels.clone();
                claim
                    .meta
                    .labels
                    .insert(LABEL_EMBEDDED_BY.to_string(), index_name.clone());
                claim
            })
            .collect();

        let (keys, stale) = self.store.mutate(|store| {
            let mut keys = Vec::with_capacity(desired.len());
            for wanted in &desired {
                let key = wanted.key();
                match store.claim(&key) {
                    Some(existing)
                        if existing.spec.fields == wanted.spec.fields
                            && existing.meta.labels == wanted.meta.labels => {}
                    Some(existing) => {
                        let mut updated = existing.clone();
                        updated.spec.fields = wanted.spec.fields.clone();
                        updated.meta.labels = wanted.meta.labels.clone();
                        store.update_claim(updated)?;
                    }
                    None => {
                        store.create_claim(wanted.clone())?;
                    }
                }
                keys.push(key);
            }
            let stale: Vec<Claim> = store
                .claims_in_index(&index.meta.namespace, &index_name)
                .filter(|claim| is_embedded_by(claim, &index_name) && !keys.contains(&claim.key()))
                .cloned()
                .collect();
            Ok::<_, AllocError>((keys, stale))
        })?;

        for claim in &stale {
            self.release(claim)?;
            self.store.mutate(|store| {
                store.delete_claim(&claim.key());
                Ok::<_, AllocError>(())
            })?;
            info!(index = %index.key(), claim = %claim.key(), "embedded claim removed");
        }

        let mut first_err = None;
        for key in &keys {
            if let Err(err) = self.resolve_and_record(key) {
                self.record_failure(key, &err)?;
                first_err.get_or_insert(err);
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}

fn check_domain(handle: &IndexHandle, index: &Index) -> Result<(), AllocError> {
    if handle.domain() != index.spec.domain {
        return Err(AllocError::syntax(format!(
            "index {} domain is immutable: {} cannot become {}",
            index.key(),
            handle.domain(),
            index.spec.domain
        )));
    }
    Ok(())
}

fn is_embedded_by(claim: &Claim, index: &str) -> bool {
    claim.meta.labels.get(LABEL_EMBEDDED_BY).map(String::as_str) == Some(index)
}

fn format_selector(selector: &BTreeMap<String, String>) -> String {
    selector
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// Place the boundary pseudo-claims for `effective`, replacing earlier ones.
fn apply_bounds(state: &mut IndexState, key: &ResourceKey, effective: Span) -> Result<(), AllocError> {
    let (below, above) = boundary_spans(state.table.bounds(), effective);
    for span in [below, above].into_iter().flatten() {
        if let Some((segment, holder)) = state
            .table
            .occupants(span)
            .into_iter()
            .find(|(_, holder)| !holder.is_boundary())
        {
            return Err(AllocError::Conflict {
                id: segment.start,
                owner: holder.to_string(),
            });
        }
    }

    let lower = OwnerRef::lower_boundary(key.namespace.clone(), &key.name);
    let upper = OwnerRef::upper_boundary(key.namespace.clone(), &key.name);
    state.table.free_owner(&lower);
    state.table.free_owner(&upper);
    if let Some(span) = below {
        state.table.reserve(span, &lower)?;
    }
    if let Some(span) = above {
        state.table.reserve(span, &upper)?;
    }
    state.bounds = effective;
    Ok(())
}

/// Every target position must be free or already held by `owner`.
fn check_placement(state: &IndexState, placement: &Placement, owner: &OwnerRef) -> Result<(), AllocError> {
    let table = state
        .table_for(placement.scope.as_deref())
        .ok_or_else(|| AllocError::NotFound(format!("scope {:?}", placement.scope)))?;
    if !table.bounds().covers(&placement.span) {
        return Err(AllocError::bounds(format!(
            "{} is outside {}",
            placement.span,
            table.bounds()
        )));
    }
    match table
        .occupants(placement.span)
        .into_iter()
        .find(|(_, holder)| holder != owner)
    {
        Some((segment, holder)) => Err(AllocError::Conflict {
            id: segment.start,
            owner: holder.to_string(),
        }),
        None => Ok(()),
    }
}

/// A range claim cannot move or shrink away from positions allocated
/// inside it, nor stop being a range while it has any.
fn check_sub_allocations(
    state: &IndexState,
    claim: &Claim,
    kind: ClaimKind,
    owner: &OwnerRef,
) -> Result<(), AllocError> {
    let Some(scope) = state
        .scopes
        .get(&claim.meta.name)
        .filter(|scope| scope.owner == *owner)
    else {
        return Ok(());
    };
    let keep = match kind {
        ClaimKind::Range { span } => Some(span),
        ClaimKind::StaticId { .. } | ClaimKind::Dynamic => None,
    };
    for (segment, child) in scope.table.occupants(scope.table.bounds()) {
        if !keep.is_some_and(|span| span.covers(&segment)) {
            return Err(AllocError::Conflict {
                id: segment.start,
                owner: child.to_string(),
            });
        }
    }
    Ok(())
}

/// Free what `owner` holds in `table` outside the placement.
fn free_dropped(
    table: &mut dyn AllocationTable,
    owner: &OwnerRef,
    placement: &Placement,
    scope: Option<&String>,
) {
    let same_table = placement.scope.as_ref() == scope;
    for held in table.spans_of(owner) {
        if same_table {
            for rest in held.subtract(&placement.span) {
                table.free(rest);
            }
        } else {
            table.free(held);
        }
    }
}
