//! Deferred allocation: persist first, reconcile in a background task.
//!
//! ```text
//! AsyncInvoker ──try_send──▶ bounded mpsc ──▶ Reconciler task ──▶ Engine
//!                                ▲                  │
//!                                └── delayed retry ─┘
//! ```
//!
//! Retryable failures are re-queued with capped exponential backoff; other
//! failures, and retryable ones that run out of attempts, become a `Failed`
//! condition on the claim. A periodic sweep releases and deletes expired
//! claims.

use chrono::Utc;
use idclaim_engine::Engine;
use idclaim_kernel::{AllocError, ErrorKind, effective_index_bounds};
use idclaim_store::{Claim, ClaimStatus, Index, IndexStatus, ResourceKey, StoreError};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::ReconcilerConfig;
use crate::hooks::{InvokeError, LifecycleHooks, Resource};

/// Work the reconciler performs on behalf of a CRUD call.
#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileRequest {
    Index(ResourceKey),
    DeleteIndex(ResourceKey),
    Claim(ResourceKey),
    /// Carries the deleted claim: its identity is needed to free positions.
    ReleaseClaim(Claim),
}

impl ReconcileRequest {
    fn describe(&self) -> String {
        match self {
            Self::Index(key) => format!("index {key}"),
            Self::DeleteIndex(key) => format!("index delete {key}"),
            Self::Claim(key) => format!("claim {key}"),
            Self::ReleaseClaim(claim) => format!("claim release {}", claim.key()),
        }
    }
}

enum Command {
    Reconcile {
        request: ReconcileRequest,
        attempt: u32,
    },
    /// Answered once every command queued before it has been handled.
    Flush(oneshot::Sender<()>),
    Shutdown,
}

/// Counters updated by the reconciler task.
#[derive(Debug, Default)]
pub struct ReconcilerStats {
    reconciled: AtomicU64,
    retried: AtomicU64,
    failed: AtomicU64,
    expired: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcilerStatsSnapshot {
    pub reconciled: u64,
    pub retried: u64,
    pub failed: u64,
    pub expired: u64,
}

impl ReconcilerStats {
    pub fn snapshot(&self) -> ReconcilerStatsSnapshot {
        ReconcilerStatsSnapshot {
            reconciled: self.reconciled.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            expired: self.expired.load(Ordering::Relaxed),
        }
    }
}

pub struct AsyncInvoker {
    engine: Arc<Engine>,
    sender: mpsc::Sender<Command>,
    stats: Arc<ReconcilerStats>,
    task: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for AsyncInvoker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncInvoker")
            .field("stats", &self.stats.snapshot())
            .finish_non_exhaustive()
    }
}

impl AsyncInvoker {
    /// Spawn the reconciler task on the current tokio runtime.
    pub fn start(engine: Arc<Engine>, config: ReconcilerConfig) -> Self {
        let (sender, receiver) = mpsc::channel(config.queue_depth.max(1));
        let stats = Arc::new(ReconcilerStats::default());
        let reconciler = Reconciler {
            engine: Arc::clone(&engine),
            config,
            retry: sender.downgrade(),
            stats: Arc::clone(&stats),
        };
        let task = tokio::spawn(reconciler.run(receiver));
        Self {
            engine,
            sender,
            stats,
            task: parking_lot::Mutex::new(Some(task)),
        }
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    pub fn stats(&self) -> ReconcilerStatsSnapshot {
        self.stats.snapshot()
    }

    /// Queue a request without blocking the caller.
    pub fn enqueue(&self, request: ReconcileRequest) -> Result<(), InvokeError> {
        match self.sender.try_send(Command::Reconcile {
            request,
            attempt: 1,
        }) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("reconcile queue full");
                Err(InvokeError::QueueFull)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(InvokeError::QueueClosed),
        }
    }

    /// Wait until everything queued so far has been handled once.
    /// Delayed retries scheduled meanwhile are not awaited.
    pub async fn flush(&self) -> Result<(), InvokeError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(Command::Flush(tx))
            .await
            .map_err(|_| InvokeError::QueueClosed)?;
        rx.await.map_err(|_| InvokeError::QueueClosed)
    }

    /// Drain the queue and stop the task.
    pub async fn shutdown(&self) {
        let _ = self.sender.send(Command::Shutdown).await;
        let task = self.task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
        info!("reconciler stopped");
    }

    fn create_claim(&self, mut claim: Claim) -> Result<Claim, InvokeError> {
        claim.status = ClaimStatus::default();
        let created = self
            .engine
            .store()
            .mutate(|store| store.create_claim(claim))?;
        self.enqueue(ReconcileRequest::Claim(created.key()))?;
        Ok(created)
    }

    fn update_claim(&self, mut claim: Claim) -> Result<Claim, InvokeError> {
        claim.status = ClaimStatus::default();
        let updated = self
            .engine
            .store()
            .mutate(|store| store.update_claim(claim))?;
        self.enqueue(ReconcileRequest::Claim(updated.key()))?;
        Ok(updated)
    }

    fn delete_claim(&self, claim: &Claim) -> Result<(), InvokeError> {
        let key = claim.key();
        let store = self.engine.store();
        let Some(removed) =
            store.mutate(|store| Ok::<_, StoreError>(store.delete_claim(&key)))?
        else {
            return Ok(());
        };
        if let Err(err) = self.enqueue(ReconcileRequest::ReleaseClaim(removed.clone())) {
            // Same uid, so a retried delete still releases its positions.
            store.mutate(|store| store.create_claim(removed))?;
            warn!(claim = %key, error = %err, "delete not queued; claim restored");
            return Err(err);
        }
        Ok(())
    }

    fn apply_index(&self, index: Index, create: bool) -> Result<Index, InvokeError> {
        let rules = index.spec.domain.rules();
        effective_index_bounds(rules.as_ref(), index.spec.min_id, index.spec.max_id)
            .map_err(AllocError::from)?;
        let store = self.engine.store();
        let persisted = if create {
            store.mutate(|store| store.create_index(index))?
        } else {
            store.mutate(|store| store.update_index(index))?
        };
        self.enqueue(ReconcileRequest::Index(persisted.key()))?;
        Ok(persisted)
    }

    fn delete_index(&self, index: &Index) -> Result<(), InvokeError> {
        let key = index.key();
        self.engine.store().mutate(|store| {
            store.delete_index(&key);
            Ok::<_, StoreError>(())
        })?;
        self.enqueue(ReconcileRequest::DeleteIndex(key))
    }
}

impl LifecycleHooks for AsyncInvoker {
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

/// Background half of [`AsyncInvoker`].
struct Reconciler {
    engine: Arc<Engine>,
    config: ReconcilerConfig,
    /// Weak so the task stops once every invoker handle is gone.
    retry: mpsc::WeakSender<Command>,
    stats: Arc<ReconcilerStats>,
}

impl Reconciler {
    async fn run(self, mut receiver: mpsc::Receiver<Command>) {
        info!(
            queue_depth = self.config.queue_depth,
            max_attempts = self.config.max_attempts,
            "reconciler started"
        );
        let mut sweep = tokio::time::interval(self.config.expiry_sweep());
        sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick fires immediately; skip it.
        sweep.tick().await;

        loop {
            tokio::select! {
                command = receiver.recv() => match command {
                    Some(Command::Reconcile { request, attempt }) => self.handle(request, attempt),
                    Some(Command::Flush(done)) => {
                        let _ = done.send(());
                    }
                    Some(Command::Shutdown) => {
                        receiver.close();
                        while let Ok(command) = receiver.try_recv() {
                            match command {
                                Command::Reconcile { request, attempt } => self.handle(request, attempt),
                                Command::Flush(done) => {
                                    let _ = done.send(());
                                }
                                Command::Shutdown => {}
                            }
                        }
                        debug!("reconciler shutting down");
                        break;
                    }
                    None => {
                        debug!("reconcile channel closed");
                        break;
                    }
                },
                _ = sweep.tick() => self.sweep_expired(),
            }
        }
    }

    fn handle(&self, request: ReconcileRequest, attempt: u32) {
        match self.apply(&request) {
            Ok(()) => {
                self.stats.reconciled.fetch_add(1, Ordering::Relaxed);
                debug!(request = %request.describe(), attempt, "reconciled");
            }
            Err(err) if err.is_retryable() && attempt < self.config.max_attempts => {
                self.stats.retried.fetch_add(1, Ordering::Relaxed);
                let delay = self.config.backoff(attempt);
                debug!(
                    request = %request.describe(),
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "retry scheduled"
                );
                self.schedule_retry(request, attempt + 1, delay);
            }
            Err(err) => {
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                warn!(request = %request.describe(), attempt, error = %err, "reconcile failed");
                self.record_failure(&request, &err);
            }
        }
    }

    /// Queue `request` now if there is room, else from a task that waits for it.
    fn requeue(&self, request: ReconcileRequest) {
        let Some(sender) = self.retry.upgrade() else {
            return;
        };
        let command = Command::Reconcile {
            request,
            attempt: 1,
        };
        match sender.try_send(command) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(command)) => {
                debug!("reconcile queue full; requeue deferred");
                tokio::spawn(async move {
                    let _ = sender.send(command).await;
                });
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }

    fn schedule_retry(&self, request: ReconcileRequest, attempt: u32, delay: std::time::Duration) {
        let retry = self.retry.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(sender) = retry.upgrade() {
                let _ = sender.send(Command::Reconcile { request, attempt }).await;
            }
        });
    }

    fn apply(&self, request: &ReconcileRequest) -> Result<(), AllocError> {
        match request {
            ReconcileRequest::Index(key) => self.reconcile_index(key),
            ReconcileRequest::DeleteIndex(key) => self.engine.delete_index(key),
            ReconcileRequest::Claim(key) => {
                if !self.claim_exists(key)? {
                    debug!(claim = %key, "claim deleted before reconcile");
                    return Ok(());
                }
                self.engine.resolve_and_record(key).map(drop)
            }
            ReconcileRequest::ReleaseClaim(claim) => match self.engine.release(claim) {
                Ok(_) => Ok(()),
                Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
                Err(err) => Err(err),
            },
        }
    }

    fn claim_exists(&self, key: &ResourceKey) -> Result<bool, AllocError> {
        Ok(self
            .engine
            .store()
            .read(|store| store.claim(key).is_some())?)
    }

    fn reconcile_index(&self, key: &ResourceKey) -> Result<(), AllocError> {
        let store = self.engine.store();
        let Some(index) = store.read(|store| store.index(key).cloned())? else {
            debug!(index = %key, "index deleted before reconcile");
            return Ok(());
        };
        self.engine.create_or_update_index(&index)?;
        store.mutate(|store| {
            store.set_index_status(
                key,
                IndexStatus {
                    ready: true,
                    message: None,
                },
            )
        })?;

        // Claims that arrived before the index was ready get another pass.
        let waiting: Vec<ResourceKey> = store.read(|store| {
            store
                .claims_in_index(&key.namespace, &key.name)
                .filter(|claim| !claim.status.is_ready())
                .map(Claim::key)
                .collect()
        })?;
        for claim in waiting {
            self.requeue(ReconcileRequest::Claim(claim));
        }
        Ok(())
    }

    fn record_failure(&self, request: &ReconcileRequest, err: &AllocError) {
        let result = match request {
            ReconcileRequest::Claim(key) => self.engine.record_failure(key, err).map(drop),
            ReconcileRequest::Index(key) => self
                .engine
                .store()
                .mutate(|store| {
                    store.set_index_status(
                        key,
                        IndexStatus {
                            ready: false,
                            message: Some(err.to_string()),
                        },
                    )
                })
                .map(drop)
                .map_err(AllocError::from),
            ReconcileRequest::DeleteIndex(_) | ReconcileRequest::ReleaseClaim(_) => Ok(()),
        };
        if let Err(record_err) = result {
            warn!(request = %request.describe(), error = %record_err, "could not record failure");
        }
    }

    /// Release and delete every claim past its expiry.
    fn sweep_expired(&self) {
        let expired = match self.engine.expired_claims(Utc::now()) {
            Ok(expired) => expired,
            Err(err) => {
                warn!(error = %err, "expiry sweep failed");
                return;
            }
        };
        for key in expired {
            if let Err(err) = self.expire(&key) {
                warn!(claim = %key, error = %err, "could not expire claim");
                continue;
            }
            self.stats.expired.fetch_add(1, Ordering::Relaxed);
            info!(claim = %key, "claim expired");
        }
    }

    fn expire(&self, key: &ResourceKey) -> Result<(), AllocError> {
        let store = self.engine.store();
        let Some(claim) = store.read(|store| store.claim(key).cloned())? else {
            return Ok(());
        };
        match self.engine.release(&claim) {
            Ok(_) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => return Err(err),
        }
        store.mutate(|store| {
            store.delete_claim(key);
            Ok::<_, StoreError>(())
        })?;
        Ok(())
    }
}
