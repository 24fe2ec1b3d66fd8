//! The lifecycle surface a resource API calls into.

use idclaim_kernel::{AllocError, FAILURE_CLASS_NOT_FOUND, FAILURE_CLASS_STORE};
use idclaim_store::{Claim, Index, ResourceKey, StoreError};
use serde::{Deserialize, Serialize};

pub const FAILURE_CLASS_QUEUE_UNAVAILABLE: &str = "reconcile_queue_unavailable";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Resource {
    Index(Index),
    Claim(Claim),
}

impl Resource {
    pub fn key(&self) -> ResourceKey {
        match self {
            Self::Index(index) => index.key(),
            Self::Claim(claim) => claim.key(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Index(_) => "index",
            Self::Claim(_) => "claim",
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum InvokeError {
    #[error(transparent)]
    Alloc(#[from] AllocError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("reconcile queue is full")]
    QueueFull,

    #[error("reconcile queue is closed")]
    QueueClosed,
}

impl InvokeError {
    pub fn failure_class(&self) -> &'static str {
        match self {
            Self::Alloc(err) => err.kind().failure_class(),
            Self::Store(StoreError::NotFound { .. }) => FAILURE_CLASS_NOT_FOUND,
            Self::Store(_) => FAILURE_CLASS_STORE,
            Self::QueueFull | Self::QueueClosed => FAILURE_CLASS_QUEUE_UNAVAILABLE,
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Alloc(err) => err.is_retryable(),
            Self::Store(err) => err.is_retryable(),
            Self::QueueFull => true,
            Self::QueueClosed => false,
        }
    }
}

/// Create/update/delete triggers for indexes and claims.
///
/// Implementations decide when allocation happens relative to persistence;
/// both share one engine.
pub trait LifecycleHooks: Send + Sync {
    fn invoke_create(&self, resource: Resource) -> Result<Resource, InvokeError>;

    /// `resource.meta.resource_version` must match the stored copy.
    fn invoke_update(&self, resource: Resource) -> Result<Resource, InvokeError>;

    /// Deleting something already gone succeeds.
    fn invoke_delete(&self, resource: Resource) -> Result<(), InvokeError>;
}
