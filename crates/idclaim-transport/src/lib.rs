//! # idclaim-transport
//!
//! Adapters between a resource API and the allocation engine.
//!
//! - [`SyncInvoker`]: allocate inside the create/update/delete call
//! - [`AsyncInvoker`]: persist, then let a background reconciler allocate
//! - [`InvokerConfig`]: TOML configuration for either mode
//! - [`dispatch_json`]: JSON request/envelope surface over any [`LifecycleHooks`]

pub mod config;
pub mod dispatch;
pub mod hooks;
pub mod reconciler;
pub mod sync;

pub use config::{ConfigError, InvokerConfig, InvokerMode, ReconcilerConfig};
pub use dispatch::{
    DISPATCH_KIND, DISPATCH_SCHEMA, DispatchEnvelope, FAILURE_CLASS_INVALID_PAYLOAD,
    FAILURE_CLASS_INVALID_REQUEST, FAILURE_CLASS_UNKNOWN_ACTION, dispatch, dispatch_json,
};
pub use hooks::{FAILURE_CLASS_QUEUE_UNAVAILABLE, InvokeError, LifecycleHooks, Resource};
pub use reconciler::{AsyncInvoker, ReconcileRequest, ReconcilerStats, ReconcilerStatsSnapshot};
pub use sync::SyncInvoker;
