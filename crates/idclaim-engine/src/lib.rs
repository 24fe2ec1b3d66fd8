//! # idclaim-engine
//!
//! The allocation core. Owns one [`AllocationCache`] of per-index tables and
//! resolves claims against them, keeping the store's entries in step.
//!
//! ```text
//! Claim ──classify/validate──▶ plan ──check──▶ entries (store) ──▶ table
//!                                  ▲
//!                      AllocationCache (per-index RwLock)
//! ```
//!
//! Callers never see a half-applied claim: validation and conflict checks
//! finish before the store or the table changes.

pub mod cache;
pub mod engine;

pub use cache::{AllocationCache, IndexHandle, IndexState, ScopeTable};
pub use engine::{DEFAULT_MAX_RANGE_LEN, Engine};
