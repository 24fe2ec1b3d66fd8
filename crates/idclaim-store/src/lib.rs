//! # idclaim-store
//!
//! Resource layer for identifier allocation state.
//!
//! This crate provides:
//! - `Index`, `Claim` and `Entry` resource types
//! - `MemoryStore` (versioned, deterministic in-memory state)
//! - JSONL read/write and lock-scoped atomic file mutation
//! - `SharedStore`, the handle the engine and invokers share
//!
//! ## Data model
//!
//! ```text
//! JSONL (on disk, one line per resource)
//!     <->  load / save under <path>.lock
//! MemoryStore (key-ordered in-memory projection)
//! ```

pub mod atomic_store;
pub mod claim;
pub mod entry;
pub mod index;
pub mod jsonl;
pub mod memory;
pub mod meta;
pub mod shared;

pub use atomic_store::{AtomicStoreMutationError, mutate_store_jsonl, store_lock_path};
pub use claim::{Claim, ClaimSpec, ClaimStatus, Condition};
pub use entry::{Entry, EntryKey, EntrySpec};
pub use index::{EmbeddedClaim, Index, IndexSpec, IndexStatus};
pub use jsonl::{
    JsonlError, StoredRecord, read_records, read_records_from_path, write_records,
    write_records_to_path,
};
pub use memory::{MemoryStore, StoreError};
pub use meta::{
    DEFAULT_NAMESPACE, LABEL_EMBEDDED_BY, LABEL_INDEX, LABEL_OWNER, LABEL_OWNER_UID,
    ObjectMeta, ResourceKey, SYSTEM_LABEL_PREFIX, labels_match, validate_name,
};
pub use shared::SharedStore;
