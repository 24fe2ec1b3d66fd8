//! # idclaim kernel
//!
//! Pure allocation vocabulary shared by every other crate: identifier
//! domains and their bounds, claim classification and validation, the
//! `"start-end"` range format, owner identity, the error taxonomy, and the
//! [`AllocationTable`] capability with its interval-map implementation.
//!
//! ## Layering
//!
//! ```text
//! IdentifierDomain  → DomainRules (bounds, classify, render)
//!     │
//! ClaimFields       → ClaimKind { StaticId | Range | Dynamic }
//!     │
//! AllocationTable   ← reserve / free / occupants / first_free
//! ```
//!
//! Nothing here locks, persists, or logs; that belongs to `idclaim-engine`.

pub mod claim;
pub mod domain;
pub mod error;
pub mod owner;
pub mod span;
pub mod table;

pub use claim::{ClaimFields, ClaimKind, classify_and_validate};
pub use domain::{
    AsRules, DomainRules, EntrySeed, ExtCommunityRules, ExtCommunitySubtype, GenericRules,
    GenericWidth, IdentifierDomain, VlanRules, boundary_spans, effective_index_bounds,
};
pub use error::{
    AllocError, ErrorKind, FAILURE_CLASS_BOUNDS, FAILURE_CLASS_CONFLICT,
    FAILURE_CLASS_INITIALIZING, FAILURE_CLASS_NOT_FOUND, FAILURE_CLASS_STORE,
    FAILURE_CLASS_SYNTAX, ValidationErrors, ValidationIssue,
};
pub use owner::{OwnerKind, OwnerRef};
pub use span::{Span, parse_range};
pub use table::{
    AllocationTable, IntervalTable, TableError, TableFactory, interval_table_factory,
};
