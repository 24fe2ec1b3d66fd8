//! Error taxonomy for claim resolution.

use serde::{Deserialize, Serialize};

/// Coarse error class, used by adapters to pick retry policy and failure
/// classes without matching every variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Syntax,
    Bounds,
    Conflict,
    NotInitialized,
    NotFound,
    Store,
}

pub const FAILURE_CLASS_SYNTAX: &str = "claim_syntax_invalid";
pub const FAILURE_CLASS_BOUNDS: &str = "claim_out_of_bounds";
pub const FAILURE_CLASS_CONFLICT: &str = "claim_conflict";
pub const FAILURE_CLASS_INITIALIZING: &str = "index_initializing";
pub const FAILURE_CLASS_NOT_FOUND: &str = "resource_not_found";
pub const FAILURE_CLASS_STORE: &str = "store_failure";

impl ErrorKind {
    /// Stable caller-facing failure class.
    pub fn failure_class(&self) -> &'static str {
        match self {
            Self::Syntax => FAILURE_CLASS_SYNTAX,
            Self::Bounds => FAILURE_CLASS_BOUNDS,
            Self::Conflict => FAILURE_CLASS_CONFLICT,
            Self::NotInitialized => FAILURE_CLASS_INITIALIZING,
            Self::NotFound => FAILURE_CLASS_NOT_FOUND,
            Self::Store => FAILURE_CLASS_STORE,
        }
    }
}

/// One problem found while validating a claim or index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum ValidationIssue {
    /// Malformed input: bad range string, both variant fields set.
    #[error("{0}")]
    Syntax(String),

    /// Value outside the domain (or index) bounds, or `start > end`.
    #[error("{0}")]
    Bounds(String),
}

impl ValidationIssue {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Syntax(_) => ErrorKind::Syntax,
            Self::Bounds(_) => ErrorKind::Bounds,
        }
    }
}

/// Aggregated validation report. Never empty when returned as an error.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationErrors {
    pub issues: Vec<ValidationIssue>,
}

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn syntax(&mut self, message: impl Into<String>) {
        self.issues.push(ValidationIssue::Syntax(message.into()));
    }

    pub fn bounds(&mut self, message: impl Into<String>) {
        self.issues.push(ValidationIssue::Bounds(message.into()));
    }

    pub fn is_empty(&self) -> bool {
        self.issues.is_empty()
    }

    /// Syntax wins over bounds when both are present.
    pub fn kind(&self) -> ErrorKind {
        if self
            .issues
            .iter()
            .any(|issue| issue.kind() == ErrorKind::Syntax)
        {
            ErrorKind::Syntax
        } else {
            ErrorKind::Bounds
        }
    }

    /// `Ok(())` when no issue was recorded.
    pub fn into_result(self) -> Result<(), Self> {
        if self.is_empty() { Ok(()) } else { Err(self) }
    }
}

impl std::fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, issue) in self.issues.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{issue}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationErrors {}

/// Errors raised by classification, validation and allocation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AllocError {
    #[error("invalid claim: {0}")]
    Validation(#[from] ValidationErrors),

    /// A requested position is held by a different owner.
    #[error("id {id} is already claimed by {owner}")]
    Conflict { id: u64, owner: String },

    /// No free position left in the searched space.
    #[error("no free id left in {scope}")]
    Exhausted { scope: String },

    /// The index table has not finished bootstrap; retry later.
    #[error("index {0} is initializing")]
    NotInitialized(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("store error: {message}")]
    Store { message: String, retryable: bool },
}

impl AllocError {
    pub fn syntax(message: impl Into<String>) -> Self {
        let mut errors = ValidationErrors::new();
        errors.syntax(message);
        Self::Validation(errors)
    }

    pub fn bounds(message: impl Into<String>) -> Self {
        let mut errors = ValidationErrors::new();
        errors.bounds(message);
        Self::Validation(errors)
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(errors) => errors.kind(),
            Self::Conflict { .. } | Self::Exhausted { .. } => ErrorKind::Conflict,
            Self::NotInitialized(_) => ErrorKind::NotInitialized,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Store { .. } => ErrorKind::Store,
        }
    }

    /// Whether backing off and retrying the same request can succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::NotInitialized(_) => true,
            Self::Store { retryable, .. } => *retryable,
            _ => false,
        }
    }
}
