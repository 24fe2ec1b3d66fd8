//! Owner identity stamped on every reserved position.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OwnerKind {
    Claim,
    /// Synthetic owner of the padding outside an index's `[min_id, max_id]`.
    Boundary,
}

/// Stable identity of whoever holds a position.
///
/// Two refs are the same owner only if namespace, name and uid all match:
/// a claim deleted and recreated under the same name is a different owner.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OwnerRef {
    pub kind: OwnerKind,
    pub namespace: String,
    pub name: String,
    pub uid: String,
}

impl OwnerRef {
    pub fn claim(
        namespace: impl Into<String>,
        name: impl Into<String>,
        uid: impl Into<String>,
    ) -> Self {
        Self {
            kind: OwnerKind::Claim,
            namespace: namespace.into(),
            name: name.into(),
            uid: uid.into(),
        }
    }

    /// Owner of the padding below `min_id`.
    pub fn lower_boundary(namespace: impl Into<String>, index: &str) -> Self {
        Self::boundary(namespace, index, "min")
    }

    /// Owner of the padding above `max_id`.
    pub fn upper_boundary(namespace: impl Into<String>, index: &str) -> Self {
        Self::boundary(namespace, index, "max")
    }

    fn boundary(namespace: impl Into<String>, index: &str, side: &str) -> Self {
        Self {
            kind: OwnerKind::Boundary,
            namespace: namespace.into(),
            name: format!("{index}.boundary-{side}"),
            uid: format!("boundary:{index}:{side}"),
        }
    }

    pub fn is_boundary(&self) -> bool {
        self.kind == OwnerKind::Boundary
    }
}

impl fmt::Display for OwnerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}
