//! Index resource: a bounded identifier space.

use idclaim_kernel::{ClaimFields, IdentifierDomain};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::meta::{ObjectMeta, ResourceKey};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Index {
    pub meta: ObjectMeta,
    pub spec: IndexSpec,
    #[serde(default)]
    pub status: IndexStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexSpec {
    pub domain: IdentifierDomain,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_id: Option<u64>,
    /// Claims the index materializes on its own behalf.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub claims: Vec<EmbeddedClaim>,
}

/// A declarative claim carried inside an index spec.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbeddedClaim {
    pub name: String,
    #[serde(flatten)]
    pub fields: ClaimFields,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexStatus {
    #[serde(default)]
    pub ready: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Index {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>, domain: IdentifierDomain) -> Self {
        Self {
            meta: ObjectMeta::new(namespace, name),
            spec: IndexSpec {
                domain,
                min_id: None,
                max_id: None,
                claims: Vec::new(),
            },
            status: IndexStatus::default(),
        }
    }

    pub fn with_bounds(mut self, min_id: Option<u64>, max_id: Option<u64>) -> Self {
        self.spec.min_id = min_id;
        self.spec.max_id = max_id;
        self
    }

    pub fn key(&self) -> ResourceKey {
        self.meta.key()
    }

    /// Name of the claim materialized for an embedded entry.
    pub fn embedded_claim_name(&self, embedded: &EmbeddedClaim) -> String {
        format!("{}.{}", self.meta.name, embedded.name)
    }
}
