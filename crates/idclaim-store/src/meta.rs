//! Object identity and metadata shared by every stored resource.

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::LazyLock;

/// Labels under this prefix are written by the system and never copied
/// from a claim onto its entries.
pub const SYSTEM_LABEL_PREFIX: &str = "idclaim.dev/";
pub const LABEL_INDEX: &str = "idclaim.dev/index";
pub const LABEL_OWNER: &str = "idclaim.dev/owner";
pub const LABEL_OWNER_UID: &str = "idclaim.dev/owner-uid";
/// Marks claims materialized from an index's embedded claim list.
pub const LABEL_EMBEDDED_BY: &str = "idclaim.dev/embedded-by";

pub const DEFAULT_NAMESPACE: &str = "default";
const MAX_NAME_LEN: usize = 253;

static NAME_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]([-a-z0-9.]*[a-z0-9])?$").expect("name pattern is a valid regex")
});

/// Namespace + name identity of an index or claim.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ResourceKey {
    pub namespace: String,
    pub name: String,
}

impl ResourceKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectMeta {
    #[serde(default = "default_namespace")]
    pub namespace: String,
    pub name: String,
    /// Assigned by the store on create.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub uid: String,
    /// Bumped by the store on every write; updates must echo it back.
    #[serde(default)]
    pub resource_version: u64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default = "default_timestamp")]
    pub created_at: DateTime<Utc>,
}

fn default_namespace() -> String {
    DEFAULT_NAMESPACE.to_string()
}

fn default_timestamp() -> DateTime<Utc> {
    Utc::now()
}

impl ObjectMeta {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            uid: String::new(),
            resource_version: 0,
            labels: BTreeMap::new(),
            created_at: Utc::now(),
        }
    }

    pub fn key(&self) -> ResourceKey {
        ResourceKey::new(self.namespace.clone(), self.name.clone())
    }

    /// Labels a claim contributes to its entries.
    pub fn user_labels(&self) -> BTreeMap<String, String> {
        self.labels
            .iter()
            .filter(|(key, _)| !key.starts_with(SYSTEM_LABEL_PREFIX))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }
}

/// Check an object or namespace name.
pub fn validate_name(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("name is required".to_string());
    }
    if name.len() > MAX_NAME_LEN {
        return Err(format!("name exceeds {MAX_NAME_LEN} characters"));
    }
    if !NAME_PATTERN.is_match(name) {
        return Err(
            "name must be lowercase alphanumerics, '-' or '.', starting and ending alphanumeric"
                .to_string(),
        );
    }
    Ok(())
}

/// True when every selector pair is present in `labels`.
pub fn labels_match(selector: &BTreeMap<String, String>, labels: &BTreeMap<String, String>) -> bool {
    selector
        .iter()
        .all(|(key, value)| labels.get(key) == Some(value))
}
