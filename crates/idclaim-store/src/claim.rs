//! Claim resource: a request for identifiers from one index.

use chrono::{DateTime, Utc};
use idclaim_kernel::{ClaimFields, OwnerRef, Span};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::meta::{ObjectMeta, ResourceKey};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claim {
    pub meta: ObjectMeta,
    pub spec: ClaimSpec,
    #[serde(default)]
    pub status: ClaimStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaimSpec {
    /// Index name, resolved in the claim's namespace.
    pub index: String,
    #[serde(flatten)]
    pub fields: ClaimFields,
    /// Labels of the range claims a dynamic claim allocates inside.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range: Option<String>,
    #[serde(default)]
    pub condition: Condition,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Condition {
    #[default]
    Pending,
    Ready,
    Failed {
        reason: String,
        message: String,
        retryable: bool,
    },
}

impl ClaimStatus {
    pub fn ready_id(id: u64) -> Self {
        Self {
            id: Some(id),
            range: None,
            condition: Condition::Ready,
        }
    }

    pub fn ready_range(span: Span) -> Self {
        Self {
            id: None,
            range: Some(span.to_string()),
            condition: Condition::Ready,
        }
    }

    pub fn failed(reason: impl Into<String>, message: impl Into<String>, retryable: bool) -> Self {
        Self {
            id: None,
            range: None,
            condition: Condition::Failed {
                reason: reason.into(),
                message: message.into(),
                retryable,
            },
        }
    }

    pub fn is_ready(&self) -> bool {
        self.condition == Condition::Ready
    }
}

impl Claim {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>, index: impl Into<String>) -> Self {
        Self {
            meta: ObjectMeta::new(namespace, name),
            spec: ClaimSpec {
                index: index.into(),
                fields: ClaimFields::dynamic(),
                selector: None,
                expires_at: None,
            },
            status: ClaimStatus::default(),
        }
    }

    pub fn with_id(mut self, id: u64) -> Self {
        self.spec.fields = ClaimFields::static_id(id);
        self
    }

    pub fn with_range(mut self, range: impl Into<String>) -> Self {
        self.spec.fields = ClaimFields::range(range);
        self
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.meta.labels.insert(key.into(), value.into());
        self
    }

    pub fn with_selector(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.spec
            .selector
            .get_or_insert_with(BTreeMap::new)
            .insert(key.into(), value.into());
        self
    }

    pub fn key(&self) -> ResourceKey {
        self.meta.key()
    }

    pub fn index_key(&self) -> ResourceKey {
        ResourceKey::new(self.meta.namespace.clone(), self.spec.index.clone())
    }

    pub fn owner(&self) -> OwnerRef {
        OwnerRef::claim(
            self.meta.namespace.clone(),
            self.meta.name.clone(),
            self.meta.uid.clone(),
        )
    }

    /// Non-empty selector, if any.
    pub fn scope_selector(&self) -> Option<&BTreeMap<String, String>> {
        self.spec.selector.as_ref().filter(|sel| !sel.is_empty())
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.spec.expires_at.is_some_and(|at| at <= now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claim_spec_flattens_variant_fields() {
        let raw = r#"{
            "meta": {"namespace": "default", "name": "c4"},
            "spec": {"index": "vlan", "range": "10-19"}
        }"#;
        let claim: Claim = serde_json::from_str(raw).expect("claim should parse");
        assert_eq!(claim.spec.fields, ClaimFields::range("10-19"));
        assert_eq!(claim.status.condition, Condition::Pending);
        assert_eq!(claim.index_key(), ResourceKey::new("default", "vlan"));
    }

    #[test]
    fn failed_condition_serializes_with_state_tag() {
        let status = ClaimStatus::failed("claim_conflict", "id 100 is already claimed", false);
        let value = serde_json::to_value(&status).expect("status should serialize");
        assert_eq!(value["condition"]["state"], "failed");
        assert_eq!(value["condition"]["reason"], "claim_conflict");
    }

    #[test]
    fn expiry_is_inclusive() {
        let now = Utc::now();
        let mut claim = Claim::new("default", "c1", "as");
        assert!(!claim.is_expired_at(now));
        claim.spec.expires_at = Some(now);
        assert!(claim.is_expired_at(now));
    }
}
