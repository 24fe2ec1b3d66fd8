//! JSON dispatch over [`LifecycleHooks`].
//!
//! Request: `{"action": "claim.create", "payload": <claim or index>}`.
//! Every response is an envelope with `result` set to `accepted` or
//! `rejected`; rejected envelopes carry `failureClasses` and a
//! `diagnostic`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::hooks::{InvokeError, LifecycleHooks, Resource};
use idclaim_store::{Claim, Index, ResourceKey};

pub const DISPATCH_SCHEMA: u32 = 1;
pub const DISPATCH_KIND: &str = "idclaim.dispatch.v1";
const SEMANTIC_DIGEST_PREFIX: &str = "id1_";
const ACTION_ID_INVALID_REQUEST: &str = "dispatch.action.invalid_request";
const ACTION_ID_UNKNOWN: &str = "dispatch.action.unknown";

pub const FAILURE_CLASS_INVALID_REQUEST: &str = "invalid_request";
pub const FAILURE_CLASS_UNKNOWN_ACTION: &str = "unknown_action";
pub const FAILURE_CLASS_INVALID_PAYLOAD: &str = "invalid_payload";

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct DispatchRequest {
    action: String,
    #[serde(default)]
    payload: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DispatchAction {
    ClaimCreate,
    ClaimUpdate,
    ClaimDelete,
    IndexCreate,
    IndexUpdate,
    IndexDelete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verb {
    Create,
    Update,
    Delete,
}

impl DispatchAction {
    const ALL: [Self; 6] = [
        Self::ClaimCreate,
        Self::ClaimUpdate,
        Self::ClaimDelete,
        Self::IndexCreate,
        Self::IndexUpdate,
        Self::IndexDelete,
    ];

    fn from_action(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|action| action.action() == value)
    }

    fn action(self) -> &'static str {
        match self {
            Self::ClaimCreate => "claim.create",
            Self::ClaimUpdate => "claim.update",
            Self::ClaimDelete => "claim.delete",
            Self::IndexCreate => "index.create",
            Self::IndexUpdate => "index.update",
            Self::IndexDelete => "index.delete",
        }
    }

    fn action_id(self) -> &'static str {
        match self {
            Self::ClaimCreate => "dispatch.claim.create",
            Self::ClaimUpdate => "dispatch.claim.update",
            Self::ClaimDelete => "dispatch.claim.delete",
            Self::IndexCreate => "dispatch.index.create",
            Self::IndexUpdate => "dispatch.index.update",
            Self::IndexDelete => "dispatch.index.delete",
        }
    }

    fn verb(self) -> Verb {
        match self {
            Self::ClaimCreate | Self::IndexCreate => Verb::Create,
            Self::ClaimUpdate | Self::IndexUpdate => Verb::Update,
            Self::ClaimDelete | Self::IndexDelete => Verb::Delete,
        }
    }

    fn parse_payload(self, payload: Value) -> Result<Resource, serde_json::Error> {
        match self {
            Self::ClaimCreate | Self::ClaimUpdate | Self::ClaimDelete => {
                serde_json::from_value::<Claim>(payload).map(Resource::Claim)
            }
            Self::IndexCreate | Self::IndexUpdate | Self::IndexDelete => {
                serde_json::from_value::<Index>(payload).map(Resource::Index)
            }
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchEnvelope {
    pub schema: u32,
    pub dispatch_kind: String,
    pub action: String,
    pub action_id: String,
    pub result: String,
    pub failure_classes: Vec<String>,
    pub semantic_digest: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retryable: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource: Option<Resource>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostic: Option<String>,
}

fn semantic_digest(material: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in material {
        hasher.update(part.as_bytes());
        hasher.update([0u8]);
    }
    format!("{SEMANTIC_DIGEST_PREFIX}{:x}", hasher.finalize())
}

/// Digest over what the caller can observe: the target and its status.
fn accepted_digest(action: DispatchAction, target: &ResourceKey, resource: Option<&Resource>) -> String {
    let target = target.to_string();
    let status = resource
        .and_then(|resource| match resource {
            Resource::Index(index) => serde_json::to_string(&index.status).ok(),
            Resource::Claim(claim) => serde_json::to_string(&claim.status).ok(),
        })
        .unwrap_or_default();
    semantic_digest(&[
        DISPATCH_KIND,
        action.action(),
        action.action_id(),
        "accepted",
        &target,
        &status,
    ])
}

fn accepted(action: DispatchAction, target: &ResourceKey, resource: Option<Resource>) -> DispatchEnvelope {
    DispatchEnvelope {
        schema: DISPATCH_SCHEMA,
        dispatch_kind: DISPATCH_KIND.to_string(),
        action: action.action().to_string(),
        action_id: action.action_id().to_string(),
        result: "accepted".to_string(),
        failure_classes: Vec::new(),
        semantic_digest: accepted_digest(action, target, resource.as_ref()),
        retryable: None,
        resource,
        diagnostic: None,
    }
}

fn rejected(
    action: &str,
    action_id: &str,
    failure_class: &str,
    retryable: Option<bool>,
    diagnostic: impl Into<String>,
) -> DispatchEnvelope {
    DispatchEnvelope {
        schema: DISPATCH_SCHEMA,
        dispatch_kind: DISPATCH_KIND.to_string(),
        action: action.to_string(),
        action_id: action_id.to_string(),
        result: "rejected".to_string(),
        failure_classes: vec![failure_class.to_string()],
        semantic_digest: semantic_digest(&[DISPATCH_KIND, action, action_id, failure_class]),
        retryable,
        resource: None,
        diagnostic: Some(diagnostic.into()),
    }
}

fn rejected_invoke(action: DispatchAction, err: &InvokeError) -> DispatchEnvelope {
    rejected(
        action.action(),
        action.action_id(),
        err.failure_class(),
        Some(err.is_retryable()),
        err.to_string(),
    )
}

/// Dispatch one request through `hooks`.
pub fn dispatch(hooks: &dyn LifecycleHooks, request: Value) -> DispatchEnvelope {
    let request = match serde_json::from_value::<DispatchRequest>(request) {
        Ok(request) => request,
        Err(source) => {
            return rejected(
                "dispatch",
                ACTION_ID_INVALID_REQUEST,
                FAILURE_CLASS_INVALID_REQUEST,
                None,
                format!("invalid dispatch request: {source}"),
            );
        }
    };
    let name = request.action.trim();
    let Some(action) = DispatchAction::from_action(name) else {
        return rejected(
            name,
            ACTION_ID_UNKNOWN,
            FAILURE_CLASS_UNKNOWN_ACTION,
            None,
            format!("unsupported action: {name}"),
        );
    };
    let resource = match action.parse_payload(request.payload) {
        Ok(resource) => resource,
        Err(source) => {
            return rejected(
                action.action(),
                action.action_id(),
                FAILURE_CLASS_INVALID_PAYLOAD,
                None,
                format!("invalid {} payload: {source}", action.action()),
            );
        }
    };

    let target = resource.key();
    let outcome = match action.verb() {
        Verb::Create => hooks.invoke_create(resource).map(Some),
        Verb::Update => hooks.invoke_update(resource).map(Some),
        Verb::Delete => hooks.invoke_delete(resource).map(|()| None),
    };
    match outcome {
        Ok(resource) => accepted(action, &target, resource),
        Err(err) => rejected_invoke(action, &err),
    }
}

/// String-in, string-out form of [`dispatch`].
pub fn dispatch_json(hooks: &dyn LifecycleHooks, request_json: &str) -> String {
    let envelope = match serde_json::from_str::<Value>(request_json) {
        Ok(request) => dispatch(hooks, request),
        Err(source) => rejected(
            "dispatch",
            ACTION_ID_INVALID_REQUEST,
            FAILURE_CLASS_INVALID_REQUEST,
            None,
            format!("invalid dispatch request: {source}"),
        ),
    };
    serde_json::to_string(&envelope).unwrap_or_else(|source| {
        serde_json::json!({
            "schema": DISPATCH_SCHEMA,
            "dispatchKind": DISPATCH_KIND,
            "result": "rejected",
            "failureClasses": [FAILURE_CLASS_INVALID_REQUEST],
            "diagnostic": format!("envelope did not serialize: {source}"),
        })
        .to_string()
    })
}
