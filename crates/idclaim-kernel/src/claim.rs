//! Claim classification and bounds validation.

use serde::{Deserialize, Serialize};

use crate::error::ValidationErrors;
use crate::span::{Span, parse_range};

/// The raw variant-determining fields of a claim request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimFields {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range: Option<String>,
}

impl ClaimFields {
    pub fn static_id(id: u64) -> Self {
        Self {
            id: Some(id),
            range: None,
        }
    }

    pub fn range(range: impl Into<String>) -> Self {
        Self {
            id: None,
            range: Some(range.into()),
        }
    }

    pub fn dynamic() -> Self {
        Self::default()
    }
}

/// A classified, validated claim request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClaimKind {
    StaticId { id: u64 },
    Range { span: Span },
    Dynamic,
}

impl ClaimKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StaticId { .. } => "static",
            Self::Range { .. } => "range",
            Self::Dynamic => "dynamic",
        }
    }
}

/// Classify the request and check it against `bounds`.
///
/// Classification counts the set fields among `{id, range}`: none is a
/// dynamic claim, one selects that variant, both is a syntax error. Range
/// problems are aggregated so the caller sees all of them at once.
pub fn classify_and_validate(
    fields: &ClaimFields,
    bounds: Span,
    domain_label: &str,
) -> Result<ClaimKind, ValidationErrors> {
    let mut errors = ValidationErrors::new();
    match (fields.id, fields.range.as_deref()) {
        (Some(_), Some(_)) => {
            errors.syntax("a claim can only have one type");
            Err(errors)
        }
        (None, None) => Ok(ClaimKind::Dynamic),
        (Some(id), None) => {
            check_bound("id", id, bounds, domain_label, &mut errors);
            errors.into_result()?;
            Ok(ClaimKind::StaticId { id })
        }
        (None, Some(raw)) => {
            let span = match parse_range(raw) {
                Ok(span) => span,
                Err(parse_errors) => {
                    errors.issues.extend(parse_errors.issues);
                    // Still report endpoints that parse but fall outside bounds.
                    if let Some((start, end)) = raw.trim().split_once('-') {
                        for (label, value) in [("range start", start), ("range end", end)] {
                            if let Ok(value) = value.trim().parse::<u64>() {
                                check_bound(label, value, bounds, domain_label, &mut errors);
                            }
                        }
                    }
                    return Err(errors);
                }
            };
            check_bound("range start", span.start, bounds, domain_label, &mut errors);
            check_bound("range end", span.end, bounds, domain_label, &mut errors);
            errors.into_result()?;
            Ok(ClaimKind::Range { span })
        }
    }
}

fn check_bound(
    label: &str,
    value: u64,
    bounds: Span,
    domain_label: &str,
    errors: &mut ValidationErrors,
) {
    if !bounds.contains(value) {
        errors.bounds(format!(
            "{label} {value} is outside {domain_label} bounds {bounds}"
        ));
    }
}
