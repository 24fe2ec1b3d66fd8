//! Identifier domains: value-space rules per kind of identifier.
//!
//! Each domain has fixed absolute bounds derived from its bit width:
//!
//! ```text
//! as                         0 ..= 2^32-1
//! vlan                       0 ..= 4095
//! ext-community/two-byte-as  0 ..= 2^32-1   (4-byte local administrator)
//! ext-community/four-byte-as 0 ..= 2^16-1
//! ext-community/ipv4-address 0 ..= 2^16-1
//! ext-community/opaque       0 ..= 2^48-1
//! generic/{16,32,48,64}      0 ..= 2^bits-1
//! ```
//!
//! The engine never matches on [`IdentifierDomain`] directly; it asks the
//! domain for its [`DomainRules`] once, when the index is created.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::claim::{ClaimFields, ClaimKind, classify_and_validate};
use crate::error::ValidationErrors;
use crate::span::Span;

const MAX_16: u64 = (1 << 16) - 1;
const MAX_32: u64 = (1 << 32) - 1;
const MAX_48: u64 = (1 << 48) - 1;
const MAX_VLAN: u64 = 4095;

/// BGP extended-community shapes; each leaves a different local field width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExtCommunitySubtype {
    TwoByteAs,
    FourByteAs,
    Ipv4Address,
    Opaque,
}

impl ExtCommunitySubtype {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TwoByteAs => "two-byte-as",
            Self::FourByteAs => "four-byte-as",
            Self::Ipv4Address => "ipv4-address",
            Self::Opaque => "opaque",
        }
    }

    fn max(&self) -> u64 {
        match self {
            Self::TwoByteAs => MAX_32,
            Self::FourByteAs | Self::Ipv4Address => MAX_16,
            Self::Opaque => MAX_48,
        }
    }
}

/// Bit width of a generic identifier space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum GenericWidth {
    Bits16,
    Bits32,
    Bits48,
    Bits64,
}

impl GenericWidth {
    pub fn bits(&self) -> u8 {
        match self {
            Self::Bits16 => 16,
            Self::Bits32 => 32,
            Self::Bits48 => 48,
            Self::Bits64 => 64,
        }
    }

    fn max(&self) -> u64 {
        match self {
            Self::Bits16 => MAX_16,
            Self::Bits32 => MAX_32,
            Self::Bits48 => MAX_48,
            Self::Bits64 => u64::MAX,
        }
    }
}

impl TryFrom<u8> for GenericWidth {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            16 => Ok(Self::Bits16),
            32 => Ok(Self::Bits32),
            48 => Ok(Self::Bits48),
            64 => Ok(Self::Bits64),
            other => Err(format!(
                "generic id width must be one of 16, 32, 48, 64 (got {other})"
            )),
        }
    }
}

impl From<GenericWidth> for u8 {
    fn from(value: GenericWidth) -> Self {
        value.bits()
    }
}

/// The identifier domain tag carried by an index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum IdentifierDomain {
    As,
    Vlan,
    ExtCommunity { subtype: ExtCommunitySubtype },
    Generic { bits: GenericWidth },
}

impl IdentifierDomain {
    /// Select the rule set for this domain.
    pub fn rules(&self) -> Arc<dyn DomainRules> {
        match *self {
            Self::As => Arc::new(AsRules),
            Self::Vlan => Arc::new(VlanRules),
            Self::ExtCommunity { subtype } => Arc::new(ExtCommunityRules { subtype }),
            Self::Generic { bits } => Arc::new(GenericRules { width: bits }),
        }
    }

    pub fn bounds(&self) -> Span {
        self.rules().bounds()
    }
}

impl fmt::Display for IdentifierDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::As => write!(f, "as"),
            Self::Vlan => write!(f, "vlan"),
            Self::ExtCommunity { subtype } => write!(f, "ext-community/{}", subtype.as_str()),
            Self::Generic { bits } => write!(f, "generic/{}", bits.bits()),
        }
    }
}

/// Domain-specific rendering of one occupied position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntrySeed {
    pub id: u64,
    pub display: String,
}

/// Per-domain capability set consumed by the engine.
pub trait DomainRules: Send + Sync + fmt::Debug {
    fn domain(&self) -> IdentifierDomain;

    /// Absolute legal values for the domain.
    fn bounds(&self) -> Span;

    fn classify_and_validate(&self, fields: &ClaimFields) -> Result<ClaimKind, ValidationErrors> {
        classify_and_validate(fields, self.bounds(), &self.domain().to_string())
    }

    fn build_entry(&self, id: u64) -> EntrySeed {
        EntrySeed {
            id,
            display: id.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AsRules;

impl DomainRules for AsRules {
    fn domain(&self) -> IdentifierDomain {
        IdentifierDomain::As
    }

    fn bounds(&self) -> Span {
        Span {
            start: 0,
            end: MAX_32,
        }
    }

    /// 4-byte AS numbers also carry asdot notation (RFC 5396).
    fn build_entry(&self, id: u64) -> EntrySeed {
        let display = if id > MAX_16 {
            format!("AS{id} ({}.{})", id >> 16, id & MAX_16)
        } else {
            format!("AS{id}")
        };
        EntrySeed { id, display }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct VlanRules;

impl DomainRules for VlanRules {
    fn domain(&self) -> IdentifierDomain {
        IdentifierDomain::Vlan
    }

    fn bounds(&self) -> Span {
        Span {
            start: 0,
            end: MAX_VLAN,
        }
    }

    fn build_entry(&self, id: u64) -> EntrySeed {
        EntrySeed {
            id,
            display: format!("vlan-{id}"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ExtCommunityRules {
    pub subtype: ExtCommunitySubtype,
}

impl DomainRules for ExtCommunityRules {
    fn domain(&self) -> IdentifierDomain {
        IdentifierDomain::ExtCommunity {
            subtype: self.subtype,
        }
    }

    fn bounds(&self) -> Span {
        Span {
            start: 0,
            end: self.subtype.max(),
        }
    }

    fn build_entry(&self, id: u64) -> EntrySeed {
        EntrySeed {
            id,
            display: format!("{}:{id}", self.subtype.as_str()),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct GenericRules {
    pub width: GenericWidth,
}

impl DomainRules for GenericRules {
    fn domain(&self) -> IdentifierDomain {
        IdentifierDomain::Generic { bits: self.width }
    }

    fn bounds(&self) -> Span {
        Span {
            start: 0,
            end: self.width.max(),
        }
    }
}

/// Validate optional index bounds against the domain and return the
/// effective `[min, max]` span.
pub fn effective_index_bounds(
    rules: &dyn DomainRules,
    min_id: Option<u64>,
    max_id: Option<u64>,
) -> Result<Span, ValidationErrors> {
    let domain = rules.bounds();
    let mut errors = ValidationErrors::new();

    for (label, value) in [("min_id", min_id), ("max_id", max_id)] {
        if let Some(value) = value
            && !domain.contains(value)
        {
            errors.bounds(format!(
                "{label} {value} is outside {} bounds {domain}",
                rules.domain()
            ));
        }
    }

    let min = min_id.unwrap_or(domain.start);
    let max = max_id.unwrap_or(domain.end);
    if min > max {
        errors.bounds(format!("min_id {min} is greater than max_id {max}"));
    }
    errors.into_result()?;

    Span::new(min, max).ok_or_else(|| {
        let mut errors = ValidationErrors::new();
        errors.bounds(format!("min_id {min} is greater than max_id {max}"));
        errors
    })
}

/// Spans outside `[min, max]` but inside the domain: the boundary padding
/// reserved on behalf of the index.
pub fn boundary_spans(domain: Span, effective: Span) -> (Option<Span>, Option<Span>) {
    let below = (effective.start > domain.start)
        .then(|| Span::new(domain.start, effective.start - 1))
        .flatten();
    let above = (effective.end < domain.end)
        .then(|| Span::new(effective.end + 1, domain.end))
        .flatten();
    (below, above)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ext_community_subtypes_have_distinct_widths() {
        let max = |subtype| {
            IdentifierDomain::ExtCommunity { subtype }
                .bounds()
                .end
        };
        assert_eq!(max(ExtCommunitySubtype::TwoByteAs), 4_294_967_295);
        assert_eq!(max(ExtCommunitySubtype::FourByteAs), 65_535);
        assert_eq!(max(ExtCommunitySubtype::Ipv4Address), 65_535);
        assert_eq!(max(ExtCommunitySubtype::Opaque), 281_474_976_710_655);
    }

    #[test]
    fn generic_width_rejects_unknown_bit_count() {
        let parsed: Result<IdentifierDomain, _> =
            serde_json::from_str(r#"{"kind":"generic","bits":24}"#);
        assert!(parsed.is_err());

        let parsed: IdentifierDomain =
            serde_json::from_str(r#"{"kind":"generic","bits":64}"#).expect("64 bits is valid");
        assert_eq!(parsed.bounds().end, u64::MAX);
    }

    #[test]
    fn domain_tag_uses_kebab_case_kind() {
        let json = serde_json::to_string(&IdentifierDomain::ExtCommunity {
            subtype: ExtCommunitySubtype::Ipv4Address,
        })
        .expect("domain should serialize");
        assert_eq!(json, r#"{"kind":"ext-community","subtype":"ipv4-address"}"#);
    }

    #[test]
    fn as_entries_render_asdot_for_four_byte_numbers() {
        let rules = IdentifierDomain::As.rules();
        assert_eq!(rules.build_entry(65000).display, "AS65000");
        assert_eq!(rules.build_entry(65546).display, "AS65546 (1.10)");
    }

    #[test]
    fn index_bounds_default_to_domain_bounds() {
        let rules = IdentifierDomain::Vlan.rules();
        let span = effective_index_bounds(rules.as_ref(), None, None).expect("bounds are valid");
        assert_eq!(span, Span { start: 0, end: 4095 });
        assert_eq!(boundary_spans(rules.bounds(), span), (None, None));
    }

    #[test]
    fn index_bounds_report_every_problem() {
        let rules = IdentifierDomain::Vlan.rules();
        let errors = effective_index_bounds(rules.as_ref(), Some(5000), Some(10))
            .expect_err("bounds must fail");
        assert_eq!(errors.issues.len(), 2);
    }

    #[test]
    fn boundary_spans_cover_padding_on_both_sides() {
        let domain = Span { start: 0, end: 4095 };
        let (below, above) = boundary_spans(domain, Span { start: 1, end: 4094 });
        assert_eq!(below, Some(Span { start: 0, end: 0 }));
        assert_eq!(above, Some(Span { start: 4095, end: 4095 }));
    }
}
