//! Inclusive identifier spans and the `"start-end"` range format.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ValidationErrors;

/// An inclusive, contiguous run of identifiers. `start <= end` always holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: u64,
    pub end: u64,
}

impl Span {
    /// Build a span; `None` when `start > end`.
    pub fn new(start: u64, end: u64) -> Option<Self> {
        (start <= end).then_some(Self { start, end })
    }

    pub fn single(id: u64) -> Self {
        Self { start: id, end: id }
    }

    /// Number of positions. `u128` because the full 64-bit span has 2^64.
    pub fn len(&self) -> u128 {
        u128::from(self.end - self.start) + 1
    }

    pub fn is_single(&self) -> bool {
        self.start == self.end
    }

    pub fn contains(&self, id: u64) -> bool {
        self.start <= id && id <= self.end
    }

    pub fn covers(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start <= other.end && other.start <= self.end
    }

    pub fn intersect(&self, other: &Span) -> Option<Span> {
        Span::new(self.start.max(other.start), self.end.min(other.end))
    }

    /// Parts of `self` not covered by `other` (zero, one or two spans).
    pub fn subtract(&self, other: &Span) -> Vec<Span> {
        if !self.overlaps(other) {
            return vec![*self];
        }
        let mut out = Vec::new();
        if self.start < other.start {
            out.push(Span {
                start: self.start,
                end: other.start - 1,
            });
        }
        if other.end < self.end {
            out.push(Span {
                start: other.end + 1,
                end: self.end,
            });
        }
        out
    }

    pub fn ids(&self) -> impl Iterator<Item = u64> {
        self.start..=self.end
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// Parse `"<start>-<end>"` (decimal, inclusive, both required).
///
/// Every problem is reported: a bad start and a bad end yield two issues,
/// and `start > end` is reported as a bounds issue.
pub fn parse_range(raw: &str) -> Result<Span, ValidationErrors> {
    let mut errors = ValidationErrors::new();
    let Some((start_raw, end_raw)) = raw.trim().split_once('-') else {
        errors.syntax(format!(
            "range {raw:?} must have the form <start>-<end>"
        ));
        return Err(errors);
    };

    let start = parse_bound("start", start_raw, &mut errors);
    let end = parse_bound("end", end_raw, &mut errors);

    match (start, end) {
        (Some(start), Some(end)) => match Span::new(start, end) {
            Some(span) => Ok(span),
            None => {
                errors.bounds(format!(
                    "range start {start} is greater than range end {end}"
                ));
                Err(errors)
            }
        },
        _ => Err(errors),
    }
}

fn parse_bound(label: &str, raw: &str, errors: &mut ValidationErrors) -> Option<u64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        errors.syntax(format!("range {label} is missing"));
        return None;
    }
    match trimmed.parse::<u64>() {
        Ok(value) => Some(value),
        Err(_) => {
            errors.syntax(format!("range {label} {trimmed:?} is not a decimal integer"));
            None
        }
    }
}
