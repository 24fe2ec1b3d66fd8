//! The allocation table: occupancy of positions inside one identifier space.
//!
//! The engine only talks to [`AllocationTable`]. [`IntervalTable`] is the
//! default implementation: a map of non-overlapping inclusive intervals keyed
//! by start, so a full 64-bit range costs one node rather than 2^64.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::error::AllocError;
use crate::owner::OwnerRef;
use crate::span::Span;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TableError {
    #[error("span {span} is outside table bounds {bounds}")]
    OutOfBounds { span: Span, bounds: Span },

    #[error("id {id} is held by {owner}")]
    Occupied { id: u64, owner: OwnerRef },
}

impl From<TableError> for AllocError {
    fn from(err: TableError) -> Self {
        match err {
            TableError::OutOfBounds { .. } => AllocError::bounds(err.to_string()),
            TableError::Occupied { id, owner } => AllocError::Conflict {
                id,
                owner: owner.to_string(),
            },
        }
    }
}

/// Occupancy operations the engine needs from a table.
///
/// Implementations guarantee exclusivity: a position has at most one owner.
/// `reserve` is all-or-nothing.
pub trait AllocationTable: Send + Sync + fmt::Debug {
    fn bounds(&self) -> Span;

    /// Reserve every position of `span` for `owner`. Positions the owner
    /// already holds are kept; any position held by someone else fails the
    /// whole call without changing the table.
    fn reserve(&mut self, span: Span, owner: &OwnerRef) -> Result<(), TableError>;

    /// Free every position of `span` regardless of owner, returning the
    /// freed segments.
    fn free(&mut self, span: Span) -> Vec<(Span, OwnerRef)>;

    /// Occupied segments overlapping `span`, clipped to it, ascending.
    fn occupants(&self, span: Span) -> Vec<(Span, OwnerRef)>;

    /// Lowest free position inside `within`.
    fn first_free(&self, within: Span) -> Option<u64>;

    fn reserve_id(&mut self, id: u64, owner: &OwnerRef) -> Result<(), TableError> {
        self.reserve(Span::single(id), owner)
    }

    fn owner_of(&self, id: u64) -> Option<OwnerRef> {
        self.occupants(Span::single(id))
            .into_iter()
            .next()
            .map(|(_, owner)| owner)
    }

    fn spans_of(&self, owner: &OwnerRef) -> Vec<Span> {
        self.occupants(self.bounds())
            .into_iter()
            .filter(|(_, held_by)| held_by == owner)
            .map(|(span, _)| span)
            .collect()
    }

    /// Free everything held by `owner`.
    fn free_owner(&mut self, owner: &OwnerRef) -> Vec<Span> {
        let spans = self.spans_of(owner);
        for span in &spans {
            self.free(*span);
        }
        spans
    }
}

/// Builds an empty table for the given bounds.
pub type TableFactory = Arc<dyn Fn(Span) -> Box<dyn AllocationTable> + Send + Sync>;

pub fn interval_table_factory() -> TableFactory {
    Arc::new(|bounds| Box::new(IntervalTable::new(bounds)))
}

#[derive(Debug, Clone)]
pub struct IntervalTable {
    bounds: Span,
    /// start -> (end, owner); intervals never overlap.
    spans: BTreeMap<u64, (u64, OwnerRef)>,
}

impl IntervalTable {
    pub fn new(bounds: Span) -> Self {
        Self {
            bounds,
            spans: BTreeMap::new(),
        }
    }

    /// Number of stored intervals (not positions).
    pub fn interval_count(&self) -> usize {
        self.spans.len()
    }

    fn overlapping(&self, span: Span) -> Vec<(u64, u64, OwnerRef)> {
        let mut out: Vec<(u64, u64, OwnerRef)> = self
            .spans
            .range(..=span.end)
            .rev()
            .take_while(|(_, (end, _))| *end >= span.start)
            .map(|(start, (end, owner))| (*start, *end, owner.clone()))
            .collect();
        out.reverse();
        out
    }

    /// Insert a free span, coalescing with same-owner neighbours.
    fn insert_coalesced(&mut self, span: Span, owner: &OwnerRef) {
        let mut start = span.start;
        let mut end = span.end;

        let left = self
            .spans
            .range(..start)
            .next_back()
            .filter(|(_, (left_end, left_owner))| {
                left_end.checked_add(1) == Some(start) && left_owner == owner
            })
            .map(|(left_start, _)| *left_start);
        if let Some(left_start) = left {
            self.spans.remove(&left_start);
            start = left_start;
        }

        let right = end.checked_add(1).and_then(|next| {
            self.spans
                .get(&next)
                .filter(|(_, right_owner)| right_owner == owner)
                .map(|(right_end, _)| (next, *right_end))
        });
        if let Some((right_start, right_end)) = right {
            self.spans.remove(&right_start);
            end = right_end;
        }

        self.spans.insert(start, (end, owner.clone()));
    }
}

impl AllocationTable for IntervalTable {
    fn bounds(&self) -> Span {
        self.bounds
    }

    fn reserve(&mut self, span: Span, owner: &OwnerRef) -> Result<(), TableError> {
        if !self.bounds.covers(&span) {
            return Err(TableError::OutOfBounds {
                span,
                bounds: self.bounds,
            });
        }
        if let Some((segment, held_by)) = self
            .occupants(span)
            .into_iter()
            .find(|(_, held_by)| held_by != owner)
        {
            return Err(TableError::Occupied {
                id: segment.start,
                owner: held_by,
            });
        }

        // Everything in `span` is free or ours; flatten it into one interval.
        self.free(span);
        self.insert_coalesced(span, owner);
        Ok(())
    }

    fn free(&mut self, span: Span) -> Vec<(Span, OwnerRef)> {
        let mut freed = Vec::new();
        for (start, end, owner) in self.overlapping(span) {
            self.spans.remove(&start);
            let held = Span { start, end };
            for rest in held.subtract(&span) {
                self.spans.insert(rest.start, (rest.end, owner.clone()));
            }
            if let Some(cut) = held.intersect(&span) {
                freed.push((cut, owner));
            }
        }
        freed
    }

    fn occupants(&self, span: Span) -> Vec<(Span, OwnerRef)> {
        self.overlapping(span)
            .into_iter()
            .filter_map(|(start, end, owner)| {
                Span { start, end }
                    .intersect(&span)
                    .map(|clipped| (clipped, owner))
            })
            .collect()
    }

    fn first_free(&self, within: Span) -> Option<u64> {
        let within = within.intersect(&self.bounds)?;
        let mut cursor = within.start;

        if let Some((_, (end, _))) = self.spans.range(..=cursor).next_back()
            && *end >= cursor
        {
            if *end >= within.end {
                return None;
            }
            cursor = end + 1;
        }

        for (&start, (end, _)) in self.spans.range(cursor..) {
            if start > cursor {
                break;
            }
            if *end >= within.end {
                return None;
            }
            cursor = end + 1;
        }

        Some(cursor)
    }
}
