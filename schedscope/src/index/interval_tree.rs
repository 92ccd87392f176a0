//! Static interval tree over spans.
//!
//! Built once after span assembly and never mutated, so instead of a
//! balanced pointer tree this is an implicit binary tree over the
//! start-sorted interval array, augmented with the maximum end per
//! subtree. Queries descend only into subtrees that can still overlap.

use crate::domain::types::Timestamp;
use crate::spans::SpanId;

#[derive(Debug, Clone, Copy)]
struct Entry {
    start: Timestamp,
    /// End used for overlap tests: zero-width intervals are widened to
    /// one nanosecond so an instantaneous state at `t` matches queries
    /// containing `t`.
    query_end: Timestamp,
    id: SpanId,
}

/// Immutable interval tree keyed on `[start, end)` with span-id payloads.
#[derive(Debug, Default)]
pub struct IntervalTree {
    entries: Vec<Entry>,
    /// `max_end[mid]` is the maximum `query_end` in the subtree whose
    /// implicit root is `mid`.
    max_end: Vec<Timestamp>,
}

impl IntervalTree {
    /// Build from `(start, end, id)` triples.
    #[must_use]
    pub fn build(mut intervals: Vec<(Timestamp, Timestamp, SpanId)>) -> IntervalTree {
        intervals.sort_by_key(|&(start, end, _)| (start, end));
        let entries: Vec<Entry> = intervals
            .into_iter()
            .map(|(start, end, id)| Entry {
                start,
                query_end: end.max(Timestamp(start.0 + 1)),
                id,
            })
            .collect();

        let mut tree = IntervalTree { max_end: vec![Timestamp(0); entries.len()], entries };
        if !tree.entries.is_empty() {
            tree.fill_max_end(0, tree.entries.len());
        }
        tree
    }

    fn fill_max_end(&mut self, lo: usize, hi: usize) -> Timestamp {
        let mid = lo + (hi - lo) / 2;
        let mut max = self.entries[mid].query_end;
        if lo < mid {
            max = max.max(self.fill_max_end(lo, mid));
        }
        if mid + 1 < hi {
            max = max.max(self.fill_max_end(mid + 1, hi));
        }
        self.max_end[mid] = max;
        max
    }

    /// Ids of intervals overlapping the closed range `[lo, hi]`, in start
    /// order.
    #[must_use]
    pub fn query(&self, lo: Timestamp, hi: Timestamp) -> Vec<SpanId> {
        let mut out = Vec::new();
        if !self.entries.is_empty() {
            self.visit(0, self.entries.len(), lo, hi, &mut out);
        }
        out
    }

    fn visit(&self, lo_i: usize, hi_i: usize, lo: Timestamp, hi: Timestamp, out: &mut Vec<SpanId>) {
        let mid = lo_i + (hi_i - lo_i) / 2;
        if self.max_end[mid] <= lo {
            // Everything in this subtree ends at or before the range.
            return;
        }
        if lo_i < mid {
            self.visit(lo_i, mid, lo, hi, out);
        }
        let entry = &self.entries[mid];
        if entry.start > hi {
            // Right subtree starts even later.
            return;
        }
        if entry.query_end > lo {
            out.push(entry.id);
        }
        if mid + 1 < hi_i {
            self.visit(mid + 1, hi_i, lo, hi, out);
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
