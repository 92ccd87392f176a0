//! Spans and the span arena.
//!
//! A span is the maximal interval over which one thread held one state on
//! one CPU. Spans live in a single append-only arena and are referenced
//! everywhere else (per-thread lists, per-CPU indexes, interval trees) by
//! id, so no index owns or borrows span storage.

use std::collections::HashMap;
use std::ops::Range;

use crate::domain::types::{CpuId, Pid, Priority, SpanState, Timestamp, TraceDuration};
use crate::domain::CollectionError;
use crate::string_bank::StringId;

/// Arena id of a span. Ids are assigned only after the global ordering
/// pass (PID ascending, then start ascending) so they are stable across
/// runs; 0 means not yet assigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SpanId(pub u64);

impl SpanId {
    pub const UNASSIGNED: SpanId = SpanId(0);
}

/// One thread's residency in one state on one CPU.
///
/// `end` is exclusive and greater than `start`, except for zero-width
/// boundary spans recording an instantaneous attested state at the trace
/// edges.
#[derive(Debug, Clone)]
pub struct Span {
    pub id: SpanId,
    pub pid: Pid,
    pub start: Timestamp,
    pub end: Timestamp,
    pub cpu: CpuId,
    pub state: SpanState,
    pub command: Option<StringId>,
    pub priority: Priority,

    /// The span's boundary was invented (trace edge or conflict repair)
    /// rather than observed.
    pub synthetic_start: bool,
    pub synthetic_end: bool,

    /// Events discarded by inference while this span was current.
    pub dropped_event_indices: Vec<i64>,
}

impl Span {
    #[must_use]
    pub fn duration(&self) -> TraceDuration {
        self.end.duration_since(self.start)
    }

    #[must_use]
    pub fn is_zero_width(&self) -> bool {
        self.start == self.end
    }

    /// True if the span covers any part of the closed range `[lo, hi]`.
    /// A zero-width span overlaps when its instant lies in the range.
    #[must_use]
    pub fn overlaps(&self, lo: Timestamp, hi: Timestamp) -> bool {
        if self.is_zero_width() {
            self.start >= lo && self.start <= hi
        } else {
            self.start <= hi && self.end > lo
        }
    }
}

/// All spans of a collection, sorted by (PID, start) with dense ids.
#[derive(Debug, Default)]
pub struct SpanArena {
    spans: Vec<Span>,
    by_pid: HashMap<Pid, Range<usize>>,
}

impl SpanArena {
    /// Order the spans, assign ids, and index the per-thread ranges.
    ///
    /// # Errors
    ///
    /// `Internal` if one thread's spans overlap or leave gaps — the span
    /// generator guarantees contiguity per thread.
    pub fn assemble(mut spans: Vec<Span>) -> Result<SpanArena, CollectionError> {
        spans.sort_by_key(|s| (s.pid, s.start, s.end));
        for (i, span) in spans.iter_mut().enumerate() {
            span.id = SpanId(i as u64 + 1);
        }

        let mut by_pid: HashMap<Pid, Range<usize>> = HashMap::new();
        let mut range_start = 0;
        for i in 0..spans.len() {
            let pid = spans[i].pid;
            if spans[i + 1..].first().is_none_or(|next| next.pid != pid) {
                by_pid.insert(pid, range_start..i + 1);
                range_start = i + 1;
            } else if spans[i].end != spans[i + 1].start {
                return Err(CollectionError::Internal(format!(
                    "spans for {pid} not contiguous at {}",
                    spans[i].end
                )));
            }
        }

        Ok(SpanArena { spans, by_pid })
    }

    /// Every span, in (PID, start) order.
    #[must_use]
    pub fn all(&self) -> &[Span] {
        &self.spans
    }

    /// One thread's spans, in start order.
    #[must_use]
    pub fn for_pid(&self, pid: Pid) -> &[Span] {
        self.by_pid.get(&pid).map_or(&[], |range| &self.spans[range.clone()])
    }

    /// Resolve a span id. Ids are dense, so this is an index lookup.
    #[must_use]
    pub fn get(&self, id: SpanId) -> Option<&Span> {
        if id == SpanId::UNASSIGNED {
            return None;
        }
        usize::try_from(id.0).ok().and_then(|i| self.spans.get(i - 1))
    }

    /// The threads with spans, unordered.
    pub fn pids(&self) -> impl Iterator<Item = Pid> + '_ {
        self.by_pid.keys().copied()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.spans.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }
}
