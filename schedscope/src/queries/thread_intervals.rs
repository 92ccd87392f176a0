//! Per-thread interval queries.
//!
//! An interval is a span (or a run of merged short spans on one CPU)
//! clipped to the query window. Merged intervals accumulate per-state
//! residencies so callers still see how the time was spent.

use serde::{Deserialize, Serialize};

use super::filter::ResolvedFilter;
use crate::collection::Collection;
use crate::domain::types::{CpuId, Pid, SpanState, Thread, Timestamp, TraceDuration};
use crate::domain::QueryError;
use crate::intervals::span_thread;
use crate::spans::Span;

/// Time one thread spent in one state within an interval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadResidency {
    pub thread: Thread,
    pub state: SpanState,
    pub duration: TraceDuration,
    /// Events inference discarded while this state held.
    pub dropped_event_count: usize,
    /// True if any merged-in span had an invented boundary.
    pub includes_synthetic: bool,
}

/// A stretch of one thread's timeline on one CPU.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadInterval {
    pub start_timestamp: Timestamp,
    pub end_timestamp: Timestamp,
    pub cpu: CpuId,
    /// How many spans were folded into this interval.
    pub merged_interval_count: usize,
    /// Per-state residencies, ordered Running, Sleeping, Unknown, Waiting.
    pub thread_residencies: Vec<ThreadResidency>,
}

impl ThreadInterval {
    #[must_use]
    pub fn duration(&self) -> TraceDuration {
        self.end_timestamp.duration_since(self.start_timestamp)
    }

    /// The interval's single state; `None` once merging mixed states.
    #[must_use]
    pub fn sole_state(&self) -> Option<SpanState> {
        match self.thread_residencies.as_slice() {
            [single] => Some(single.state),
            _ => None,
        }
    }
}

/// Intervals of the filter's single PID, merged per the filter.
pub(crate) fn thread_intervals(
    collection: &Collection,
    resolved: &ResolvedFilter,
) -> Result<Vec<ThreadInterval>, QueryError> {
    let [pid] = resolved.pids.as_slice() else {
        return Err(QueryError::one_pid());
    };
    intervals_for_pid(collection, *pid, resolved)
}

/// Unmerged-then-merged interval generation for one thread. Also the
/// engine behind statistics and summaries.
pub(crate) fn intervals_for_pid(
    collection: &Collection,
    pid: Pid,
    resolved: &ResolvedFilter,
) -> Result<Vec<ThreadInterval>, QueryError> {
    let base = windowed_spans(collection, pid, resolved);

    let mut intervals: Vec<ThreadInterval> = Vec::new();
    for span in base {
        let (start, end) = if resolved.truncate {
            (span.start.max(resolved.lo), span.end.min(resolved.hi))
        } else {
            (span.start, span.end)
        };
        let interval = ThreadInterval {
            start_timestamp: start,
            end_timestamp: end,
            cpu: span.cpu,
            merged_interval_count: 1,
            thread_residencies: vec![ThreadResidency {
                thread: span_thread(span, collection.string_bank())?,
                state: span.state,
                duration: end.duration_since(start),
                dropped_event_count: span.dropped_event_indices.len(),
                includes_synthetic: span.synthetic_start || span.synthetic_end,
            }],
        };

        let merge = intervals
            .last()
            .is_some_and(|last| mergeable(last, &interval, resolved.min_interval_duration));
        if merge {
            if let Some(last) = intervals.last_mut() {
                merge_into(last, interval);
            }
        } else {
            intervals.push(interval);
        }
    }
    Ok(intervals)
}

/// The PID's spans overlapping the query window, state-filtered.
/// Spans are start-sorted and per-thread non-overlapping, so the window's
/// first candidate is found by binary search.
fn windowed_spans<'a>(
    collection: &'a Collection,
    pid: Pid,
    resolved: &ResolvedFilter,
) -> impl Iterator<Item = &'a Span> {
    let spans = collection.thread_spans(pid);
    let from = spans.partition_point(|s| s.end.max(Timestamp(s.start.0 + 1)) <= resolved.lo);
    let admitted = resolved.thread_states;
    let hi = resolved.hi;
    spans[from..]
        .iter()
        .take_while(move |s| s.start <= hi)
        .filter(move |s| admitted.intersects(s.state.as_set()))
}

fn mergeable(last: &ThreadInterval, next: &ThreadInterval, min: TraceDuration) -> bool {
    last.cpu == next.cpu
        && min > TraceDuration::ZERO
        && (last.duration() < min || next.duration() < min)
}

fn merge_into(last: &mut ThreadInterval, next: ThreadInterval) {
    last.end_timestamp = next.end_timestamp;
    last.merged_interval_count += next.merged_interval_count;
    for residency in next.thread_residencies {
        match last
            .thread_residencies
            .iter_mut()
            .find(|r| r.state == residency.state && r.thread.pid == residency.thread.pid)
        {
            Some(existing) => {
                existing.duration += residency.duration;
                existing.dropped_event_count += residency.dropped_event_count;
                existing.includes_synthetic |= residency.includes_synthetic;
            }
            None => last.thread_residencies.push(residency),
        }
    }
    last.thread_residencies.sort_by_key(|r| (r.state, r.thread.pid));
}
