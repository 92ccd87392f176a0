//! Antagonist analysis: who ran while the victim thread sat runnable.
//!
//! For each Waiting span of the victim, the per-CPU Running index yields
//! the threads occupying that CPU over the same stretch. Each span and
//! each running span is visited at most once, so the scan is linear in
//! the number of overlapping spans.

use serde::{Deserialize, Serialize};

use super::filter::ResolvedFilter;
use crate::collection::Collection;
use crate::domain::types::{CpuId, Pid, SpanState, Thread, Timestamp};
use crate::domain::QueryError;
use crate::intervals::span_thread;

/// One stretch of a thread running on a CPU while the victim waited
/// there.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Antagonism {
    pub running_thread: Thread,
    pub cpu: CpuId,
    pub start_timestamp: Timestamp,
    pub end_timestamp: Timestamp,
}

/// Antagonisms against the filter's single PID, in time order.
pub(crate) fn antagonists(
    collection: &Collection,
    resolved: &ResolvedFilter,
) -> Result<Vec<Antagonism>, QueryError> {
    let [victim] = resolved.pids.as_slice() else {
        return Err(QueryError::one_pid());
    };
    if *victim == Pid::SWAPPER {
        return Err(QueryError::InvalidArgument(
            "the idle thread cannot be an antagonist victim".to_string(),
        ));
    }

    let mut antagonisms = Vec::new();
    for span in collection.thread_spans(*victim) {
        if span.state != SpanState::Waiting
            || span.is_zero_width()
            || !span.overlaps(resolved.lo, resolved.hi)
            || !resolved.cpus.contains(&span.cpu)
        {
            continue;
        }
        let lo = span.start.max(resolved.lo);
        let hi = span.end.min(resolved.hi);

        for running in collection.cpu_index().spans_overlapping(
            collection.span_arena(),
            span.cpu,
            SpanState::Running,
            lo,
            hi,
        ) {
            if running.pid == *victim || running.is_zero_width() {
                continue;
            }
            let start = running.start.max(lo);
            let end = running.end.min(hi);
            if start < end {
                antagonisms.push(Antagonism {
                    running_thread: span_thread(running, collection.string_bank())?,
                    cpu: span.cpu,
                    start_timestamp: start,
                    end_timestamp: end,
                });
            }
        }
    }
    antagonisms.sort_by_key(|a| (a.start_timestamp, a.cpu, a.running_thread.pid));
    Ok(antagonisms)
}
