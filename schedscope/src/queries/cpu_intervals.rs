//! Per-CPU interval queries.
//!
//! Drives the elementary-interval pipeline over one CPU, then merges
//! adjacent intervals while the running thread (and optionally the
//! waiting set) stays the same, folding in intervals shorter than the
//! filter's minimum duration.

use serde::{Deserialize, Serialize};

use super::filter::ResolvedFilter;
use crate::collection::Collection;
use crate::domain::types::{CpuId, Pid, Thread, Timestamp, TraceDuration};
use crate::domain::QueryError;
use crate::intervals::ElementaryCpuInterval;

/// A stretch of one CPU's timeline.
///
/// Unmerged intervals hold at most one running thread; merging can fold
/// several occupants into one interval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CpuInterval {
    pub cpu: CpuId,
    pub start_timestamp: Timestamp,
    pub end_timestamp: Timestamp,
    /// How many elementary intervals were folded in.
    pub merged_interval_count: usize,
    /// Distinct threads that ran during the interval, by PID. Empty means
    /// the CPU was idle throughout.
    pub running: Vec<Thread>,
    /// Distinct threads that waited during the interval, by PID.
    pub waiting: Vec<Thread>,
}

impl CpuInterval {
    #[must_use]
    pub fn duration(&self) -> TraceDuration {
        self.end_timestamp.duration_since(self.start_timestamp)
    }

    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.running.is_empty()
    }
}

/// Intervals of the filter's single CPU.
pub(crate) fn cpu_intervals(
    collection: &Collection,
    split_on_waiting_pid_change: bool,
    resolved: &ResolvedFilter,
) -> Result<Vec<CpuInterval>, QueryError> {
    let [cpu] = resolved.cpus.as_slice() else {
        return Err(QueryError::one_cpu());
    };
    let full = collection.full_elementary_intervals(resolved)?;

    let mut intervals: Vec<CpuInterval> = Vec::new();
    // Occupancy of the most recently absorbed elementary interval, used
    // for the unchanged-occupancy merge test.
    let mut last_running: Option<Pid> = None;
    let mut last_waiting: Vec<Pid> = Vec::new();

    for elementary in full {
        let state = elementary
            .cpu_states
            .first()
            .ok_or_else(|| QueryError::Internal("full interval without cpu state".to_string()))?;
        let running_pid = state.running.as_ref().map(|t| t.pid);
        let waiting_pids: Vec<Pid> = state.waiting.iter().map(|t| t.pid).collect();

        let extend = intervals.last().is_some_and(|last| {
            let same_running = last_running == running_pid;
            let same_waiting = !split_on_waiting_pid_change || last_waiting == waiting_pids;
            let min = resolved.min_interval_duration;
            let too_short = min > TraceDuration::ZERO
                && (last.duration() < min || duration_of(&elementary) < min);
            (same_running && same_waiting) || too_short
        });

        if extend {
            if let Some(last) = intervals.last_mut() {
                last.end_timestamp = elementary.end_timestamp;
                last.merged_interval_count += 1;
                if let Some(thread) = &state.running {
                    if !last.running.iter().any(|t| t.pid == thread.pid) {
                        last.running.push(thread.clone());
                    }
                }
                for thread in &state.waiting {
                    if !last.waiting.iter().any(|t| t.pid == thread.pid) {
                        last.waiting.push(thread.clone());
                    }
                }
            }
        } else {
            intervals.push(CpuInterval {
                cpu: *cpu,
                start_timestamp: elementary.start_timestamp,
                end_timestamp: elementary.end_timestamp,
                merged_interval_count: 1,
                running: state.running.clone().into_iter().collect(),
                waiting: state.waiting.clone(),
            });
        }

        last_running = running_pid;
        last_waiting = waiting_pids;
    }

    for interval in &mut intervals {
        interval.running.sort_by_key(|t| t.pid);
        interval.waiting.sort_by_key(|t| t.pid);
    }
    Ok(intervals)
}

fn duration_of(interval: &ElementaryCpuInterval) -> TraceDuration {
    interval.end_timestamp.duration_since(interval.start_timestamp)
}
