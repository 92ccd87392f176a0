//! CPU utilization metrics.
//!
//! Walks full-mode elementary intervals over the selected CPUs and
//! classifies each CPU per interval: Idle (nothing running — the idle
//! thread holds the CPU), Overloaded (someone running with threads
//! waiting behind it), or neither (busy with no backlog, or an idle CPU
//! that nonetheless has waiters parked on it).

use serde::{Deserialize, Serialize};

use super::filter::ResolvedFilter;
use crate::collection::Collection;
use crate::domain::types::TraceDuration;
use crate::domain::QueryError;

/// How much waiting could have been absorbed by idle capacity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UtilizationMetrics {
    /// Time during which at least one CPU was idle while at least one
    /// other was overloaded.
    pub wall_time: TraceDuration,
    /// CPU-time: idle CPUs matched against overloaded CPUs.
    pub per_cpu_time: TraceDuration,
    /// CPU-time: idle CPUs matched against individual waiting threads.
    pub per_thread_time: TraceDuration,
    /// 1 − idle CPU-time / total CPU-time over the window.
    pub utilization_fraction: f64,
}

// Waiter and CPU counts are tiny; the casts cannot wrap.
#[allow(clippy::cast_possible_wrap)]
pub(crate) fn utilization_metrics(
    collection: &Collection,
    resolved: &ResolvedFilter,
) -> Result<UtilizationMetrics, QueryError> {
    let full = collection.full_elementary_intervals(resolved)?;

    let mut wall_time = TraceDuration::ZERO;
    let mut per_cpu_time = TraceDuration::ZERO;
    let mut per_thread_time = TraceDuration::ZERO;
    let mut idle_cpu_time: i64 = 0;

    for interval in full {
        let delta = interval.end_timestamp.0 - interval.start_timestamp.0;
        let mut idle: i64 = 0;
        let mut overloaded: i64 = 0;
        let mut waiter_count: i64 = 0;

        for state in &interval.cpu_states {
            let has_runner = state.running.is_some();
            let has_waiters = !state.waiting.is_empty();
            waiter_count += state.waiting.len() as i64;
            // A CPU that is idle yet has waiters parked on it counts as
            // neither idle capacity nor overload.
            if !has_runner && !has_waiters {
                idle += 1;
            } else if has_runner && has_waiters {
                overloaded += 1;
            }
        }

        idle_cpu_time += idle * delta;
        if idle > 0 && overloaded > 0 {
            wall_time += TraceDuration(delta);
        }
        per_cpu_time += TraceDuration(idle.min(overloaded) * delta);
        per_thread_time += TraceDuration(idle.min(waiter_count) * delta);
    }

    let window = resolved.hi.duration_since(resolved.lo);
    let total_cpu_time = window.0 * resolved.cpus.len() as i64;
    #[allow(clippy::cast_precision_loss)]
    let utilization_fraction = if total_cpu_time > 0 {
        1.0 - idle_cpu_time as f64 / total_cpu_time as f64
    } else {
        0.0
    };

    Ok(UtilizationMetrics { wall_time, per_cpu_time, per_thread_time, utilization_fraction })
}
