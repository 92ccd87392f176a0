//! Thread statistics and per-thread summaries.
//!
//! Both walk each thread's unmerged, truncated intervals. Per-thread
//! walks are independent, so they fan out across worker threads and
//! aggregate from a channel on the calling thread.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::filter::ResolvedFilter;
use super::thread_intervals::{intervals_for_pid, ThreadInterval};
use crate::collection::Collection;
use crate::domain::types::{CpuId, Pid, Priority, SpanState, Timestamp, TraceDuration};
use crate::domain::QueryError;

/// Aggregate scheduling behavior over a set of threads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadStatistics {
    pub run_time: TraceDuration,
    pub wait_time: TraceDuration,
    pub sleep_time: TraceDuration,
    pub unknown_time: TraceDuration,
    /// Interval-to-interval CPU changes.
    pub migration_count: usize,
    /// Times a thread entered the runnable Waiting state.
    pub wakeup_count: usize,
    /// Waiting time contiguous with, and following, a Sleeping→Waiting
    /// transition.
    pub post_wakeup_wait_time: TraceDuration,
}

impl ThreadStatistics {
    fn absorb(&mut self, other: &ThreadStatistics) {
        self.run_time += other.run_time;
        self.wait_time += other.wait_time;
        self.sleep_time += other.sleep_time;
        self.unknown_time += other.unknown_time;
        self.migration_count += other.migration_count;
        self.wakeup_count += other.wakeup_count;
        self.post_wakeup_wait_time += other.post_wakeup_wait_time;
    }
}

/// One thread's metrics over the filter window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadSummary {
    pub pid: Pid,
    /// Distinct command names observed, sorted.
    pub commands: Vec<String>,
    /// Distinct priorities observed, ascending.
    pub priorities: Vec<Priority>,
    /// Distinct CPUs resided on, ascending.
    pub cpus: Vec<CpuId>,
    pub statistics: ThreadStatistics,
    pub start_timestamp: Timestamp,
    pub end_timestamp: Timestamp,
}

/// Collection-wide totals, one worker per thread.
pub(crate) fn thread_stats(
    collection: &Collection,
    resolved: &ResolvedFilter,
) -> Result<ThreadStatistics, QueryError> {
    let per_pid = fan_out(collection, resolved, |collection, pid, resolved| {
        let intervals = intervals_for_pid(collection, pid, resolved)?;
        Ok(walk_intervals(&intervals, None))
    })?;

    let mut total = ThreadStatistics::default();
    for stats in &per_pid {
        total.absorb(stats);
    }
    Ok(total)
}

/// Per-thread metrics, one worker per thread. Migrations count only when
/// the destination CPU is in the filter.
pub(crate) fn thread_summaries(
    collection: &Collection,
    resolved: &ResolvedFilter,
) -> Result<Vec<ThreadSummary>, QueryError> {
    let cpu_set: BTreeSet<CpuId> = resolved.cpus.iter().copied().collect();
    fan_out(collection, resolved, move |collection, pid, resolved| {
        let intervals = intervals_for_pid(collection, pid, resolved)?;
        let statistics = walk_intervals(&intervals, Some(&cpu_set));

        let mut commands = BTreeSet::new();
        let mut priorities = BTreeSet::new();
        let mut cpus = BTreeSet::new();
        for interval in &intervals {
            cpus.insert(interval.cpu);
            for residency in &interval.thread_residencies {
                commands.insert(residency.thread.command.clone());
                if residency.thread.priority.is_known() {
                    priorities.insert(residency.thread.priority);
                }
            }
        }

        Ok(ThreadSummary {
            pid,
            commands: commands.into_iter().collect(),
            priorities: priorities.into_iter().collect(),
            cpus: cpus.into_iter().collect(),
            statistics,
            start_timestamp: intervals.first().map_or(Timestamp::UNKNOWN, |i| i.start_timestamp),
            end_timestamp: intervals.last().map_or(Timestamp::UNKNOWN, |i| i.end_timestamp),
        })
    })
}

/// Accumulate statistics over one thread's interval walk.
///
/// `migrations_into` restricts migration counting to destinations in the
/// given CPU set (summaries count "migrations in").
fn walk_intervals(
    intervals: &[ThreadInterval],
    migrations_into: Option<&BTreeSet<CpuId>>,
) -> ThreadStatistics {
    let mut stats = ThreadStatistics::default();
    let mut prev_state: Option<SpanState> = None;
    let mut prev_cpu: Option<CpuId> = None;
    let mut in_post_wakeup_wait = false;

    for interval in intervals {
        // Unmerged intervals carry exactly one residency.
        let Some(state) = interval.sole_state() else { continue };
        let duration = interval.duration();

        match state {
            SpanState::Running => stats.run_time += duration,
            SpanState::Waiting => stats.wait_time += duration,
            SpanState::Sleeping => stats.sleep_time += duration,
            SpanState::Unknown => stats.unknown_time += duration,
        }

        if let Some(prev) = prev_cpu {
            if prev != interval.cpu
                && migrations_into.is_none_or(|admitted| admitted.contains(&interval.cpu))
            {
                stats.migration_count += 1;
            }
        }

        if state == SpanState::Waiting {
            if prev_state != Some(SpanState::Waiting) {
                stats.wakeup_count += 1;
                in_post_wakeup_wait = prev_state == Some(SpanState::Sleeping);
            }
            if in_post_wakeup_wait {
                stats.post_wakeup_wait_time += duration;
            }
        } else {
            in_post_wakeup_wait = false;
        }

        prev_state = Some(state);
        prev_cpu = Some(interval.cpu);
    }
    stats
}

/// Run `work` once per filtered PID across worker threads; results come
/// back in PID order.
fn fan_out<T, F>(
    collection: &Collection,
    resolved: &ResolvedFilter,
    work: F,
) -> Result<Vec<T>, QueryError>
where
    T: Send,
    F: Fn(&Collection, Pid, &ResolvedFilter) -> Result<T, QueryError> + Sync,
{
    let pids = &resolved.pids;
    if pids.is_empty() {
        return Ok(Vec::new());
    }

    let workers = std::thread::available_parallelism().map_or(4, usize::from).min(pids.len());
    let chunk_size = pids.len().div_ceil(workers);
    let (tx, rx) = crossbeam_channel::unbounded::<(usize, Result<T, QueryError>)>();

    std::thread::scope(|scope| {
        for (chunk_index, chunk) in pids.chunks(chunk_size).enumerate() {
            let tx = tx.clone();
            let work = &work;
            scope.spawn(move || {
                for (offset, &pid) in chunk.iter().enumerate() {
                    let index = chunk_index * chunk_size + offset;
                    if tx.send((index, work(collection, pid, resolved))).is_err() {
                        return;
                    }
                }
            });
        }
        drop(tx);

        let mut results: Vec<Option<T>> = Vec::with_capacity(pids.len());
        results.resize_with(pids.len(), || None);
        for (index, result) in rx {
            results[index] = Some(result?);
        }
        results
            .into_iter()
            .map(|slot| {
                slot.ok_or_else(|| QueryError::Internal("per-thread worker died".to_string()))
            })
            .collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::Thread;
    use crate::queries::thread_intervals::ThreadResidency;

    fn interval(start: i64, end: i64, cpu: i64, state: SpanState) -> ThreadInterval {
        ThreadInterval {
            start_timestamp: Timestamp(start),
            end_timestamp: Timestamp(end),
            cpu: CpuId(cpu),
            merged_interval_count: 1,
            thread_residencies: vec![ThreadResidency {
                thread: Thread {
                    pid: Pid(100),
                    command: "cat".to_string(),
                    priority: Priority(120),
                },
                state,
                duration: TraceDuration(end - start),
                dropped_event_count: 0,
                includes_synthetic: false,
            }],
        }
    }

    #[test]
    fn test_walk_accumulates_state_times() {
        let intervals = vec![
            interval(0, 10, 1, SpanState::Waiting),
            interval(10, 100, 1, SpanState::Running),
            interval(100, 120, 1, SpanState::Sleeping),
        ];
        let stats = walk_intervals(&intervals, None);
        assert_eq!(stats.wait_time, TraceDuration(10));
        assert_eq!(stats.run_time, TraceDuration(90));
        assert_eq!(stats.sleep_time, TraceDuration(20));
        assert_eq!(stats.wakeup_count, 1);
        assert_eq!(stats.migration_count, 0);
    }

    #[test]
    fn test_walk_counts_migrations_and_wakeups() {
        let intervals = vec![
            interval(0, 40, 1, SpanState::Sleeping),
            interval(40, 80, 1, SpanState::Waiting),
            interval(80, 100, 2, SpanState::Waiting),
            interval(100, 110, 2, SpanState::Running),
        ];
        let stats = walk_intervals(&intervals, None);
        // One migration at 80; the cpu change does not restart the
        // waiting run, so only one wakeup.
        assert_eq!(stats.migration_count, 1);
        assert_eq!(stats.wakeup_count, 1);
        assert_eq!(stats.post_wakeup_wait_time, TraceDuration(60));
    }

    #[test]
    fn test_post_wakeup_requires_sleeping_predecessor() {
        let intervals = vec![
            interval(0, 10, 1, SpanState::Running),
            interval(10, 30, 1, SpanState::Waiting),
        ];
        let stats = walk_intervals(&intervals, None);
        // Preemption is an entry into Waiting but not a wakeup from
        // sleep, so no post-wakeup time accrues.
        assert_eq!(stats.wakeup_count, 1);
        assert_eq!(stats.post_wakeup_wait_time, TraceDuration::ZERO);
    }

    #[test]
    fn test_migrations_in_respect_cpu_filter() {
        let intervals = vec![
            interval(0, 40, 1, SpanState::Waiting),
            interval(40, 80, 2, SpanState::Waiting),
            interval(80, 100, 1, SpanState::Waiting),
        ];
        let only_cpu1: BTreeSet<CpuId> = [CpuId(1)].into_iter().collect();
        let stats = walk_intervals(&intervals, Some(&only_cpu1));
        // The move onto cpu 2 is not a migration "in"; the move back is.
        assert_eq!(stats.migration_count, 1);
    }
}
