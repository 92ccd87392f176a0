//! Analytic query scenarios over built collections.

mod common;

use schedscope::intervals::ElementaryIntervalMerger;
use schedscope::{
    Collection, CollectionFilter, CollectionOptions, CpuId, ElementaryIntervalMode, Pid,
    QueryError, SpanState, Timestamp, TraceDuration,
};

use common::{baseline_events, init_logging, migrate, switch, wakeup};

fn baseline() -> Collection {
    init_logging();
    Collection::new(baseline_events(), CollectionOptions::default()).unwrap()
}

#[test]
fn test_thread_intervals_unmerged() {
    let collection = baseline();
    let intervals = collection
        .thread_intervals(&CollectionFilter::new().with_pids([Pid(100)]))
        .unwrap();

    let shape: Vec<(i64, i64, i64, Option<SpanState>)> = intervals
        .iter()
        .map(|i| (i.start_timestamp.0, i.end_timestamp.0, i.cpu.0, i.sole_state()))
        .collect();
    assert_eq!(
        shape,
        vec![
            (0, 10, 1, Some(SpanState::Waiting)),
            (10, 100, 1, Some(SpanState::Running)),
            // The trailing span is clipped to the window boundary.
            (100, 100, 1, Some(SpanState::Waiting)),
        ]
    );
}

#[test]
fn test_thread_intervals_requires_single_pid() {
    let collection = baseline();
    let err = collection.thread_intervals(&CollectionFilter::new()).unwrap_err();
    assert!(matches!(err, QueryError::InvalidArgument(_)));
}

#[test]
fn test_thread_intervals_merge_short_intervals() {
    let collection = baseline();
    let intervals = collection
        .thread_intervals(
            &CollectionFilter::new()
                .with_pids([Pid(200)])
                .with_min_interval_duration(TraceDuration(45)),
        )
        .unwrap();

    assert_eq!(intervals.len(), 2);

    let first = &intervals[0];
    assert_eq!((first.start_timestamp.0, first.end_timestamp.0, first.cpu.0), (0, 80, 1));
    assert_eq!(first.merged_interval_count, 3);
    let states: Vec<(SpanState, i64)> =
        first.thread_residencies.iter().map(|r| (r.state, r.duration.0)).collect();
    // Residencies ordered Running, Sleeping, Unknown, Waiting.
    assert_eq!(
        states,
        vec![(SpanState::Running, 0), (SpanState::Sleeping, 40), (SpanState::Waiting, 40)]
    );

    let second = &intervals[1];
    assert_eq!((second.start_timestamp.0, second.end_timestamp.0, second.cpu.0), (80, 100, 2));
    assert_eq!(second.merged_interval_count, 2);
}

#[test]
fn test_thread_intervals_untruncated_overhang() {
    let collection = baseline();
    let intervals = collection
        .thread_intervals(
            &CollectionFilter::new()
                .with_pids([Pid(100)])
                .with_time_range(Timestamp(50), Timestamp(95))
                .with_truncate_to_time_range(false),
        )
        .unwrap();
    assert_eq!(intervals.len(), 1);
    // Natural span endpoints, outside the requested window.
    assert_eq!(intervals[0].start_timestamp, Timestamp(10));
    assert_eq!(intervals[0].end_timestamp, Timestamp(100));
}

#[test]
fn test_antagonists_of_thread_300() {
    let collection = baseline();
    let antagonisms =
        collection.antagonists(&CollectionFilter::new().with_pids([Pid(300)])).unwrap();

    assert_eq!(antagonisms.len(), 1);
    let a = &antagonisms[0];
    assert_eq!(a.running_thread.pid, Pid(100));
    assert_eq!(a.running_thread.command, "task100");
    assert_eq!(a.cpu, CpuId(1));
    assert_eq!((a.start_timestamp, a.end_timestamp), (Timestamp(90), Timestamp(100)));
}

#[test]
fn test_antagonists_reject_swapper_and_multi_pid() {
    let collection = baseline();
    assert!(matches!(
        collection.antagonists(&CollectionFilter::new().with_pids([Pid(0)])),
        Err(QueryError::InvalidArgument(_))
    ));
    assert!(matches!(
        collection.antagonists(&CollectionFilter::new()),
        Err(QueryError::InvalidArgument(_))
    ));
}

#[test]
fn test_thread_stats_over_baseline() {
    let collection = baseline();
    let stats = collection.thread_stats(&CollectionFilter::new()).unwrap();

    assert_eq!(stats.run_time, TraceDuration(200));
    assert_eq!(stats.wait_time, TraceDuration(80));
    assert_eq!(stats.sleep_time, TraceDuration(120));
    assert_eq!(stats.unknown_time, TraceDuration(0));
    assert_eq!(stats.migration_count, 1);
    assert_eq!(stats.wakeup_count, 5);
    assert_eq!(stats.post_wakeup_wait_time, TraceDuration(70));
}

#[test]
fn test_thread_summaries_over_baseline() {
    let collection = baseline();
    let summaries = collection.thread_summaries(&CollectionFilter::new()).unwrap();
    assert_eq!(summaries.len(), 4);

    let s200 = summaries.iter().find(|s| s.pid == Pid(200)).unwrap();
    assert_eq!(s200.commands, vec!["task200".to_string()]);
    assert_eq!(s200.cpus, vec![CpuId(1), CpuId(2)]);
    assert_eq!(s200.statistics.sleep_time, TraceDuration(40));
    assert_eq!(s200.statistics.wait_time, TraceDuration(60));
    assert_eq!(s200.statistics.run_time, TraceDuration(0));
    assert_eq!(s200.statistics.migration_count, 1);
    assert_eq!(s200.statistics.wakeup_count, 1);

    // Restricting the CPU filter to cpu 1 drops the migration "in" to
    // cpu 2.
    let summaries = collection
        .thread_summaries(&CollectionFilter::new().with_pids([Pid(200)]).with_cpus([CpuId(1)]))
        .unwrap();
    assert_eq!(summaries[0].statistics.migration_count, 0);
}

#[test]
fn test_cpu_intervals_merge_on_unchanged_runner() {
    let collection = baseline();
    let intervals = collection
        .cpu_intervals(&CollectionFilter::new().with_cpus([CpuId(1)]), false)
        .unwrap();

    let shape: Vec<(i64, i64, Vec<i64>)> = intervals
        .iter()
        .map(|i| {
            (i.start_timestamp.0, i.end_timestamp.0, i.running.iter().map(|t| t.pid.0).collect())
        })
        .collect();
    assert_eq!(
        shape,
        vec![(0, 10, vec![300]), (10, 100, vec![100]), (100, 100, vec![300])]
    );

    // Waiters accumulate across the merged middle stretch.
    let middle = &intervals[1];
    let waiting: Vec<i64> = middle.waiting.iter().map(|t| t.pid.0).collect();
    assert_eq!(waiting, vec![200, 300]);
    assert_eq!(middle.merged_interval_count, 4);
}

#[test]
fn test_cpu_intervals_split_on_waiting_change() {
    let collection = baseline();
    let merged = collection
        .cpu_intervals(&CollectionFilter::new().with_cpus([CpuId(1)]), true)
        .unwrap();
    let boundaries: Vec<(i64, i64)> =
        merged.iter().map(|i| (i.start_timestamp.0, i.end_timestamp.0)).collect();
    assert_eq!(
        boundaries,
        vec![(0, 10), (10, 40), (40, 80), (80, 90), (90, 100), (100, 100)]
    );
}

#[test]
fn test_cpu_intervals_requires_single_cpu() {
    let collection = baseline();
    let err = collection.cpu_intervals(&CollectionFilter::new(), false).unwrap_err();
    assert!(matches!(err, QueryError::InvalidArgument(_)));
}

#[test]
fn test_elementary_intervals_diff_full_equivalence() {
    let collection = baseline();
    let filter = CollectionFilter::new();

    let diff =
        collection.elementary_intervals(&filter, ElementaryIntervalMode::Diff).unwrap();
    let full =
        collection.elementary_intervals(&filter, ElementaryIntervalMode::Full).unwrap();

    let mut merger = ElementaryIntervalMerger::new(collection.cpus());
    let merged: Vec<_> = diff.iter().map(|interval| merger.merge(interval)).collect();
    assert_eq!(merged, full);
}

#[test]
fn test_elementary_intervals_untruncated_needs_single_cpu() {
    let collection = baseline();
    let filter = CollectionFilter::new().with_truncate_to_time_range(false);
    assert!(matches!(
        collection.elementary_intervals(&filter, ElementaryIntervalMode::Diff),
        Err(QueryError::InvalidArgument(_))
    ));

    let single = filter.with_cpus([CpuId(1)]);
    assert!(collection.elementary_intervals(&single, ElementaryIntervalMode::Diff).is_ok());
}

#[test]
fn test_elementary_intervals_state_mask_collapses() {
    let collection = baseline();
    // Running-only: waiting starts/ends no longer split intervals.
    let filter = CollectionFilter::new()
        .with_cpus([CpuId(1)])
        .with_thread_states(schedscope::ThreadState::RUNNING);
    let intervals =
        collection.elementary_intervals(&filter, ElementaryIntervalMode::Full).unwrap();
    let boundaries: Vec<(i64, i64)> =
        intervals.iter().map(|i| (i.start_timestamp.0, i.end_timestamp.0)).collect();
    assert_eq!(boundaries, vec![(0, 10), (10, 100), (100, 100)]);
    assert!(intervals.iter().all(|i| i.cpu_states.iter().all(|s| s.waiting.is_empty())));
}

/// Four CPUs; idle capacity sits next to overload in the first two
/// stretches, a swapper-held CPU with a parked waiter in the third, and
/// pure idle headroom at the end.
fn utilization_events() -> Vec<schedscope_common::TraceEvent> {
    vec![
        switch(0, 0, 1000, 500, 1, 0),
        switch(1, 1, 1000, 501, 1, 0),
        switch(2, 2, 1000, 0, 0, 210),
        wakeup(3, 1000, 211, 2),
        wakeup(4, 1000, 212, 2),
        switch(5, 3, 1000, 0, 0, 220),
        wakeup(6, 1000, 221, 3),
        migrate(7, 1040, 211, 2, 1),
        switch(8, 1, 1040, 0, 0, 211),
        migrate(9, 1040, 212, 2, 1),
        migrate(10, 1040, 221, 3, 1),
        switch(11, 1, 1100, 211, 1, 0),
        migrate(12, 1100, 221, 1, 3),
        switch(13, 3, 1100, 220, 1, 221),
        migrate(14, 1110, 212, 1, 2),
        switch(15, 2, 1110, 210, 1, 212),
        switch(16, 3, 1175, 221, 1, 0),
    ]
}

#[test]
fn test_utilization_metrics() {
    init_logging();
    let collection =
        Collection::new(utilization_events(), CollectionOptions::default()).unwrap();
    assert_eq!(collection.cpus(), vec![CpuId(0), CpuId(1), CpuId(2), CpuId(3)]);

    let metrics = collection.utilization_metrics(&CollectionFilter::new()).unwrap();
    assert_eq!(metrics.wall_time, TraceDuration(100));
    assert_eq!(metrics.per_cpu_time, TraceDuration(140));
    assert_eq!(metrics.per_thread_time, TraceDuration(150));
    assert!((metrics.utilization_fraction - 0.6).abs() < 1e-9);
}

#[test]
fn test_utilization_fully_idle_window() {
    init_logging();
    // One CPU, nothing but an idle hand-off: utilization is zero.
    let events = vec![switch(0, 0, 1000, 500, 1, 0), switch(1, 0, 1100, 0, 0, 500)];
    let collection = Collection::new(events, CollectionOptions::default()).unwrap();
    let metrics = collection.utilization_metrics(&CollectionFilter::new()).unwrap();
    assert_eq!(metrics.wall_time, TraceDuration(0));
    assert!((metrics.utilization_fraction - 0.0).abs() < 1e-9);
}
