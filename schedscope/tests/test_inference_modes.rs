//! Loader-set behaviors: switch-only synthesis, fault-tolerant drops,
//! and inference as the left inverse of attestation erasure.

mod common;

use schedscope::inference::{SplitOptions, ThreadInferrer, ThreadSpanBuilder, Transition};
use schedscope::{
    Collection, CollectionError, CollectionOptions, CpuId, LoaderSet, Pid, SpanState, ThreadState,
    Timestamp,
};

use common::{init_logging, migrate, switch};

fn shape(collection: &Collection, pid: i64) -> Vec<(i64, i64, i64, SpanState)> {
    collection
        .thread_spans(Pid(pid))
        .iter()
        .map(|s| (s.start.0, s.end.0, s.cpu.0, s.state))
        .collect()
}

/// Two CPUs recorded with only `sched_switch`: threads vanish from one
/// CPU and reappear on another, and the inferrer must invent the
/// migrations halfway between the attestations.
#[test]
fn test_switch_only_trace_synthesizes_migrations() {
    init_logging();
    let events = vec![
        switch(0, 0, 1000, 100, 0, 200),
        switch(1, 1, 1010, 300, 0, 400),
        switch(2, 0, 1020, 200, 0, 300),
        switch(3, 1, 1030, 400, 0, 100),
    ];
    let options = CollectionOptions { loaders: LoaderSet::SwitchOnly, ..Default::default() };
    let collection = Collection::new(events, options).unwrap();

    assert_eq!(
        shape(&collection, 300),
        vec![
            (0, 10, 1, SpanState::Running),
            (10, 15, 1, SpanState::Waiting),
            (15, 20, 0, SpanState::Waiting),
            (20, 31, 0, SpanState::Running),
        ]
    );
    assert_eq!(
        shape(&collection, 100),
        vec![
            (0, 0, 0, SpanState::Running),
            (0, 15, 0, SpanState::Waiting),
            (15, 30, 1, SpanState::Waiting),
            (30, 31, 1, SpanState::Running),
        ]
    );

    // The invented migration marks both adjoining spans synthetic.
    for pid in [100, 300] {
        let spans = collection.thread_spans(Pid(pid));
        let before = spans.iter().find(|s| s.end == Timestamp(15)).unwrap();
        let after = spans.iter().find(|s| s.start == Timestamp(15)).unwrap();
        assert!(before.synthetic_end, "span before the synthetic migration of {pid}");
        assert!(after.synthetic_start, "span after the synthetic migration of {pid}");
    }
}

#[test]
fn test_switch_only_leaves_unwitnessed_stretch_unknown() {
    init_logging();
    let events = vec![
        switch(0, 0, 1000, 100, 0, 200),
        switch(1, 1, 1010, 300, 0, 400),
        switch(2, 0, 1020, 200, 0, 300),
        switch(3, 1, 1030, 400, 0, 100),
    ];
    let options = CollectionOptions { loaders: LoaderSet::SwitchOnly, ..Default::default() };
    let collection = Collection::new(events, options).unwrap();

    // Before its first switch-in, 400 could be waiting or sleeping.
    assert_eq!(
        shape(&collection, 400),
        vec![
            (0, 10, 1, SpanState::Unknown),
            (10, 30, 1, SpanState::Running),
            (30, 31, 1, SpanState::Waiting),
        ]
    );
}

#[test]
fn test_bogus_migration_fails_default_loader() {
    init_logging();
    let events = vec![
        switch(0, 0, 1000, 900, 0, 100),
        migrate(1, 1010, 100, 2, 3),
        switch(2, 0, 1020, 100, 1, 900),
    ];
    let err = Collection::new(events, CollectionOptions::default()).unwrap_err();
    assert!(matches!(err, CollectionError::Unresolvable { kind: "cpu", .. }));
}

#[test]
fn test_bogus_migration_dropped_by_fault_tolerant_loader() {
    init_logging();
    let events = vec![
        switch(0, 0, 1000, 900, 0, 100),
        migrate(1, 1010, 100, 2, 3),
        switch(2, 0, 1020, 100, 1, 900),
    ];
    let options = CollectionOptions { loaders: LoaderSet::FaultTolerant, ..Default::default() };
    let collection = Collection::new(events, options).unwrap();

    assert_eq!(
        shape(&collection, 100),
        vec![(0, 20, 0, SpanState::Running), (20, 21, 0, SpanState::Sleeping)]
    );
    // The discarded migration is remembered by the span it fell into,
    // and nothing references its claimed CPUs.
    assert_eq!(collection.thread_spans(Pid(100))[0].dropped_event_indices, vec![1]);
    for pid in collection.pids() {
        for span in collection.thread_spans(pid) {
            assert!(span.cpu == CpuId(0), "no span may reference the dropped CPUs");
        }
    }
}

fn fully_attested() -> Vec<Transition> {
    let pid = Pid(100);
    let mut switched_in = Transition::from_event(0, pid, Timestamp(10));
    switched_in.prev_cpu = CpuId(0);
    switched_in.next_cpu = CpuId(0);
    switched_in.cpu_propagates_through = true;
    switched_in.prev_state = ThreadState::WAITING | ThreadState::SLEEPING;
    switched_in.next_state = ThreadState::RUNNING;
    switched_in.state_propagates_through = false;

    let mut switched_out = Transition::from_event(1, pid, Timestamp(20));
    switched_out.prev_cpu = CpuId(0);
    switched_out.next_cpu = CpuId(0);
    switched_out.cpu_propagates_through = true;
    switched_out.prev_state = ThreadState::RUNNING;
    switched_out.next_state = ThreadState::SLEEPING;
    switched_out.state_propagates_through = false;

    // A migration whose states are fully attested rather than inferred.
    let mut migrated = Transition::from_event(2, pid, Timestamp(30));
    migrated.prev_cpu = CpuId(0);
    migrated.next_cpu = CpuId(1);
    migrated.cpu_propagates_through = false;
    migrated.prev_state = ThreadState::SLEEPING;
    migrated.next_state = ThreadState::SLEEPING;
    migrated.state_propagates_through = false;

    let mut switched_in_again = Transition::from_event(3, pid, Timestamp(40));
    switched_in_again.prev_cpu = CpuId(1);
    switched_in_again.next_cpu = CpuId(1);
    switched_in_again.cpu_propagates_through = true;
    switched_in_again.prev_state = ThreadState::WAITING | ThreadState::SLEEPING;
    switched_in_again.next_state = ThreadState::RUNNING;
    switched_in_again.state_propagates_through = false;

    vec![switched_in, switched_out, migrated, switched_in_again]
}

/// Blank the attestations real traces leave out — migration states and
/// wakeup-style prev sides — leaving inference to restore them.
fn erased(transitions: &[Transition]) -> Vec<Transition> {
    let mut erased: Vec<Transition> = transitions.to_vec();
    let migrated = &mut erased[2];
    migrated.prev_state = ThreadState::ANY;
    migrated.next_state = ThreadState::ANY;
    migrated.state_propagates_through = true;
    erased
}

fn spans_of(transitions: Vec<Transition>) -> Vec<(i64, i64, i64, SpanState)> {
    let pid = Pid(100);
    let mut inferrer = ThreadInferrer::new(pid);
    let mut builder = ThreadSpanBuilder::new(pid, SplitOptions::default());
    let mut inferred = Vec::new();

    inferrer.add(Transition::synthetic(pid, Timestamp(0)), &mut inferred).unwrap();
    for t in transitions {
        inferrer.add(t, &mut inferred).unwrap();
    }
    inferrer.add(Transition::synthetic(pid, Timestamp(50)), &mut inferred).unwrap();
    inferrer.finish(&mut inferred).unwrap();

    for t in &inferred {
        builder.process(t).unwrap();
    }
    builder
        .finish(Timestamp(50))
        .into_iter()
        .map(|s| (s.start.0, s.end.0, s.cpu.0, s.state))
        .collect()
}

#[test]
fn test_inference_restores_erased_attestations() {
    let full = fully_attested();
    let partial = erased(&full);
    let full_spans = spans_of(full);
    assert_eq!(
        full_spans,
        vec![
            (0, 10, 0, SpanState::Unknown),
            (10, 20, 0, SpanState::Running),
            (20, 30, 0, SpanState::Sleeping),
            (30, 40, 1, SpanState::Sleeping),
            (40, 50, 1, SpanState::Running),
        ]
    );
    assert_eq!(spans_of(partial), full_spans);
}
