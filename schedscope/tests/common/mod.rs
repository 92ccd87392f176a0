//! Shared fixtures: decoded-event builders and the baseline trace.

// Each test binary uses a subset of these helpers.
#![allow(dead_code)]

use schedscope_common::{
    TraceEvent, FIELD_COMM, FIELD_DEST_CPU, FIELD_NEXT_COMM, FIELD_NEXT_PID, FIELD_NEXT_PRIO,
    FIELD_ORIG_CPU, FIELD_PID, FIELD_PREV_COMM, FIELD_PREV_PID, FIELD_PREV_PRIO, FIELD_PREV_STATE,
    FIELD_PRIO, FIELD_TARGET_CPU, SCHED_MIGRATE_TASK, SCHED_SWITCH, SCHED_WAKEUP,
};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn comm(pid: i64) -> String {
    format!("task{pid}")
}

pub fn switch(
    index: i64,
    cpu: i64,
    ts: u64,
    prev_pid: i64,
    prev_state: i64,
    next_pid: i64,
) -> TraceEvent {
    TraceEvent::new(index, SCHED_SWITCH, cpu, ts)
        .with_number(FIELD_PREV_PID, prev_pid)
        .with_number(FIELD_PREV_PRIO, 120)
        .with_number(FIELD_PREV_STATE, prev_state)
        .with_number(FIELD_NEXT_PID, next_pid)
        .with_number(FIELD_NEXT_PRIO, 120)
        .with_text(FIELD_PREV_COMM, comm(prev_pid))
        .with_text(FIELD_NEXT_COMM, comm(next_pid))
}

pub fn wakeup(index: i64, ts: u64, pid: i64, target_cpu: i64) -> TraceEvent {
    TraceEvent::new(index, SCHED_WAKEUP, target_cpu, ts)
        .with_number(FIELD_PID, pid)
        .with_number(FIELD_PRIO, 120)
        .with_number(FIELD_TARGET_CPU, target_cpu)
        .with_text(FIELD_COMM, comm(pid))
}

pub fn migrate(index: i64, ts: u64, pid: i64, orig_cpu: i64, dest_cpu: i64) -> TraceEvent {
    TraceEvent::new(index, SCHED_MIGRATE_TASK, orig_cpu, ts)
        .with_number(FIELD_PID, pid)
        .with_number(FIELD_PRIO, 120)
        .with_number(FIELD_ORIG_CPU, orig_cpu)
        .with_number(FIELD_DEST_CPU, dest_cpu)
        .with_text(FIELD_COMM, comm(pid))
}

/// The baseline four-thread, two-CPU trace: 200 hands cpu 1 to 300 and
/// sleeps, 100 wakes and takes over, 200 wakes, migrates to cpu 2 and
/// preempts 400 there while 300 retakes cpu 1.
pub fn baseline_events() -> Vec<TraceEvent> {
    vec![
        switch(0, 1, 1000, 200, 1, 300),
        wakeup(1, 1000, 100, 1),
        switch(2, 1, 1010, 300, 1, 100),
        wakeup(3, 1040, 200, 1),
        migrate(4, 1080, 200, 1, 2),
        wakeup(5, 1090, 300, 1),
        switch(6, 2, 1100, 400, 0, 200),
        switch(7, 1, 1100, 100, 0, 300),
    ]
}
