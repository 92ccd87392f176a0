//! Event loaders: decoded tracepoint events → per-thread transitions.
//!
//! Each recognized event kind maps to one or two transitions with the
//! conflict policies appropriate to how trustworthy that event kind is.
//! Wakeups fire from interrupt context and routinely re-report threads
//! that are already runnable, so everything about them may be dropped;
//! switches are authoritative and default to failing on disagreement.
//!
//! Three loader sets cover different trace qualities:
//! - `Default`: switches and migrations fail on conflict, wakeups drop.
//! - `SwitchOnly`: only `sched_switch` is loaded, and conflicts insert
//!   synthetic transitions — for traces captured without wakeup or
//!   migration tracepoints, where migrations must be invented.
//! - `FaultTolerant`: like `Default`, but conflicting migrations are
//!   dropped instead of fatal — for overrun-prone traces.

use schedscope_common::{
    TraceEvent, FIELD_COMM, FIELD_DEST_CPU, FIELD_NEXT_COMM, FIELD_NEXT_PID, FIELD_NEXT_PRIO,
    FIELD_ORIG_CPU, FIELD_PID, FIELD_PREV_COMM, FIELD_PREV_PID, FIELD_PREV_PRIO, FIELD_PREV_STATE,
    FIELD_PRIO, FIELD_TARGET_CPU, SCHED_MIGRATE_TASK, SCHED_SWITCH, SCHED_WAKEUP, SCHED_WAKEUP_NEW,
};

use super::transition::{ConflictPolicy, Transition};
use crate::domain::types::{CpuId, Pid, Priority, ThreadState, Timestamp};
use crate::domain::CollectionError;
use crate::string_bank::StringBank;

/// Which loader set interprets the event stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoaderSet {
    #[default]
    Default,
    SwitchOnly,
    FaultTolerant,
}

impl LoaderSet {
    /// Map one decoded event to its transitions.
    ///
    /// # Errors
    ///
    /// [`CollectionError::UnknownEventFormat`] for an unrecognized event
    /// name; [`CollectionError::MissingField`] when the payload lacks a
    /// field the event's format requires.
    pub fn load(
        self,
        event: &TraceEvent,
        bank: &StringBank,
    ) -> Result<Vec<Transition>, CollectionError> {
        match (event.name.as_str(), self) {
            (SCHED_SWITCH, LoaderSet::SwitchOnly) => {
                load_switch(event, bank, ConflictPolicy::INSERT_SYNTHETIC)
            }
            (SCHED_SWITCH, _) => load_switch(event, bank, ConflictPolicy::FAIL),
            // Without wakeup/migration data the switch-only set treats the
            // rest of the scheduler family as absent, not unknown.
            (SCHED_WAKEUP | SCHED_WAKEUP_NEW | SCHED_MIGRATE_TASK, LoaderSet::SwitchOnly) => {
                Ok(Vec::new())
            }
            (SCHED_WAKEUP | SCHED_WAKEUP_NEW, _) => load_wakeup(event, bank),
            (SCHED_MIGRATE_TASK, LoaderSet::FaultTolerant) => {
                load_migrate(event, bank, ConflictPolicy::DROP)
            }
            (SCHED_MIGRATE_TASK, _) => load_migrate(event, bank, ConflictPolicy::FAIL),
            _ => Err(CollectionError::UnknownEventFormat(event.name.clone())),
        }
    }
}

fn event_timestamp(event: &TraceEvent) -> Timestamp {
    // Trace timestamps fit in i64; normalization only shrinks them.
    #[allow(clippy::cast_possible_wrap)]
    Timestamp(event.timestamp as i64)
}

/// Decode the `sched_switch` task-state word: interruptible-ish states
/// (bit 0) went to sleep voluntarily, everything else was preempted and
/// stays runnable.
fn switch_out_state(task_state: i64) -> ThreadState {
    if task_state & 1 == 0 {
        ThreadState::WAITING
    } else {
        ThreadState::SLEEPING
    }
}

/// `sched_switch`: two transitions, one per side of the context switch.
fn load_switch(
    event: &TraceEvent,
    bank: &StringBank,
    policy: ConflictPolicy,
) -> Result<Vec<Transition>, CollectionError> {
    let ts = event_timestamp(event);
    let cpu = CpuId(event.cpu);

    let next_pid = Pid(event.required_number(FIELD_NEXT_PID)?);
    let next_prio = Priority(event.required_number(FIELD_NEXT_PRIO)?);
    let next_comm = bank.intern(event.required_text(FIELD_NEXT_COMM)?);

    let prev_pid = Pid(event.required_number(FIELD_PREV_PID)?);
    let prev_prio = Priority(event.required_number(FIELD_PREV_PRIO)?);
    let prev_comm = bank.intern(event.required_text(FIELD_PREV_COMM)?);
    let prev_task_state = event.required_number(FIELD_PREV_STATE)?;

    let mut switched_in = Transition::from_event(event.index, next_pid, ts);
    switched_in.prev_cpu = cpu;
    switched_in.next_cpu = cpu;
    switched_in.cpu_propagates_through = true;
    switched_in.prev_state = ThreadState::WAITING | ThreadState::SLEEPING;
    switched_in.next_state = ThreadState::RUNNING;
    switched_in.state_propagates_through = false;
    switched_in.prev_command = Some(next_comm);
    switched_in.next_command = Some(next_comm);
    switched_in.prev_priority = next_prio;
    switched_in.next_priority = next_prio;
    set_policies(&mut switched_in, policy, policy);

    let mut switched_out = Transition::from_event(event.index, prev_pid, ts);
    switched_out.prev_cpu = cpu;
    switched_out.next_cpu = cpu;
    switched_out.cpu_propagates_through = true;
    switched_out.prev_state = ThreadState::RUNNING;
    switched_out.next_state = switch_out_state(prev_task_state);
    switched_out.state_propagates_through = false;
    switched_out.prev_command = Some(prev_comm);
    switched_out.next_command = Some(prev_comm);
    switched_out.prev_priority = prev_prio;
    switched_out.next_priority = prev_prio;
    set_policies(&mut switched_out, policy, policy);

    Ok(vec![switched_in, switched_out])
}

/// `sched_wakeup` / `sched_wakeup_new`: the thread becomes runnable on its
/// target CPU. Everything is droppable — wakeups redundantly fire on
/// threads that are already waiting or running.
fn load_wakeup(event: &TraceEvent, bank: &StringBank) -> Result<Vec<Transition>, CollectionError> {
    let ts = event_timestamp(event);
    let pid = Pid(event.required_number(FIELD_PID)?);
    let prio = Priority(event.required_number(FIELD_PRIO)?);
    let comm = bank.intern(event.required_text(FIELD_COMM)?);
    let target_cpu = CpuId(event.required_number(FIELD_TARGET_CPU)?);

    let mut woken = Transition::from_event(event.index, pid, ts);
    woken.prev_cpu = target_cpu;
    woken.next_cpu = target_cpu;
    woken.cpu_propagates_through = true;
    woken.prev_state = ThreadState::ANY;
    woken.next_state = ThreadState::WAITING;
    woken.state_propagates_through = false;
    woken.prev_command = Some(comm);
    woken.next_command = Some(comm);
    woken.prev_priority = prio;
    woken.next_priority = prio;
    set_policies(&mut woken, ConflictPolicy::DROP, ConflictPolicy::DROP);

    Ok(vec![woken])
}

/// `sched_migrate_task`: the thread moves between CPUs without changing
/// state.
fn load_migrate(
    event: &TraceEvent,
    bank: &StringBank,
    cpu_policy: ConflictPolicy,
) -> Result<Vec<Transition>, CollectionError> {
    let ts = event_timestamp(event);
    let pid = Pid(event.required_number(FIELD_PID)?);
    let prio = Priority(event.required_number(FIELD_PRIO)?);
    let comm = bank.intern(event.required_text(FIELD_COMM)?);
    let orig_cpu = CpuId(event.required_number(FIELD_ORIG_CPU)?);
    let dest_cpu = CpuId(event.required_number(FIELD_DEST_CPU)?);

    let mut migrated = Transition::from_event(event.index, pid, ts);
    migrated.prev_cpu = orig_cpu;
    migrated.next_cpu = dest_cpu;
    migrated.cpu_propagates_through = false;
    migrated.prev_state = ThreadState::ANY;
    migrated.next_state = ThreadState::ANY;
    migrated.state_propagates_through = true;
    migrated.prev_command = Some(comm);
    migrated.next_command = Some(comm);
    migrated.prev_priority = prio;
    migrated.next_priority = prio;
    set_policies(&mut migrated, cpu_policy, ConflictPolicy::FAIL);

    Ok(vec![migrated])
}

fn set_policies(t: &mut Transition, cpu: ConflictPolicy, state: ConflictPolicy) {
    t.cpu_forward_policy = cpu;
    t.cpu_backward_policy = cpu;
    t.state_forward_policy = state;
    t.state_backward_policy = state;
}
