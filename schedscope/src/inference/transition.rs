//! Per-thread transitions and conflict policies.
//!
//! Each decoded event becomes one or two transitions: the effect of that
//! event on one thread at one instant, asserting what the thread's CPU
//! and state were just before (`prev_*`) and just after (`next_*`). A
//! field the event does not attest is Unknown (`CpuId::UNKNOWN`, the
//! `ThreadState::ANY` superposition) and gets filled in by inference.
//!
//! When two transitions disagree — a wakeup claims CPU 1 while the last
//! switch left the thread on CPU 2 — each side carries a policy saying
//! how much repair it tolerates, and [`resolve_conflict`] combines them.

use bitflags::bitflags;

use crate::domain::types::{CpuId, Pid, Priority, ThreadState, Timestamp};
use crate::string_bank::StringId;

bitflags! {
    /// How a transition allows a conflict against it to be resolved.
    ///
    /// A four-valued lattice over two bits: no bits is Fail (the conflict
    /// aborts collection construction), `DROP` permits discarding a
    /// conflicting transition, `INSERT_SYNTHETIC` permits reconciling the
    /// two sides with an invented transition between them, and both bits
    /// permit either.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ConflictPolicy: u8 {
        const DROP = 0b01;
        const INSERT_SYNTHETIC = 0b10;
    }
}

impl ConflictPolicy {
    pub const FAIL: ConflictPolicy = ConflictPolicy::empty();
    pub const DROP_OR_INSERT_SYNTHETIC: ConflictPolicy =
        ConflictPolicy::DROP.union(ConflictPolicy::INSERT_SYNTHETIC);
}

/// The action chosen for one conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Fail,
    Drop,
    InsertSynthetic,
}

/// Combine the policies of two conflicting transitions into the strictest
/// satisfiable action.
///
/// Equal policies resolve to themselves. Fail on one side yields Drop if
/// the other side permits dropping, else Fail. Sides that share no policy
/// bit (one only drops, the other only synthesizes) fall back to Drop.
/// Otherwise the shared bits decide, and a both-bits result collapses to
/// Drop. Commutative and idempotent; the full truth table is pinned in
/// the tests below.
#[must_use]
pub fn resolve_conflict(a: ConflictPolicy, b: ConflictPolicy) -> Resolution {
    let combined = if a == b {
        a
    } else if a == ConflictPolicy::FAIL || b == ConflictPolicy::FAIL {
        if (a | b).contains(ConflictPolicy::DROP) {
            ConflictPolicy::DROP
        } else {
            ConflictPolicy::FAIL
        }
    } else if (a & b).is_empty() {
        ConflictPolicy::DROP
    } else {
        a & b
    };
    if combined == ConflictPolicy::INSERT_SYNTHETIC {
        Resolution::InsertSynthetic
    } else if combined == ConflictPolicy::FAIL {
        Resolution::Fail
    } else {
        // DROP, or both bits collapsing to Drop.
        Resolution::Drop
    }
}

/// Where a transition came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionSource {
    /// Index of the decoded event that produced it.
    Event(i64),
    /// Invented by the inferrer or the trace-boundary injection.
    Synthetic,
}

/// The effect of one event on one thread at one instant.
#[derive(Debug, Clone)]
pub struct Transition {
    pub source: TransitionSource,
    pub timestamp: Timestamp,
    pub pid: Pid,

    pub prev_command: Option<StringId>,
    pub next_command: Option<StringId>,
    pub prev_priority: Priority,
    pub next_priority: Priority,

    pub prev_cpu: CpuId,
    pub next_cpu: CpuId,
    pub prev_state: ThreadState,
    pub next_state: ThreadState,

    /// True if the event does not itself change the CPU, so a known CPU
    /// flows through it unchanged in either direction.
    pub cpu_propagates_through: bool,
    /// Same for the thread state.
    pub state_propagates_through: bool,

    pub cpu_forward_policy: ConflictPolicy,
    pub cpu_backward_policy: ConflictPolicy,
    pub state_forward_policy: ConflictPolicy,
    pub state_backward_policy: ConflictPolicy,

    /// Set when conflict resolution discarded this transition. Dropped
    /// transitions still surface in span bookkeeping.
    pub dropped: bool,
}

impl Transition {
    /// A transition attesting nothing: both sides unknown, everything
    /// propagates through. Trace-boundary injection and inference repair
    /// start from this.
    #[must_use]
    pub fn synthetic(pid: Pid, timestamp: Timestamp) -> Transition {
        Transition {
            source: TransitionSource::Synthetic,
            timestamp,
            pid,
            prev_command: None,
            next_command: None,
            prev_priority: Priority::UNKNOWN,
            next_priority: Priority::UNKNOWN,
            prev_cpu: CpuId::UNKNOWN,
            next_cpu: CpuId::UNKNOWN,
            prev_state: ThreadState::ANY,
            next_state: ThreadState::ANY,
            cpu_propagates_through: true,
            state_propagates_through: true,
            cpu_forward_policy: ConflictPolicy::INSERT_SYNTHETIC,
            cpu_backward_policy: ConflictPolicy::INSERT_SYNTHETIC,
            state_forward_policy: ConflictPolicy::INSERT_SYNTHETIC,
            state_backward_policy: ConflictPolicy::INSERT_SYNTHETIC,
            dropped: false,
        }
    }

    /// A transition produced by a decoded event, with every attestation
    /// still unknown. Loaders fill in what their event kind asserts.
    #[must_use]
    pub fn from_event(event_index: i64, pid: Pid, timestamp: Timestamp) -> Transition {
        Transition {
            source: TransitionSource::Event(event_index),
            ..Transition::synthetic(pid, timestamp)
        }
    }

    #[must_use]
    pub fn is_synthetic(&self) -> bool {
        matches!(self.source, TransitionSource::Synthetic)
    }

    #[must_use]
    pub fn event_index(&self) -> Option<i64> {
        match self.source {
            TransitionSource::Event(idx) => Some(idx),
            TransitionSource::Synthetic => None,
        }
    }
}
