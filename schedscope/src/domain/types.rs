//! Domain types for scheduler trace analysis.
//!
//! Newtype wrappers keep PIDs, CPUs, priorities and timestamps from being
//! mixed up in signatures. All identifier types reserve -1 as their
//! Unknown value: raw events only partially attest thread state, so
//! unknown fields flow through inference until a later or earlier event
//! pins them down.

use std::fmt;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

/// Process/thread ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Pid(pub i64);

impl Pid {
    pub const UNKNOWN: Pid = Pid(-1);

    /// PID 0 is the per-CPU idle thread (`swapper`). It appears to run on
    /// every idle CPU at once and is excluded from per-thread inference.
    pub const SWAPPER: Pid = Pid(0);

    #[must_use]
    pub fn is_known(self) -> bool {
        self != Self::UNKNOWN
    }
}

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_known() {
            write!(f, "PID:{}", self.0)
        } else {
            write!(f, "PID:?")
        }
    }
}

/// CPU core ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CpuId(pub i64);

impl CpuId {
    pub const UNKNOWN: CpuId = CpuId(-1);

    #[must_use]
    pub fn is_known(self) -> bool {
        self != Self::UNKNOWN
    }
}

impl fmt::Display for CpuId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_known() {
            write!(f, "CPU:{}", self.0)
        } else {
            write!(f, "CPU:?")
        }
    }
}

/// Kernel scheduling priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Priority(pub i64);

impl Priority {
    pub const UNKNOWN: Priority = Priority(-1);

    #[must_use]
    pub fn is_known(self) -> bool {
        self != Self::UNKNOWN
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_known() {
            write!(f, "prio:{}", self.0)
        } else {
            write!(f, "prio:?")
        }
    }
}

/// Timestamp in nanoseconds.
///
/// Signed so the reserved Unknown value and normalized offsets behave;
/// real trace timestamps always fit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(pub i64);

impl Timestamp {
    pub const UNKNOWN: Timestamp = Timestamp(-1);

    #[must_use]
    pub fn is_known(self) -> bool {
        self != Self::UNKNOWN
    }

    /// Difference between two known timestamps.
    #[must_use]
    pub fn duration_since(self, earlier: Timestamp) -> TraceDuration {
        if self.is_known() && earlier.is_known() {
            TraceDuration(self.0 - earlier.0)
        } else {
            TraceDuration::UNKNOWN
        }
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_known() {
            write!(f, "{}ns", self.0)
        } else {
            write!(f, "?ns")
        }
    }
}

/// A signed nanosecond delta. Unknown absorbs in additions: aggregating
/// any unknown residency poisons the total rather than undercounting it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TraceDuration(pub i64);

impl TraceDuration {
    pub const UNKNOWN: TraceDuration = TraceDuration(i64::MIN);
    pub const ZERO: TraceDuration = TraceDuration(0);

    #[must_use]
    pub fn is_known(self) -> bool {
        self != Self::UNKNOWN
    }
}

impl std::ops::Add for TraceDuration {
    type Output = TraceDuration;

    fn add(self, rhs: TraceDuration) -> TraceDuration {
        if self.is_known() && rhs.is_known() {
            TraceDuration(self.0 + rhs.0)
        } else {
            TraceDuration::UNKNOWN
        }
    }
}

impl std::ops::AddAssign for TraceDuration {
    fn add_assign(&mut self, rhs: TraceDuration) {
        *self = *self + rhs;
    }
}

impl fmt::Display for TraceDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_known() {
            write!(f, "{}ns", self.0)
        } else {
            write!(f, "?ns")
        }
    }
}

bitflags! {
    /// A set of possible thread scheduling states.
    ///
    /// Events attest state only partially, so transitions carry sets: a
    /// wakeup knows its thread ends up Waiting but not what it was doing
    /// before, which is the full `ANY` superposition. Merging two
    /// attestations is set intersection; an empty intersection is a
    /// conflict for the inferrer to resolve.
    ///
    /// The `UNKNOWN` flag never appears in transitions (unknown is spelled
    /// `ANY` there); it exists so filters can select spans whose state
    /// inference could not pin down.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ThreadState: u8 {
        const RUNNING = 0b0001;
        const WAITING = 0b0010;
        const SLEEPING = 0b0100;
        const UNKNOWN = 0b1000;
    }
}

impl ThreadState {
    /// The full superposition: the thread is in some real state, we do not
    /// know which.
    pub const ANY: ThreadState = ThreadState::RUNNING
        .union(ThreadState::WAITING)
        .union(ThreadState::SLEEPING);

    /// True if the set holds exactly one concrete state.
    #[must_use]
    pub fn is_single(self) -> bool {
        self.bits().count_ones() == 1
    }

    /// Collapse a set to the span-level state: a singleton maps to itself,
    /// anything else (superposition or empty) to Unknown.
    #[must_use]
    pub fn to_span_state(self) -> SpanState {
        match self {
            ThreadState::RUNNING => SpanState::Running,
            ThreadState::WAITING => SpanState::Waiting,
            ThreadState::SLEEPING => SpanState::Sleeping,
            _ => SpanState::Unknown,
        }
    }
}

impl fmt::Display for ThreadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == ThreadState::ANY {
            return write!(f, "any");
        }
        let mut first = true;
        for (name, flag) in [
            ("running", ThreadState::RUNNING),
            ("waiting", ThreadState::WAITING),
            ("sleeping", ThreadState::SLEEPING),
            ("unknown", ThreadState::UNKNOWN),
        ] {
            if self.contains(flag) {
                if !first {
                    write!(f, "|")?;
                }
                write!(f, "{name}")?;
                first = false;
            }
        }
        if first {
            write!(f, "none")?;
        }
        Ok(())
    }
}

/// The single concrete state a span holds over its interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SpanState {
    Running,
    Sleeping,
    Unknown,
    Waiting,
}

impl SpanState {
    /// The state-set equivalent, for filter masks.
    #[must_use]
    pub fn as_set(self) -> ThreadState {
        match self {
            SpanState::Running => ThreadState::RUNNING,
            SpanState::Waiting => ThreadState::WAITING,
            SpanState::Sleeping => ThreadState::SLEEPING,
            SpanState::Unknown => ThreadState::UNKNOWN,
        }
    }
}

impl fmt::Display for SpanState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SpanState::Running => "running",
            SpanState::Waiting => "waiting",
            SpanState::Sleeping => "sleeping",
            SpanState::Unknown => "unknown",
        };
        write!(f, "{name}")
    }
}

/// A thread as surfaced by queries: identity plus the command and
/// priority it held over the interval in question.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Thread {
    pub pid: Pid,
    pub command: String,
    pub priority: Priority,
}

impl fmt::Display for Thread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}, {})", self.pid, self.command, self.priority)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_identifiers() {
        assert!(!Pid::UNKNOWN.is_known());
        assert!(Pid(42).is_known());
        assert!(Pid::SWAPPER.is_known());
        assert!(!CpuId::UNKNOWN.is_known());
        assert!(!Priority::UNKNOWN.is_known());
        assert_eq!(Pid(7).to_string(), "PID:7");
        assert_eq!(CpuId::UNKNOWN.to_string(), "CPU:?");
    }

    #[test]
    fn test_duration_unknown_absorbs() {
        let d = TraceDuration(10) + TraceDuration::UNKNOWN;
        assert!(!d.is_known());
        let d = TraceDuration::UNKNOWN + TraceDuration(10);
        assert!(!d.is_known());
        assert_eq!(TraceDuration(10) + TraceDuration(5), TraceDuration(15));
    }

    #[test]
    fn test_duration_since() {
        assert_eq!(Timestamp(110).duration_since(Timestamp(100)), TraceDuration(10));
        assert!(!Timestamp(110).duration_since(Timestamp::UNKNOWN).is_known());
    }

    #[test]
    fn test_state_intersection_merge() {
        let merged = ThreadState::ANY & ThreadState::WAITING;
        assert_eq!(merged, ThreadState::WAITING);
        let conflict = ThreadState::RUNNING & ThreadState::SLEEPING;
        assert!(conflict.is_empty());
    }

    #[test]
    fn test_state_singleton() {
        assert!(ThreadState::RUNNING.is_single());
        assert!(!ThreadState::ANY.is_single());
        assert!(!(ThreadState::WAITING | ThreadState::SLEEPING).is_single());
    }

    #[test]
    fn test_span_state_collapse() {
        assert_eq!(ThreadState::RUNNING.to_span_state(), SpanState::Running);
        assert_eq!(ThreadState::ANY.to_span_state(), SpanState::Unknown);
        assert_eq!(
            (ThreadState::WAITING | ThreadState::SLEEPING).to_span_state(),
            SpanState::Unknown
        );
    }

    #[test]
    fn test_state_display() {
        assert_eq!(ThreadState::ANY.to_string(), "any");
        assert_eq!((ThreadState::WAITING | ThreadState::SLEEPING).to_string(), "waiting|sleeping");
        assert_eq!(SpanState::Running.to_string(), "running");
    }
}
