//! Structured error types for collection construction and queries.
//!
//! Construction errors abort collection building; query errors return
//! without touching the collection.

use schedscope_common::MissingFieldError;
use thiserror::Error;

use super::types::{Pid, Timestamp};

/// Errors raised while building a collection from an event stream.
#[derive(Error, Debug)]
pub enum CollectionError {
    /// Event payload lacked a field its format requires.
    #[error(transparent)]
    MissingField(#[from] MissingFieldError),

    /// An event name has no registered loader.
    #[error("no loader for event '{0}'")]
    UnknownEventFormat(String),

    /// Transition timestamps for one thread went backwards.
    #[error("out-of-order timestamp for {pid}: {timestamp} after {previous}")]
    OutOfOrderTimestamp {
        pid: Pid,
        timestamp: Timestamp,
        previous: Timestamp,
    },

    /// A transition reached the inferrer without a timestamp.
    #[error("transition for {0} has no timestamp")]
    MissingTimestamp(Pid),

    /// A transition was routed to the wrong thread's inferrer.
    #[error("transition for {actual} fed to inferrer for {expected}")]
    PidMismatch { expected: Pid, actual: Pid },

    /// A transition state carried the Unknown bit; unknown state must be
    /// expressed as the full superposition instead.
    #[error("transition state for {0} contains the unknown bit")]
    UnknownStateBit(Pid),

    /// Conflicting attestations whose combined policy is Fail.
    #[error("unresolvable {kind} conflict for {pid} between t={earlier} and t={later}")]
    Unresolvable {
        pid: Pid,
        kind: &'static str,
        earlier: Timestamp,
        later: Timestamp,
    },

    /// An invariant the pipeline guarantees was violated.
    #[error("internal: {0}")]
    Internal(String),
}

/// Errors raised by queries over a built collection.
#[derive(Error, Debug)]
pub enum QueryError {
    /// The filter or arguments do not satisfy the query's contract.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A string-bank lookup was out of range; spans only ever hold ids the
    /// bank issued, so this indicates an internal bug.
    #[error("string bank has no entry {0}")]
    NotFound(usize),

    /// An invariant the collection guarantees was violated.
    #[error("internal: {0}")]
    Internal(String),
}

impl QueryError {
    pub(crate) fn one_pid() -> QueryError {
        QueryError::InvalidArgument("filter must name exactly one PID".to_string())
    }

    pub(crate) fn one_cpu() -> QueryError {
        QueryError::InvalidArgument("filter must name exactly one CPU".to_string())
    }
}

/// Errors raised while exporting a collection.
#[derive(Error, Debug)]
pub enum ExportError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Query(#[from] QueryError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_out_of_order_display() {
        let err = CollectionError::OutOfOrderTimestamp {
            pid: Pid(100),
            timestamp: Timestamp(90),
            previous: Timestamp(100),
        };
        assert_eq!(err.to_string(), "out-of-order timestamp for PID:100: 90ns after 100ns");
    }

    #[test]
    fn test_missing_field_converts() {
        let err = MissingFieldError {
            event: "sched_wakeup".to_string(),
            index: 4,
            field: "target_cpu".to_string(),
        };
        let err: CollectionError = err.into();
        assert!(err.to_string().contains("target_cpu"));
    }

    #[test]
    fn test_conflict_display_names_dimension() {
        let err = CollectionError::Unresolvable {
            pid: Pid(100),
            kind: "cpu",
            earlier: Timestamp(1000),
            later: Timestamp(1010),
        };
        assert!(err.to_string().contains("cpu conflict"));
        assert!(err.to_string().contains("PID:100"));
    }

    #[test]
    fn test_query_error_display() {
        assert!(QueryError::one_pid().to_string().contains("exactly one PID"));
        assert!(QueryError::NotFound(9).to_string().contains("no entry 9"));
    }
}
