//! Decoded tracepoint events shared between trace parsers and the
//! schedscope analysis core.
//!
//! The upstream ring-buffer parser decodes each raw tracepoint record
//! against its format descriptor and hands the core a stream of
//! [`TraceEvent`]s: the event name, the reporting CPU, a timestamp, and
//! the decoded numeric/text payload fields keyed by their format-file
//! names.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Event names the scheduler inference core recognizes.
pub const SCHED_SWITCH: &str = "sched_switch";
pub const SCHED_WAKEUP: &str = "sched_wakeup";
pub const SCHED_WAKEUP_NEW: &str = "sched_wakeup_new";
pub const SCHED_MIGRATE_TASK: &str = "sched_migrate_task";

/// Payload field names, as they appear in tracepoint format files.
///
/// `sched_switch` carries `prev_comm`/`prev_pid`/`prev_prio`/`prev_state`
/// and `next_comm`/`next_pid`/`next_prio`; wakeups and migrations carry
/// `comm`/`pid`/`prio` plus their target CPU fields.
pub const FIELD_PREV_COMM: &str = "prev_comm";
pub const FIELD_PREV_PID: &str = "prev_pid";
pub const FIELD_PREV_PRIO: &str = "prev_prio";
pub const FIELD_PREV_STATE: &str = "prev_state";
pub const FIELD_NEXT_COMM: &str = "next_comm";
pub const FIELD_NEXT_PID: &str = "next_pid";
pub const FIELD_NEXT_PRIO: &str = "next_prio";
pub const FIELD_COMM: &str = "comm";
pub const FIELD_PID: &str = "pid";
pub const FIELD_PRIO: &str = "prio";
pub const FIELD_TARGET_CPU: &str = "target_cpu";
pub const FIELD_ORIG_CPU: &str = "orig_cpu";
pub const FIELD_DEST_CPU: &str = "dest_cpu";

/// A required payload field was absent from a decoded event.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("event '{event}' (index {index}) is missing required field '{field}'")]
pub struct MissingFieldError {
    pub event: String,
    pub index: i64,
    pub field: String,
}

/// One decoded tracepoint event.
///
/// `number_fields` and `text_fields` hold the payload decoded against the
/// event's format descriptor. Ordered maps keep serialized streams stable
/// across runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceEvent {
    /// Position of the event in the recorded stream.
    pub index: i64,

    /// Tracepoint name, e.g. `sched_switch`.
    pub name: String,

    /// CPU whose ring buffer reported the event.
    pub cpu: i64,

    /// Event timestamp in nanoseconds.
    pub timestamp: u64,

    /// True if the ring buffer overran and this event is incomplete.
    /// Clipped events carry no trustworthy payload.
    pub clipped: bool,

    /// Decoded numeric payload fields, keyed by format-file field name.
    pub number_fields: BTreeMap<String, i64>,

    /// Decoded text payload fields, keyed by format-file field name.
    pub text_fields: BTreeMap<String, String>,
}

impl TraceEvent {
    /// Create an empty (payload-less) event.
    #[must_use]
    pub fn new(index: i64, name: impl Into<String>, cpu: i64, timestamp: u64) -> Self {
        Self {
            index,
            name: name.into(),
            cpu,
            timestamp,
            clipped: false,
            number_fields: BTreeMap::new(),
            text_fields: BTreeMap::new(),
        }
    }

    /// Set a numeric payload field.
    #[must_use]
    pub fn with_number(mut self, field: impl Into<String>, value: i64) -> Self {
        self.number_fields.insert(field.into(), value);
        self
    }

    /// Set a text payload field.
    #[must_use]
    pub fn with_text(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.text_fields.insert(field.into(), value.into());
        self
    }

    /// Mark the event clipped.
    #[must_use]
    pub fn clipped(mut self) -> Self {
        self.clipped = true;
        self
    }

    /// Look up an optional numeric field.
    #[must_use]
    pub fn number_field(&self, field: &str) -> Option<i64> {
        self.number_fields.get(field).copied()
    }

    /// Look up an optional text field.
    #[must_use]
    pub fn text_field(&self, field: &str) -> Option<&str> {
        self.text_fields.get(field).map(String::as_str)
    }

    /// Look up a numeric field the event's format requires.
    ///
    /// # Errors
    ///
    /// Returns [`MissingFieldError`] if the field is absent.
    pub fn required_number(&self, field: &str) -> Result<i64, MissingFieldError> {
        self.number_field(field).ok_or_else(|| self.missing(field))
    }

    /// Look up a text field the event's format requires.
    ///
    /// # Errors
    ///
    /// Returns [`MissingFieldError`] if the field is absent.
    pub fn required_text(&self, field: &str) -> Result<&str, MissingFieldError> {
        self.text_field(field).ok_or_else(|| self.missing(field))
    }

    fn missing(&self, field: &str) -> MissingFieldError {
        MissingFieldError {
            event: self.name.clone(),
            index: self.index,
            field: field.to_string(),
        }
    }
}
