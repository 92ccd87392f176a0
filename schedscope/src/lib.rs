//! schedscope: a queryable in-memory model of kernel scheduler behavior.
//!
//! Feed [`Collection::new`] a timestamp-sorted stream of decoded
//! scheduler tracepoint events (`sched_switch`, `sched_wakeup`,
//! `sched_wakeup_new`, `sched_migrate_task`) and it reconstructs, for
//! every thread observed, a contiguous sequence of Running / Waiting /
//! Sleeping spans — resolving the partial and sometimes contradictory
//! attestations each event makes. The built collection is immutable and
//! answers analytic queries concurrently: per-thread and per-CPU
//! intervals, antagonists, utilization, and thread statistics.
//!
//! # Example
//!
//! ```
//! use schedscope::{Collection, CollectionOptions, Pid, SpanState};
//! use schedscope_common::{TraceEvent, SCHED_SWITCH};
//!
//! let handoff = TraceEvent::new(0, SCHED_SWITCH, 0, 1_000)
//!     .with_number("prev_pid", 42)
//!     .with_number("prev_prio", 120)
//!     .with_number("prev_state", 0)
//!     .with_number("next_pid", 43)
//!     .with_number("next_prio", 120)
//!     .with_text("prev_comm", "editor")
//!     .with_text("next_comm", "compiler");
//!
//! let collection = Collection::new(vec![handoff], CollectionOptions::default())?;
//! let spans = collection.thread_spans(Pid(43));
//! assert_eq!(spans.len(), 1);
//! assert_eq!(spans[0].state, SpanState::Running);
//! # Ok::<(), schedscope::CollectionError>(())
//! ```

pub mod collection;
pub mod domain;
pub mod export;
pub mod index;
pub mod inference;
pub mod intervals;
pub mod queries;
pub mod spans;
pub mod string_bank;

pub use collection::{Collection, CollectionOptions, ElementaryIntervalMode};
pub use domain::types::{
    CpuId, Pid, Priority, SpanState, Thread, ThreadState, Timestamp, TraceDuration,
};
pub use domain::{CollectionError, QueryError};
pub use inference::LoaderSet;
pub use queries::{
    Antagonism, CollectionFilter, CpuInterval, ThreadInterval, ThreadResidency, ThreadStatistics,
    ThreadSummary, UtilizationMetrics,
};
pub use spans::{Span, SpanId};
