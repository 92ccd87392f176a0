//! Domain model: typed identifiers, thread-state sets, and error types.

pub mod errors;
pub mod types;

pub use errors::{CollectionError, QueryError};
pub use types::{
    CpuId, Pid, Priority, SpanState, Thread, ThreadState, Timestamp, TraceDuration,
};
