//! Analytic queries over a built collection.
//!
//! Every query takes a [`CollectionFilter`](filter::CollectionFilter);
//! fields left unset default to the collection's full extent. All queries
//! are read-only and safe to run concurrently.

pub mod antagonists;
pub mod cpu_intervals;
pub mod filter;
pub mod thread_intervals;
pub mod thread_stats;
pub mod utilization;

use std::collections::BTreeMap;

use schedscope_common::TraceEvent;

use crate::collection::Collection;
use crate::domain::types::{CpuId, Pid, Timestamp};
use crate::domain::QueryError;
use filter::ResolvedFilter;

pub use antagonists::Antagonism;
pub use cpu_intervals::CpuInterval;
pub use filter::CollectionFilter;
pub use thread_intervals::{ThreadInterval, ThreadResidency};
pub use thread_stats::{ThreadStatistics, ThreadSummary};
pub use utilization::UtilizationMetrics;

/// Each filtered-in thread mapped to the distinct command names it was
/// observed under within the window, sorted.
pub(crate) fn pids_and_comms(
    collection: &Collection,
    resolved: &ResolvedFilter,
) -> Result<BTreeMap<Pid, Vec<String>>, QueryError> {
    let mut out = BTreeMap::new();
    for &pid in &resolved.pids {
        let mut commands = std::collections::BTreeSet::new();
        for span in collection.thread_spans(pid) {
            if !span.overlaps(resolved.lo, resolved.hi) {
                continue;
            }
            if let Some(id) = span.command {
                commands.insert(collection.string_bank().resolve(id)?.to_string());
            }
        }
        out.insert(pid, commands.into_iter().collect());
    }
    Ok(out)
}

/// The retained decoded events, filtered by CPU, time, and event name.
pub(crate) fn raw_events(collection: &Collection, resolved: &ResolvedFilter) -> Vec<TraceEvent> {
    collection
        .events()
        .iter()
        .filter(|event| {
            let ts = event_timestamp(event);
            resolved.cpus.binary_search(&CpuId(event.cpu)).is_ok()
                && ts >= resolved.lo
                && ts <= resolved.hi
                && resolved.event_names.as_ref().is_none_or(|names| names.contains(&event.name))
        })
        .cloned()
        .collect()
}

#[allow(clippy::cast_possible_wrap)]
fn event_timestamp(event: &TraceEvent) -> Timestamp {
    Timestamp(event.timestamp as i64)
}
