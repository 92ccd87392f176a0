//! Query filters.
//!
//! A [`CollectionFilter`] is a bag of optional constraints; every field
//! left unset defaults to the collection's full extent at resolution
//! time. CPUs and PIDs the collection never observed are silently pruned
//! to the observed sets (logged at debug), matching the behavior of
//! querying a window with no data in it.

use std::collections::BTreeSet;

use crate::domain::types::{CpuId, Pid, ThreadState, Timestamp, TraceDuration};

/// Composable query options.
#[derive(Debug, Clone, Default)]
pub struct CollectionFilter {
    pub(crate) cpus: Option<BTreeSet<CpuId>>,
    pub(crate) pids: Option<BTreeSet<Pid>>,
    pub(crate) event_names: Option<BTreeSet<String>>,
    pub(crate) thread_states: Option<ThreadState>,
    pub(crate) start_timestamp: Option<Timestamp>,
    pub(crate) end_timestamp: Option<Timestamp>,
    pub(crate) truncate_to_time_range: Option<bool>,
    pub(crate) min_interval_duration: Option<TraceDuration>,
}

impl CollectionFilter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict to the given CPUs.
    #[must_use]
    pub fn with_cpus(mut self, cpus: impl IntoIterator<Item = CpuId>) -> Self {
        self.cpus = Some(cpus.into_iter().collect());
        self
    }

    /// Restrict to the given threads.
    #[must_use]
    pub fn with_pids(mut self, pids: impl IntoIterator<Item = Pid>) -> Self {
        self.pids = Some(pids.into_iter().collect());
        self
    }

    /// Restrict raw-event queries to the given tracepoint names.
    #[must_use]
    pub fn with_event_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.event_names = Some(names.into_iter().map(Into::into).collect());
        self
    }

    /// Restrict to spans whose state is in the mask.
    #[must_use]
    pub fn with_thread_states(mut self, states: ThreadState) -> Self {
        self.thread_states = Some(states);
        self
    }

    /// Restrict to the closed time range `[lo, hi]`.
    #[must_use]
    pub fn with_time_range(mut self, lo: Timestamp, hi: Timestamp) -> Self {
        self.start_timestamp = Some(lo);
        self.end_timestamp = Some(hi);
        self
    }

    #[must_use]
    pub fn with_start_timestamp(mut self, lo: Timestamp) -> Self {
        self.start_timestamp = Some(lo);
        self
    }

    #[must_use]
    pub fn with_end_timestamp(mut self, hi: Timestamp) -> Self {
        self.end_timestamp = Some(hi);
        self
    }

    /// Whether boundary intervals are clipped to the time range (the
    /// default) or extended to their natural span endpoints.
    #[must_use]
    pub fn with_truncate_to_time_range(mut self, truncate: bool) -> Self {
        self.truncate_to_time_range = Some(truncate);
        self
    }

    /// Merge adjacent output intervals shorter than this.
    #[must_use]
    pub fn with_min_interval_duration(mut self, min: TraceDuration) -> Self {
        self.min_interval_duration = Some(min);
        self
    }
}

/// A filter resolved against one collection: every field concrete, CPU
/// and PID lists pruned to the observed sets.
#[derive(Debug, Clone)]
pub(crate) struct ResolvedFilter {
    pub cpus: Vec<CpuId>,
    pub pids: Vec<Pid>,
    pub event_names: Option<BTreeSet<String>>,
    pub thread_states: ThreadState,
    pub lo: Timestamp,
    pub hi: Timestamp,
    pub truncate: bool,
    pub min_interval_duration: TraceDuration,
}

impl ResolvedFilter {
    /// Resolve `filter` against the observed CPU/PID sets and extent.
    pub(crate) fn new(
        filter: &CollectionFilter,
        observed_cpus: &BTreeSet<CpuId>,
        observed_pids: &BTreeSet<Pid>,
        extent: (Timestamp, Timestamp),
    ) -> ResolvedFilter {
        let cpus = match &filter.cpus {
            Some(requested) => {
                let pruned: Vec<CpuId> =
                    requested.iter().filter(|cpu| !observed_cpus.contains(cpu)).copied().collect();
                if !pruned.is_empty() {
                    log::debug!("pruning unobserved cpus from filter: {pruned:?}");
                }
                requested.intersection(observed_cpus).copied().collect()
            }
            None => observed_cpus.iter().copied().collect(),
        };
        let pids = match &filter.pids {
            Some(requested) => {
                let pruned: Vec<Pid> =
                    requested.iter().filter(|pid| !observed_pids.contains(pid)).copied().collect();
                if !pruned.is_empty() {
                    log::debug!("pruning unobserved pids from filter: {pruned:?}");
                }
                requested.intersection(observed_pids).copied().collect()
            }
            None => observed_pids.iter().copied().collect(),
        };

        ResolvedFilter {
            cpus,
            pids,
            event_names: filter.event_names.clone(),
            thread_states: filter
                .thread_states
                .unwrap_or(ThreadState::ANY | ThreadState::UNKNOWN),
            lo: filter.start_timestamp.unwrap_or(extent.0),
            hi: filter.end_timestamp.unwrap_or(extent.1),
            truncate: filter.truncate_to_time_range.unwrap_or(true),
            min_interval_duration: filter.min_interval_duration.unwrap_or(TraceDuration::ZERO),
        }
    }

    /// True if spans in `state` pass the state mask.
    pub(crate) fn admits_state(&self, state: crate::domain::types::SpanState) -> bool {
        self.thread_states.intersects(state.as_set())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::SpanState;

    fn observed() -> (BTreeSet<CpuId>, BTreeSet<Pid>) {
        (
            [CpuId(0), CpuId(1)].into_iter().collect(),
            [Pid(100), Pid(200)].into_iter().collect(),
        )
    }

    #[test]
    fn test_defaults_cover_the_collection() {
        let (cpus, pids) = observed();
        let resolved = ResolvedFilter::new(
            &CollectionFilter::new(),
            &cpus,
            &pids,
            (Timestamp(0), Timestamp(100)),
        );
        assert_eq!(resolved.cpus, vec![CpuId(0), CpuId(1)]);
        assert_eq!(resolved.pids, vec![Pid(100), Pid(200)]);
        assert_eq!((resolved.lo, resolved.hi), (Timestamp(0), Timestamp(100)));
        assert!(resolved.truncate);
        assert_eq!(resolved.min_interval_duration, TraceDuration::ZERO);
        assert!(resolved.admits_state(SpanState::Unknown));
    }

    #[test]
    fn test_unknown_ids_are_pruned() {
        let (cpus, pids) = observed();
        let filter = CollectionFilter::new()
            .with_cpus([CpuId(1), CpuId(7)])
            .with_pids([Pid(200), Pid(999)]);
        let resolved = ResolvedFilter::new(&filter, &cpus, &pids, (Timestamp(0), Timestamp(100)));
        assert_eq!(resolved.cpus, vec![CpuId(1)]);
        assert_eq!(resolved.pids, vec![Pid(200)]);
    }

    #[test]
    fn test_state_mask() {
        let (cpus, pids) = observed();
        let filter = CollectionFilter::new().with_thread_states(ThreadState::RUNNING);
        let resolved = ResolvedFilter::new(&filter, &cpus, &pids, (Timestamp(0), Timestamp(100)));
        assert!(resolved.admits_state(SpanState::Running));
        assert!(!resolved.admits_state(SpanState::Waiting));
        assert!(!resolved.admits_state(SpanState::Unknown));
    }

    #[test]
    fn test_time_range_overrides() {
        let (cpus, pids) = observed();
        let filter = CollectionFilter::new()
            .with_time_range(Timestamp(10), Timestamp(50))
            .with_truncate_to_time_range(false)
            .with_min_interval_duration(TraceDuration(5));
        let resolved = ResolvedFilter::new(&filter, &cpus, &pids, (Timestamp(0), Timestamp(100)));
        assert_eq!((resolved.lo, resolved.hi), (Timestamp(10), Timestamp(50)));
        assert!(!resolved.truncate);
        assert_eq!(resolved.min_interval_duration, TraceDuration(5));
    }
}
