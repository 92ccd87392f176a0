//! Collection assembly and query entry points.
//!
//! `Collection::new` drives the pipeline once, single-threaded: decoded
//! events → loaders → per-thread inference → span generation → span
//! arena → per-CPU index. The result is immutable; every query method
//! takes `&self` and may run concurrently.

use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use schedscope_common::TraceEvent;

use crate::domain::types::{CpuId, Pid, SpanState, Thread, Timestamp};
use crate::domain::{CollectionError, QueryError};
use crate::index::CpuIndex;
use crate::inference::{
    LoaderSet, SplitOptions, ThreadInferrer, ThreadSpanBuilder, Transition,
};
use crate::intervals::{
    CpuTimeline, ElementaryCpuInterval, ElementaryIntervalBuilder, ElementaryIntervalMerger,
};
use crate::queries::filter::{CollectionFilter, ResolvedFilter};
use crate::queries::{
    antagonists, cpu_intervals, pids_and_comms, raw_events, thread_intervals, thread_stats,
    utilization,
};
use crate::spans::{Span, SpanArena};
use crate::string_bank::StringBank;

/// Construction-time options.
#[derive(Debug, Clone, Copy)]
pub struct CollectionOptions {
    /// Subtract the first unclipped event's timestamp from every event.
    pub normalize_timestamps: bool,
    /// Split spans on command-name change.
    pub precise_commands: bool,
    /// Split spans on priority change.
    pub precise_priorities: bool,
    /// Which loader set interprets the event stream.
    pub loaders: LoaderSet,
    /// Fail construction on an unrecognized event name instead of
    /// logging and skipping it.
    pub fail_on_unknown_event_format: bool,
}

impl Default for CollectionOptions {
    fn default() -> Self {
        Self {
            normalize_timestamps: true,
            precise_commands: false,
            precise_priorities: false,
            loaders: LoaderSet::Default,
            fail_on_unknown_event_format: true,
        }
    }
}

/// Output mode for elementary-interval queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementaryIntervalMode {
    /// Per-change Add/Remove records only.
    Diff,
    /// Complete per-CPU state per interval.
    Full,
}

/// An immutable, queryable model of one scheduling trace.
#[derive(Debug)]
pub struct Collection {
    options: CollectionOptions,
    /// Retained decoded events, normalized, clipped events removed.
    events: Vec<TraceEvent>,
    bank: StringBank,
    arena: SpanArena,
    cpu_index: CpuIndex,
    observed_cpus: BTreeSet<CpuId>,
    observed_pids: BTreeSet<Pid>,
    start: Timestamp,
    end: Timestamp,
}

/// Per-thread inference state during construction.
struct Pipeline {
    inferrer: ThreadInferrer,
    builder: ThreadSpanBuilder,
    inferred: Vec<Transition>,
}

impl Pipeline {
    fn feed(&mut self, transition: Transition) -> Result<(), CollectionError> {
        self.inferrer.add(transition, &mut self.inferred)?;
        for t in self.inferred.drain(..) {
            self.builder.process(&t)?;
        }
        Ok(())
    }
}

impl Collection {
    /// Build a collection from a timestamp-sorted decoded event stream.
    ///
    /// # Errors
    ///
    /// Data-integrity violations, unresolvable attestation conflicts,
    /// unknown event formats (unless demoted to warnings), and internal
    /// invariant failures all abort construction.
    pub fn new(
        events: Vec<TraceEvent>,
        options: CollectionOptions,
    ) -> Result<Collection, CollectionError> {
        let mut kept = Vec::with_capacity(events.len());
        let mut last_ts: Option<u64> = None;
        for event in events {
            if event.clipped {
                continue;
            }
            if let Some(last) = last_ts {
                if event.timestamp < last {
                    #[allow(clippy::cast_possible_wrap)]
                    let previous = Timestamp(last as i64);
                    return Err(CollectionError::OutOfOrderTimestamp {
                        pid: Pid::UNKNOWN,
                        timestamp: timestamp_of(&event),
                        previous,
                    });
                }
            }
            last_ts = Some(event.timestamp);
            kept.push(event);
        }

        if options.normalize_timestamps {
            let offset = kept.first().map_or(0, |e| e.timestamp);
            for event in &mut kept {
                event.timestamp -= offset;
            }
        }

        let start = kept.first().map_or(Timestamp(0), timestamp_of);
        let end = kept.last().map_or(Timestamp(0), timestamp_of);

        let bank = StringBank::new();
        let split = SplitOptions {
            precise_commands: options.precise_commands,
            precise_priorities: options.precise_priorities,
        };

        let mut pipelines: HashMap<Pid, Pipeline> = HashMap::new();
        let mut observed_cpus: BTreeSet<CpuId> = BTreeSet::new();
        for event in &kept {
            observed_cpus.insert(CpuId(event.cpu));
            let transitions = match options.loaders.load(event, &bank) {
                Ok(transitions) => transitions,
                Err(CollectionError::UnknownEventFormat(name))
                    if !options.fail_on_unknown_event_format =>
                {
                    log::warn!("skipping event {} with unknown format '{name}'", event.index);
                    continue;
                }
                Err(err) => return Err(err),
            };
            for transition in transitions {
                let pid = transition.pid;
                // The idle thread runs on every idle CPU at once; modeling
                // it per-thread would conflict constantly.
                if pid == Pid::SWAPPER || !pid.is_known() {
                    continue;
                }
                let pipeline = match pipelines.entry(pid) {
                    Entry::Occupied(entry) => entry.into_mut(),
                    Entry::Vacant(entry) => {
                        let mut pipeline = Pipeline {
                            inferrer: ThreadInferrer::new(pid),
                            builder: ThreadSpanBuilder::new(pid, split),
                            inferred: Vec::new(),
                        };
                        // Trace-start boundary: every thread's timeline
                        // begins at the collection start, attested or not.
                        pipeline.feed(Transition::synthetic(pid, start))?;
                        entry.insert(pipeline)
                    }
                };
                pipeline.feed(transition)?;
            }
        }

        // Trace-end boundary: one past the last event, marking states
        // still holding when recording stopped.
        let end_boundary = Timestamp(end.0 + 1);
        let mut spans: Vec<Span> = Vec::new();
        for (pid, mut pipeline) in pipelines {
            pipeline.feed(Transition::synthetic(pid, end_boundary))?;
            let Pipeline { inferrer, mut builder, mut inferred } = pipeline;
            inferrer.finish(&mut inferred)?;
            for t in inferred.drain(..) {
                builder.process(&t)?;
            }
            spans.extend(builder.finish(end_boundary));
        }

        let arena = SpanArena::assemble(spans)?;
        let cpu_index = CpuIndex::build(&arena)?;
        let observed_pids: BTreeSet<Pid> = arena.pids().collect();
        observed_cpus.extend(arena.all().iter().map(|s| s.cpu));

        log::debug!(
            "collection built: {} events, {} threads, {} spans",
            kept.len(),
            observed_pids.len(),
            arena.len()
        );

        Ok(Collection {
            options,
            events: kept,
            bank,
            arena,
            cpu_index,
            observed_cpus,
            observed_pids,
            start,
            end,
        })
    }

    /// First event timestamp (0 when normalized).
    #[must_use]
    pub fn start_timestamp(&self) -> Timestamp {
        self.start
    }

    /// Last event timestamp.
    #[must_use]
    pub fn end_timestamp(&self) -> Timestamp {
        self.end
    }

    /// The options the collection was built with.
    #[must_use]
    pub fn options(&self) -> &CollectionOptions {
        &self.options
    }

    /// Threads observed, ascending.
    #[must_use]
    pub fn pids(&self) -> Vec<Pid> {
        self.observed_pids.iter().copied().collect()
    }

    /// CPUs observed, ascending.
    #[must_use]
    pub fn cpus(&self) -> Vec<CpuId> {
        self.observed_cpus.iter().copied().collect()
    }

    /// One thread's spans, contiguous from the collection start to one
    /// past its end.
    #[must_use]
    pub fn thread_spans(&self, pid: Pid) -> &[Span] {
        self.arena.for_pid(pid)
    }

    #[must_use]
    pub(crate) fn span_arena(&self) -> &SpanArena {
        &self.arena
    }

    #[must_use]
    pub(crate) fn cpu_index(&self) -> &CpuIndex {
        &self.cpu_index
    }

    #[must_use]
    pub(crate) fn string_bank(&self) -> &StringBank {
        &self.bank
    }

    #[must_use]
    pub(crate) fn events(&self) -> &[TraceEvent] {
        &self.events
    }

    pub(crate) fn resolve(&self, filter: &CollectionFilter) -> ResolvedFilter {
        ResolvedFilter::new(filter, &self.observed_cpus, &self.observed_pids, (self.start, self.end))
    }

    /// Spans of one state resident on one CPU within the filter window.
    #[must_use]
    pub fn cpu_spans(&self, cpu: CpuId, state: SpanState, filter: &CollectionFilter) -> Vec<&Span> {
        let resolved = self.resolve(filter);
        self.cpu_index.spans_overlapping(&self.arena, cpu, state, resolved.lo, resolved.hi)
    }

    /// Maximal intervals over which every selected CPU's running thread
    /// and waiting set are constant.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for an untruncated query over several CPUs.
    pub fn elementary_intervals(
        &self,
        filter: &CollectionFilter,
        mode: ElementaryIntervalMode,
    ) -> Result<Vec<ElementaryCpuInterval>, QueryError> {
        let resolved = self.resolve(filter);
        match mode {
            ElementaryIntervalMode::Diff => self.diff_elementary_intervals(&resolved),
            ElementaryIntervalMode::Full => self.full_elementary_intervals(&resolved),
        }
    }

    pub(crate) fn diff_elementary_intervals(
        &self,
        resolved: &ResolvedFilter,
    ) -> Result<Vec<ElementaryCpuInterval>, QueryError> {
        if !resolved.truncate && resolved.cpus.len() > 1 {
            return Err(QueryError::InvalidArgument(
                "untruncated intervals are only defined over a single CPU".to_string(),
            ));
        }
        let bounds =
            if resolved.truncate { (resolved.lo, resolved.hi) } else { (self.start, self.end) };

        let timelines: Vec<CpuTimeline<'_>> = resolved
            .cpus
            .iter()
            .map(|&cpu| {
                let mut spans: Vec<&Span> = Vec::new();
                for state in [SpanState::Running, SpanState::Waiting] {
                    if resolved.admits_state(state) {
                        spans.extend(self.cpu_index.spans_overlapping(
                            &self.arena,
                            cpu,
                            state,
                            resolved.lo,
                            resolved.hi,
                        ));
                    }
                }
                CpuTimeline { cpu, spans }
            })
            .collect();

        ElementaryIntervalBuilder::new(timelines, bounds, resolved.truncate)
            .build_diff(&self.bank)
    }

    pub(crate) fn full_elementary_intervals(
        &self,
        resolved: &ResolvedFilter,
    ) -> Result<Vec<ElementaryCpuInterval>, QueryError> {
        let diff = self.diff_elementary_intervals(resolved)?;
        let mut merger = ElementaryIntervalMerger::new(resolved.cpus.clone());
        Ok(diff.iter().map(|interval| merger.merge(interval)).collect())
    }

    /// Intervals of the filter's single thread, merged per the filter.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` unless the filter names exactly one PID.
    pub fn thread_intervals(
        &self,
        filter: &CollectionFilter,
    ) -> Result<Vec<crate::queries::ThreadInterval>, QueryError> {
        thread_intervals::thread_intervals(self, &self.resolve(filter))
    }

    /// Intervals of the filter's single CPU.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` unless the filter names exactly one CPU.
    pub fn cpu_intervals(
        &self,
        filter: &CollectionFilter,
        split_on_waiting_pid_change: bool,
    ) -> Result<Vec<crate::queries::CpuInterval>, QueryError> {
        cpu_intervals::cpu_intervals(self, split_on_waiting_pid_change, &self.resolve(filter))
    }

    /// Threads that ran on a CPU while the filter's single PID waited on
    /// it.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` unless the filter names exactly one non-idle
    /// PID.
    pub fn antagonists(
        &self,
        filter: &CollectionFilter,
    ) -> Result<Vec<crate::queries::Antagonism>, QueryError> {
        antagonists::antagonists(self, &self.resolve(filter))
    }

    /// Idle/overloaded utilization metrics over the filtered CPU set.
    ///
    /// # Errors
    ///
    /// Propagates elementary-interval errors.
    pub fn utilization_metrics(
        &self,
        filter: &CollectionFilter,
    ) -> Result<crate::queries::UtilizationMetrics, QueryError> {
        utilization::utilization_metrics(self, &self.resolve(filter))
    }

    /// Aggregate statistics over the filtered threads.
    ///
    /// # Errors
    ///
    /// Propagates per-thread interval errors.
    pub fn thread_stats(
        &self,
        filter: &CollectionFilter,
    ) -> Result<crate::queries::ThreadStatistics, QueryError> {
        thread_stats::thread_stats(self, &self.resolve(filter))
    }

    /// Per-thread metrics over the filtered threads, by PID.
    ///
    /// # Errors
    ///
    /// Propagates per-thread interval errors.
    pub fn thread_summaries(
        &self,
        filter: &CollectionFilter,
    ) -> Result<Vec<crate::queries::ThreadSummary>, QueryError> {
        thread_stats::thread_summaries(self, &self.resolve(filter))
    }

    /// Each filtered thread mapped to its observed command names.
    ///
    /// # Errors
    ///
    /// `NotFound` on a string-bank inconsistency.
    pub fn pids_and_comms(
        &self,
        filter: &CollectionFilter,
    ) -> Result<BTreeMap<Pid, Vec<String>>, QueryError> {
        pids_and_comms(self, &self.resolve(filter))
    }

    /// The retained decoded events, filtered by CPU, time, and name.
    #[must_use]
    pub fn raw_events(&self, filter: &CollectionFilter) -> Vec<TraceEvent> {
        raw_events(self, &self.resolve(filter))
    }

    /// Resolve an interned command id.
    ///
    /// # Errors
    ///
    /// `NotFound` for ids the collection never issued.
    pub fn command(&self, id: crate::string_bank::StringId) -> Result<String, QueryError> {
        Ok(self.bank.resolve(id)?.to_string())
    }

    /// The query-facing thread record for a span.
    ///
    /// # Errors
    ///
    /// `NotFound` on a string-bank inconsistency.
    pub fn span_thread(&self, span: &Span) -> Result<Thread, QueryError> {
        crate::intervals::span_thread(span, &self.bank)
    }
}

#[allow(clippy::cast_possible_wrap)]
fn timestamp_of(event: &TraceEvent) -> Timestamp {
    Timestamp(event.timestamp as i64)
}
