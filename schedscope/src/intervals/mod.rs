//! Elementary CPU intervals.
//!
//! An elementary interval is a maximal stretch of time over which, on
//! every selected CPU, the running thread and the set of waiting threads
//! are constant. The builder walks the selected CPUs' Running and Waiting
//! spans and emits one diff interval per change point: which spans began
//! and which ended there. [`ElementaryIntervalMerger`] folds the diffs
//! back into full per-CPU states.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::domain::types::{CpuId, SpanState, Thread, Timestamp};
use crate::domain::QueryError;
use crate::spans::Span;
use crate::string_bank::StringBank;

/// How a [`CpuState`] record relates to the CPU's full state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MergeType {
    /// The complete state of the CPU over the interval.
    Full,
    /// Threads that entered at the interval start.
    Add,
    /// Threads that left at the interval start.
    Remove,
}

/// One CPU's (partial or full) state over an elementary interval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CpuState {
    pub cpu: CpuId,
    pub merge_type: MergeType,
    pub running: Option<Thread>,
    pub waiting: Vec<Thread>,
}

/// A maximal interval over which every selected CPU's state is constant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementaryCpuInterval {
    pub start_timestamp: Timestamp,
    pub end_timestamp: Timestamp,
    pub cpu_states: Vec<CpuState>,
}

impl ElementaryCpuInterval {
    #[must_use]
    pub fn duration(&self) -> i64 {
        self.end_timestamp.0 - self.start_timestamp.0
    }
}

/// One CPU's window-relevant Running and Waiting spans, start-sorted.
#[derive(Debug)]
pub struct CpuTimeline<'a> {
    pub cpu: CpuId,
    pub spans: Vec<&'a Span>,
}

#[derive(Default)]
struct ChangeSet<'a> {
    added: Vec<&'a Span>,
    removed: Vec<&'a Span>,
}

/// Emits diff-mode elementary intervals over a set of CPU timelines.
///
/// `bounds` clips span endpoints: the query window when truncating, the
/// collection extent otherwise (boundary intervals then overhang the
/// window to their natural endpoints).
pub struct ElementaryIntervalBuilder<'a> {
    timelines: Vec<CpuTimeline<'a>>,
    bounds: (Timestamp, Timestamp),
    pin_start: bool,
}

impl<'a> ElementaryIntervalBuilder<'a> {
    #[must_use]
    pub fn new(
        timelines: Vec<CpuTimeline<'a>>,
        bounds: (Timestamp, Timestamp),
        pin_start: bool,
    ) -> Self {
        Self { timelines, bounds, pin_start }
    }

    /// Walk the change points in time order and emit one interval per
    /// stretch of constant state.
    ///
    /// # Errors
    ///
    /// `NotFound` if a span references a command the string bank never
    /// issued.
    pub fn build_diff(
        &self,
        bank: &StringBank,
    ) -> Result<Vec<ElementaryCpuInterval>, QueryError> {
        let (lo, hi) = self.bounds;
        let mut changes: BTreeMap<Timestamp, HashMap<CpuId, ChangeSet<'a>>> = BTreeMap::new();

        for timeline in &self.timelines {
            for &span in &timeline.spans {
                if span.is_zero_width() {
                    // Instantaneous states have no residency to report.
                    continue;
                }
                let clipped_start = span.start.max(lo);
                if span.end > clipped_start {
                    changes
                        .entry(clipped_start)
                        .or_default()
                        .entry(timeline.cpu)
                        .or_default()
                        .added
                        .push(span);
                }
                // A span running past the window does not end inside it.
                if span.end <= hi {
                    changes
                        .entry(span.end)
                        .or_default()
                        .entry(timeline.cpu)
                        .or_default()
                        .removed
                        .push(span);
                }
            }
        }

        if self.pin_start || changes.is_empty() {
            changes.entry(lo).or_default();
        }

        let mut intervals = Vec::with_capacity(changes.len());
        let mut iter = changes.into_iter().peekable();
        while let Some((start, per_cpu)) = iter.next() {
            let end = iter.peek().map_or(hi, |(next, _)| *next);
            let mut cpu_states = Vec::new();
            let mut cpus: Vec<&CpuId> = per_cpu.keys().collect();
            cpus.sort_unstable();
            for &cpu in cpus {
                let change = &per_cpu[&cpu];
                if let Some(state) = diff_state(cpu, MergeType::Add, &change.added, bank)? {
                    cpu_states.push(state);
                }
                if let Some(state) = diff_state(cpu, MergeType::Remove, &change.removed, bank)? {
                    cpu_states.push(state);
                }
            }
            intervals.push(ElementaryCpuInterval {
                start_timestamp: start,
                end_timestamp: end,
                cpu_states,
            });
        }
        Ok(intervals)
    }
}

fn diff_state(
    cpu: CpuId,
    merge_type: MergeType,
    spans: &[&Span],
    bank: &StringBank,
) -> Result<Option<CpuState>, QueryError> {
    if spans.is_empty() {
        return Ok(None);
    }
    let mut running = None;
    let mut waiting = Vec::new();
    for &span in spans {
        let thread = span_thread(span, bank)?;
        match span.state {
            SpanState::Running => running = Some(thread),
            SpanState::Waiting => waiting.push(thread),
            SpanState::Sleeping | SpanState::Unknown => {}
        }
    }
    waiting.sort_by_key(|t| t.pid);
    Ok(Some(CpuState { cpu, merge_type, running, waiting }))
}

/// Resolve a span into the query-facing thread record.
pub(crate) fn span_thread(span: &Span, bank: &StringBank) -> Result<Thread, QueryError> {
    let command = match span.command {
        Some(id) => bank.resolve(id)?.to_string(),
        None => "<unknown>".to_string(),
    };
    Ok(Thread { pid: span.pid, command, priority: span.priority })
}

#[derive(Debug, Default, Clone)]
struct CpuOccupancy {
    running: Option<Thread>,
    waiting: Vec<Thread>,
}

/// Folds diff intervals back into full per-CPU states.
///
/// Feeding every diff interval of a sequence through the merger yields
/// exactly the full-mode output of the same sequence.
#[derive(Debug)]
pub struct ElementaryIntervalMerger {
    cpus: Vec<CpuId>,
    occupancy: HashMap<CpuId, CpuOccupancy>,
}

impl ElementaryIntervalMerger {
    #[must_use]
    pub fn new(cpus: Vec<CpuId>) -> Self {
        let occupancy = cpus.iter().map(|&cpu| (cpu, CpuOccupancy::default())).collect();
        Self { cpus, occupancy }
    }

    /// Apply one diff interval and return the equivalent full interval.
    pub fn merge(&mut self, interval: &ElementaryCpuInterval) -> ElementaryCpuInterval {
        for state in &interval.cpu_states {
            let Some(occupancy) = self.occupancy.get_mut(&state.cpu) else { continue };
            match state.merge_type {
                MergeType::Remove => {
                    if let Some(running) = &state.running {
                        if occupancy.running.as_ref().is_some_and(|t| t.pid == running.pid) {
                            occupancy.running = None;
                        }
                    }
                    for gone in &state.waiting {
                        if let Some(at) =
                            occupancy.waiting.iter().position(|t| t.pid == gone.pid)
                        {
                            occupancy.waiting.remove(at);
                        }
                    }
                }
                MergeType::Add => {
                    if state.running.is_some() {
                        occupancy.running.clone_from(&state.running);
                    }
                    occupancy.waiting.extend(state.waiting.iter().cloned());
                    occupancy.waiting.sort_by_key(|t| t.pid);
                }
                MergeType::Full => {
                    occupancy.running.clone_from(&state.running);
                    occupancy.waiting.clone_from(&state.waiting);
                }
            }
        }

        ElementaryCpuInterval {
            start_timestamp: interval.start_timestamp,
            end_timestamp: interval.end_timestamp,
            cpu_states: self
                .cpus
                .iter()
                .map(|&cpu| {
                    let occupancy = &self.occupancy[&cpu];
                    CpuState {
                        cpu,
                        merge_type: MergeType::Full,
                        running: occupancy.running.clone(),
                        waiting: occupancy.waiting.clone(),
                    }
                })
                .collect(),
        }
    }
}
