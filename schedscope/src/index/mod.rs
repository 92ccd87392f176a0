//! Per-CPU span index.
//!
//! Running spans never overlap on one CPU, so a start-sorted vector with
//! binary search serves them; Sleeping and Waiting spans of different
//! threads overlap freely and go into interval trees.

pub mod interval_tree;

use std::collections::HashMap;

use crate::domain::types::{CpuId, SpanState, Timestamp};
use crate::domain::CollectionError;
use crate::spans::{Span, SpanArena, SpanId};

pub use interval_tree::IntervalTree;

/// Index of one CPU's spans.
#[derive(Debug, Default)]
pub struct CpuSpans {
    /// Running spans sorted by start; verified non-overlapping.
    running: Vec<SpanId>,
    sleeping: IntervalTree,
    waiting: IntervalTree,
}

/// Span index across all CPUs observed in the trace.
#[derive(Debug, Default)]
pub struct CpuIndex {
    per_cpu: HashMap<CpuId, CpuSpans>,
}

impl CpuIndex {
    /// Group the arena's spans by CPU and state.
    ///
    /// # Errors
    ///
    /// `Internal` if two Running spans overlap on one CPU — the span
    /// generator guarantees at most one thread runs per CPU per instant.
    pub fn build(arena: &SpanArena) -> Result<CpuIndex, CollectionError> {
        let mut running: HashMap<CpuId, Vec<SpanId>> = HashMap::new();
        let mut sleeping: HashMap<CpuId, Vec<(Timestamp, Timestamp, SpanId)>> = HashMap::new();
        let mut waiting: HashMap<CpuId, Vec<(Timestamp, Timestamp, SpanId)>> = HashMap::new();

        for span in arena.all() {
            match span.state {
                SpanState::Running => running.entry(span.cpu).or_default().push(span.id),
                SpanState::Sleeping => {
                    sleeping.entry(span.cpu).or_default().push((span.start, span.end, span.id));
                }
                SpanState::Waiting => {
                    waiting.entry(span.cpu).or_default().push((span.start, span.end, span.id));
                }
                SpanState::Unknown => {}
            }
        }

        let mut per_cpu: HashMap<CpuId, CpuSpans> = HashMap::new();
        for (cpu, mut ids) in running {
            ids.sort_by_key(|&id| {
                let span = arena.get(id).expect("arena id from arena");
                (span.start, span.end)
            });
            for pair in ids.windows(2) {
                let a = arena.get(pair[0]).expect("arena id from arena");
                let b = arena.get(pair[1]).expect("arena id from arena");
                if a.end > b.start {
                    return Err(CollectionError::Internal(format!(
                        "{} and {} both running on {} at {}",
                        a.pid, b.pid, cpu, b.start
                    )));
                }
            }
            per_cpu.entry(cpu).or_default().running = ids;
        }
        for (cpu, intervals) in sleeping {
            per_cpu.entry(cpu).or_default().sleeping = IntervalTree::build(intervals);
        }
        for (cpu, intervals) in waiting {
            per_cpu.entry(cpu).or_default().waiting = IntervalTree::build(intervals);
        }

        Ok(CpuIndex { per_cpu })
    }

    /// The CPUs observed, ascending.
    #[must_use]
    pub fn cpus(&self) -> Vec<CpuId> {
        let mut cpus: Vec<CpuId> = self.per_cpu.keys().copied().collect();
        cpus.sort_unstable();
        cpus
    }

    #[must_use]
    pub fn contains(&self, cpu: CpuId) -> bool {
        self.per_cpu.contains_key(&cpu)
    }

    /// Spans of `state` on `cpu` overlapping the closed range `[lo, hi]`,
    /// in start order.
    #[must_use]
    pub fn spans_overlapping<'a>(
        &self,
        arena: &'a SpanArena,
        cpu: CpuId,
        state: SpanState,
        lo: Timestamp,
        hi: Timestamp,
    ) -> Vec<&'a Span> {
        let Some(spans) = self.per_cpu.get(&cpu) else { return Vec::new() };
        let ids: Vec<SpanId> = match state {
            SpanState::Running => {
                // Non-overlapping and start-sorted, so ends are sorted
                // too: binary-search the first span still alive at `lo`.
                let from = spans.running.partition_point(|&id| {
                    let span = arena.get(id).expect("arena id from arena");
                    span.end.max(Timestamp(span.start.0 + 1)) <= lo
                });
                spans.running[from..]
                    .iter()
                    .copied()
                    .take_while(|&id| {
                        arena.get(id).expect("arena id from arena").start <= hi
                    })
                    .collect()
            }
            SpanState::Sleeping => spans.sleeping.query(lo, hi),
            SpanState::Waiting => spans.waiting.query(lo, hi),
            SpanState::Unknown => Vec::new(),
        };
        ids.into_iter().map(|id| arena.get(id).expect("arena id from arena")).collect()
    }
}
