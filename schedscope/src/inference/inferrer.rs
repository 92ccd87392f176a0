//! Per-thread inference: conflict resolution and unknown-field fill.
//!
//! The inferrer consumes one thread's transitions in nondecreasing
//! timestamp order. Incoming transitions buffer until a *forward barrier*
//! arrives — a transition whose next CPU is attested, whose next state is
//! a single concrete state, and whose forward policies do not admit
//! dropping it. Everything before a barrier is fully determined by the
//! barrier, so the buffer can be resolved and emitted.
//!
//! Resolving a batch runs a fixed-point loop: scan for the first CPU or
//! state disagreement, repair it (drop a conflictant, or insert a
//! synthetic transition between the two attestations), and rescan until
//! clean. A forward and a backward pass then fill remaining Unknown CPUs
//! and states from neighboring attestations.

use super::transition::{resolve_conflict, ConflictPolicy, Resolution, Transition};
use crate::domain::types::{CpuId, Pid, ThreadState, Timestamp};
use crate::domain::CollectionError;

/// Scan outcome: the first conflict found, with the indices of the two
/// transitions whose attestations disagree.
#[derive(Debug)]
struct Conflict {
    /// Dimensions in conflict between the same pair of transitions.
    cpu: bool,
    state: bool,
    earlier: usize,
    later: usize,
}

/// Infers one thread's timeline.
#[derive(Debug)]
pub struct ThreadInferrer {
    pid: Pid,
    last_timestamp: Option<Timestamp>,
    pending: Vec<Transition>,
}

impl ThreadInferrer {
    #[must_use]
    pub fn new(pid: Pid) -> Self {
        Self { pid, last_timestamp: None, pending: Vec::new() }
    }

    /// Feed the next transition; resolved transitions are appended to
    /// `out` once a forward barrier lets the buffer flush.
    ///
    /// # Errors
    ///
    /// Validation failures (`DataIntegrity` kinds) and unresolvable
    /// conflicts.
    pub fn add(
        &mut self,
        transition: Transition,
        out: &mut Vec<Transition>,
    ) -> Result<(), CollectionError> {
        self.validate(&transition)?;
        self.last_timestamp = Some(transition.timestamp);
        let barrier = is_forward_barrier(&transition);
        self.pending.push(transition);
        if barrier {
            self.infer()?;
            self.flush_resolved(out);
        }
        Ok(())
    }

    /// Resolve and emit everything still buffered.
    ///
    /// # Errors
    ///
    /// Unresolvable conflicts in the final batch.
    pub fn finish(mut self, out: &mut Vec<Transition>) -> Result<(), CollectionError> {
        if !self.pending.is_empty() {
            self.infer()?;
            out.append(&mut self.pending);
        }
        Ok(())
    }

    fn validate(&self, t: &Transition) -> Result<(), CollectionError> {
        if !t.timestamp.is_known() {
            return Err(CollectionError::MissingTimestamp(self.pid));
        }
        if t.pid != self.pid {
            return Err(CollectionError::PidMismatch { expected: self.pid, actual: t.pid });
        }
        if t.prev_state.contains(ThreadState::UNKNOWN)
            || t.next_state.contains(ThreadState::UNKNOWN)
            || t.prev_state.is_empty()
            || t.next_state.is_empty()
        {
            return Err(CollectionError::UnknownStateBit(self.pid));
        }
        if let Some(last) = self.last_timestamp {
            if t.timestamp < last {
                return Err(CollectionError::OutOfOrderTimestamp {
                    pid: self.pid,
                    timestamp: t.timestamp,
                    previous: last,
                });
            }
        }
        Ok(())
    }

    /// Emit the resolved prefix; the last non-dropped transition (the
    /// barrier) stays buffered as the anchor the next batch resolves
    /// against.
    fn flush_resolved(&mut self, out: &mut Vec<Transition>) {
        let keep_from = self
            .pending
            .iter()
            .rposition(|t| !t.dropped)
            .map_or(self.pending.len(), |i| i);
        out.extend(self.pending.drain(..keep_from));
    }

    /// Fixed-point conflict resolution followed by the two fill passes.
    fn infer(&mut self) -> Result<(), CollectionError> {
        loop {
            let Some(conflict) = self.scan() else { break };
            self.repair(&conflict)?;
        }
        self.forward_pass();
        self.backward_pass();
        Ok(())
    }

    /// Walk the buffer tracking the currently attested CPU and the merged
    /// state set; return the first disagreement.
    fn scan(&self) -> Option<Conflict> {
        let mut cur_cpu = CpuId::UNKNOWN;
        let mut cpu_attestor: Option<usize> = None;
        let mut cur_state = ThreadState::ANY;
        let mut state_attestor: Option<usize> = None;

        for (i, t) in self.pending.iter().enumerate() {
            if t.dropped {
                continue;
            }

            let cpu_conflict = t.prev_cpu.is_known() && cur_cpu.is_known() && t.prev_cpu != cur_cpu;
            let merged = t.prev_state & cur_state;
            let state_conflict = merged.is_empty();

            if cpu_conflict || state_conflict {
                // Both dimensions conflicting against the same earlier
                // transition can share one repair; otherwise the rescan
                // after the first repair picks the other dimension up.
                let same_pair = cpu_attestor == state_attestor;
                let earlier = if cpu_conflict { cpu_attestor } else { state_attestor };
                return Some(Conflict {
                    cpu: cpu_conflict,
                    state: state_conflict && (!cpu_conflict || same_pair),
                    earlier: earlier.unwrap_or(0),
                    later: i,
                });
            }

            if t.next_cpu.is_known() {
                cur_cpu = t.next_cpu;
                cpu_attestor = Some(i);
            } else if t.cpu_propagates_through {
                if t.prev_cpu.is_known() {
                    cur_cpu = t.prev_cpu;
                    cpu_attestor = Some(i);
                }
                // else: unknown flows through, last attestor stands
            } else {
                cur_cpu = CpuId::UNKNOWN;
                cpu_attestor = None;
            }

            let narrowed = if t.state_propagates_through { merged & t.next_state } else { t.next_state };
            if !t.state_propagates_through || narrowed != cur_state {
                state_attestor = Some(i);
            }
            cur_state = narrowed;
        }
        None
    }

    fn repair(&mut self, conflict: &Conflict) -> Result<(), CollectionError> {
        let earlier = &self.pending[conflict.earlier];
        let later = &self.pending[conflict.later];

        let (cpu_resolution, state_resolution) = (
            conflict
                .cpu
                .then(|| resolve_conflict(earlier.cpu_forward_policy, later.cpu_backward_policy)),
            conflict.state.then(|| {
                resolve_conflict(earlier.state_forward_policy, later.state_backward_policy)
            }),
        );

        for (resolution, kind) in [(cpu_resolution, "cpu"), (state_resolution, "state")] {
            if resolution == Some(Resolution::Fail) {
                return Err(CollectionError::Unresolvable {
                    pid: self.pid,
                    kind,
                    earlier: earlier.timestamp,
                    later: later.timestamp,
                });
            }
        }

        // A drop on either dimension discards transitions outright, which
        // subsumes any synthetic repair of the other dimension.
        if cpu_resolution == Some(Resolution::Drop) || state_resolution == Some(Resolution::Drop) {
            let (fwd, bwd) = if cpu_resolution == Some(Resolution::Drop) {
                (earlier.cpu_forward_policy, later.cpu_backward_policy)
            } else {
                (earlier.state_forward_policy, later.state_backward_policy)
            };
            let drop_earlier = fwd.contains(ConflictPolicy::DROP);
            let drop_later = bwd.contains(ConflictPolicy::DROP);
            debug_assert!(drop_earlier || drop_later);
            self.pending[conflict.earlier].dropped |= drop_earlier;
            self.pending[conflict.later].dropped |= drop_later;
            return Ok(());
        }

        // Both surviving resolutions are InsertSynthetic: one invented
        // transition between the two attestations reconciles the pair.
        let mid = Timestamp((earlier.timestamp.0 + later.timestamp.0) / 2);
        let mut synthetic = Transition::synthetic(self.pid, mid);
        if cpu_resolution == Some(Resolution::InsertSynthetic) {
            synthetic.prev_cpu = attested_next_cpu(earlier);
            synthetic.next_cpu = later.prev_cpu;
            synthetic.cpu_propagates_through = false;
        }
        if state_resolution == Some(Resolution::InsertSynthetic) {
            synthetic.prev_state = effective_next_state(earlier);
            synthetic.next_state = later.prev_state;
            synthetic.state_propagates_through = false;
        }

        // Keep the buffer timestamp-sorted; among equal timestamps the
        // synthetic lands after intervening organic transitions but always
        // ahead of the conflicting one it reconciles.
        let lo = conflict.earlier + 1;
        let offset = self.pending[lo..conflict.later]
            .iter()
            .position(|t| t.timestamp > mid)
            .unwrap_or(conflict.later - lo);
        self.pending.insert(lo + offset, synthetic);
        Ok(())
    }

    fn forward_pass(&mut self) {
        let mut cur_cpu = CpuId::UNKNOWN;
        let mut cur_state = ThreadState::ANY;
        for t in self.pending.iter_mut().filter(|t| !t.dropped) {
            if !t.prev_cpu.is_known() {
                t.prev_cpu = cur_cpu;
            }
            if t.next_cpu.is_known() {
                cur_cpu = t.next_cpu;
            } else if t.cpu_propagates_through {
                t.next_cpu = t.prev_cpu;
                cur_cpu = t.next_cpu;
            } else {
                cur_cpu = CpuId::UNKNOWN;
            }

            t.prev_state &= cur_state;
            debug_assert!(!t.prev_state.is_empty(), "conflict scan missed a state conflict");
            if t.state_propagates_through {
                t.next_state &= t.prev_state;
            }
            cur_state = t.next_state;
        }
    }

    fn backward_pass(&mut self) {
        let mut cur_cpu = CpuId::UNKNOWN;
        let mut cur_state = ThreadState::ANY;
        for t in self.pending.iter_mut().rev().filter(|t| !t.dropped) {
            if !t.next_cpu.is_known() {
                t.next_cpu = cur_cpu;
            }
            if t.prev_cpu.is_known() {
                cur_cpu = t.prev_cpu;
            } else if t.cpu_propagates_through {
                t.prev_cpu = t.next_cpu;
                cur_cpu = t.prev_cpu;
            } else {
                cur_cpu = CpuId::UNKNOWN;
            }

            t.next_state &= cur_state;
            debug_assert!(!t.next_state.is_empty(), "conflict scan missed a state conflict");
            if t.state_propagates_through {
                t.prev_state &= t.next_state;
            }
            cur_state = t.prev_state;
        }
    }
}

/// A forward barrier pins down everything before it: its next CPU and
/// state are fully attested and may not be dropped going forward.
fn is_forward_barrier(t: &Transition) -> bool {
    t.next_cpu.is_known()
        && t.next_state.is_single()
        && !t.cpu_forward_policy.contains(ConflictPolicy::DROP)
        && !t.state_forward_policy.contains(ConflictPolicy::DROP)
}

/// The CPU a transition leaves the thread on, as seen by the scan.
fn attested_next_cpu(t: &Transition) -> CpuId {
    if t.next_cpu.is_known() {
        t.next_cpu
    } else {
        t.prev_cpu
    }
}

/// The state set a transition leaves the thread in.
fn effective_next_state(t: &Transition) -> ThreadState {
    if t.state_propagates_through {
        t.prev_state & t.next_state
    } else {
        t.next_state
    }
}
