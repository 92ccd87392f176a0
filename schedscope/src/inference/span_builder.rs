//! Convolutes one thread's inferred transitions into spans.
//!
//! By the time transitions reach this stage inference has made adjacent
//! transitions agree exactly: each transition's prev side equals the state
//! and CPU the previous transition left the thread in. The builder keeps
//! one span open and closes it whenever a transition changes state or
//! CPU (or, when precise splitting is on, command or priority).

use super::transition::Transition;
use crate::domain::types::{CpuId, Pid, Priority, ThreadState, Timestamp};
use crate::domain::CollectionError;
use crate::spans::{Span, SpanId};
use crate::string_bank::StringId;

/// Span-splitting options.
#[derive(Debug, Clone, Copy, Default)]
pub struct SplitOptions {
    /// Close spans on command-name change.
    pub precise_commands: bool,
    /// Close spans on priority change.
    pub precise_priorities: bool,
}

#[derive(Debug)]
struct OpenSpan {
    start: Timestamp,
    cpu: CpuId,
    state: ThreadState,
    command: Option<StringId>,
    priority: Priority,
    synthetic_start: bool,
    dropped_event_indices: Vec<i64>,
}

/// Builds the span list for one thread.
#[derive(Debug)]
pub struct ThreadSpanBuilder {
    pid: Pid,
    options: SplitOptions,
    current: Option<OpenSpan>,
    /// Command/priority most recently observed; newly opened spans inherit
    /// these when their transition does not carry its own.
    last_command: Option<StringId>,
    last_priority: Priority,
    /// Dropped events seen before any span opened.
    orphan_dropped: Vec<i64>,
    spans: Vec<Span>,
}

impl ThreadSpanBuilder {
    #[must_use]
    pub fn new(pid: Pid, options: SplitOptions) -> Self {
        Self {
            pid,
            options,
            current: None,
            last_command: None,
            last_priority: Priority::UNKNOWN,
            orphan_dropped: Vec::new(),
            spans: Vec::new(),
        }
    }

    /// Consume the next inferred transition.
    ///
    /// # Errors
    ///
    /// `Internal` if the transition disagrees with the open span —
    /// inference is supposed to have made that impossible.
    pub fn process(&mut self, t: &Transition) -> Result<(), CollectionError> {
        if t.dropped {
            // The discarded event still belongs to the timeline it was
            // observed in.
            if let Some(index) = t.event_index() {
                match self.current.as_mut() {
                    Some(open) => open.dropped_event_indices.push(index),
                    None => self.orphan_dropped.push(index),
                }
            }
            return Ok(());
        }

        let next_command = t.next_command.or(self.last_command);
        let next_priority =
            if t.next_priority.is_known() { t.next_priority } else { self.last_priority };
        self.last_command = next_command;
        self.last_priority = next_priority;

        let Some(open) = self.current.take() else {
            self.current = Some(OpenSpan {
                start: t.timestamp,
                cpu: t.next_cpu,
                state: t.next_state,
                command: next_command,
                priority: next_priority,
                synthetic_start: t.is_synthetic(),
                dropped_event_indices: std::mem::take(&mut self.orphan_dropped),
            });
            return Ok(());
        };

        if t.prev_cpu != open.cpu {
            return Err(CollectionError::Internal(format!(
                "{} transition at {} attests {} but its span holds {}",
                self.pid, t.timestamp, t.prev_cpu, open.cpu
            )));
        }
        let merged = t.prev_state & open.state;
        if merged.is_empty() {
            return Err(CollectionError::Internal(format!(
                "{} transition at {} attests state {} but its span holds {}",
                self.pid, t.timestamp, t.prev_state, open.state
            )));
        }

        let next_state =
            if t.state_propagates_through { merged & t.next_state } else { t.next_state };

        let state_change = next_state != open.state;
        let cpu_change = t.next_cpu != open.cpu;
        let command_change = self.options.precise_commands
            && t.next_command.is_some()
            && t.next_command != open.command;
        let priority_change = self.options.precise_priorities
            && t.next_priority.is_known()
            && t.next_priority != open.priority;

        // A thread never changes CPUs while Running: only a sched_switch
        // takes it off-CPU, and that is a state change.
        if open.state == ThreadState::RUNNING && next_state == ThreadState::RUNNING && cpu_change {
            return Err(CollectionError::Internal(format!(
                "{} running span migrated from {} to {} at {}",
                self.pid, open.cpu, t.next_cpu, t.timestamp
            )));
        }

        if state_change || cpu_change || command_change || priority_change {
            self.emit(open, t.timestamp, t.is_synthetic(), next_command, next_priority);
            self.current = Some(OpenSpan {
                start: t.timestamp,
                cpu: t.next_cpu,
                state: next_state,
                command: next_command,
                priority: next_priority,
                synthetic_start: t.is_synthetic(),
                dropped_event_indices: Vec::new(),
            });
        } else {
            self.current = Some(open);
        }
        Ok(())
    }

    /// Close the trailing span at the trace end boundary and return the
    /// thread's spans.
    #[must_use]
    pub fn finish(mut self, end: Timestamp) -> Vec<Span> {
        if let Some(open) = self.current.take() {
            let (command, priority) = (self.last_command, self.last_priority);
            self.emit(open, end, true, command, priority);
        }
        self.spans
    }

    fn emit(
        &mut self,
        open: OpenSpan,
        at: Timestamp,
        synthetic_end: bool,
        fallback_command: Option<StringId>,
        fallback_priority: Priority,
    ) {
        // An instantaneous boundary state is only worth a zero-width span
        // when it is actually attested; an unresolved superposition there
        // says nothing.
        if open.start == at && !open.state.is_single() {
            return;
        }
        // A span opened at the trace boundary learns its command and
        // priority from the first event that names the thread.
        let command = open.command.or(fallback_command);
        let priority = if open.priority.is_known() { open.priority } else { fallback_priority };
        self.spans.push(Span {
            id: SpanId::UNASSIGNED,
            pid: self.pid,
            start: open.start,
            end: at,
            cpu: open.cpu,
            state: open.state.to_span_state(),
            command,
            priority,
            synthetic_start: open.synthetic_start,
            synthetic_end,
            dropped_event_indices: open.dropped_event_indices,
        });
    }
}
