//! Chrome Trace Event Format export.
//!
//! Serializes a collection's spans for chrome://tracing and Perfetto:
//! one track per thread, one complete ("X") event per span, plus
//! thread-name metadata records carrying the command names.
//!
//! Format: <https://docs.google.com/document/d/1CvAClvFfyA5R-PhYUmn5OOQtYMH4h6I0nSsKchNAySU/preview>

use std::collections::HashMap;
use std::io::Write;

use serde::Serialize;
use serde_json::Value as JsonValue;

use crate::collection::Collection;
use crate::domain::errors::ExportError;
use crate::domain::types::SpanState;

#[derive(Debug, Clone, Serialize)]
struct ChromeTraceEvent {
    /// Event name (the span's command, or its state when unnamed).
    name: String,
    /// Category used for filtering/coloring: the span state.
    cat: String,
    /// Phase: "X" = complete event, "M" = metadata.
    ph: String,
    /// Timestamp in microseconds.
    ts: f64,
    /// Duration in microseconds; absent on metadata events.
    #[serde(skip_serializing_if = "Option::is_none")]
    dur: Option<f64>,
    pid: i64,
    tid: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    args: Option<HashMap<String, JsonValue>>,
}

#[derive(Debug, Serialize)]
struct ChromeTrace {
    #[serde(rename = "traceEvents")]
    trace_events: Vec<ChromeTraceEvent>,
    #[serde(rename = "displayTimeUnit")]
    display_time_unit: String,
}

/// Exports a collection's spans as a Chrome trace.
pub struct ChromeTraceExporter<'a> {
    collection: &'a Collection,
}

impl<'a> ChromeTraceExporter<'a> {
    #[must_use]
    pub fn new(collection: &'a Collection) -> Self {
        Self { collection }
    }

    /// Write the trace JSON to any writer (file, stdout, buffer).
    ///
    /// # Errors
    ///
    /// I/O and serialization failures, plus string-bank inconsistencies.
    pub fn export<W: Write>(&self, writer: W) -> Result<(), ExportError> {
        let mut events = Vec::new();
        let mut thread_names: HashMap<i64, String> = HashMap::new();

        for pid in self.collection.pids() {
            for span in self.collection.thread_spans(pid) {
                let thread = self.collection.span_thread(span)?;
                thread_names.entry(pid.0).or_insert_with(|| thread.command.clone());

                let mut args = HashMap::new();
                args.insert("cpu".to_string(), serde_json::json!(span.cpu.0));
                args.insert("state".to_string(), serde_json::json!(state_name(span.state)));
                if span.priority.is_known() {
                    args.insert("priority".to_string(), serde_json::json!(span.priority.0));
                }
                if span.synthetic_start || span.synthetic_end {
                    args.insert("synthetic_boundary".to_string(), serde_json::json!(true));
                }
                if !span.dropped_event_indices.is_empty() {
                    args.insert(
                        "dropped_events".to_string(),
                        serde_json::json!(span.dropped_event_indices),
                    );
                }

                #[allow(clippy::cast_precision_loss)]
                events.push(ChromeTraceEvent {
                    name: thread.command,
                    cat: state_name(span.state).to_string(),
                    ph: "X".to_string(),
                    ts: span.start.0 as f64 / 1000.0,
                    dur: Some(span.duration().0 as f64 / 1000.0),
                    pid: pid.0,
                    tid: pid.0,
                    args: Some(args),
                });
            }
        }

        for (pid, name) in thread_names {
            let mut args = HashMap::new();
            args.insert("name".to_string(), serde_json::json!(name));
            events.push(ChromeTraceEvent {
                name: "thread_name".to_string(),
                cat: String::new(),
                ph: "M".to_string(),
                ts: 0.0,
                dur: None,
                pid,
                tid: pid,
                args: Some(args),
            });
        }

        let trace = ChromeTrace { trace_events: events, display_time_unit: "ms".to_string() };
        serde_json::to_writer_pretty(writer, &trace)?;
        Ok(())
    }
}

fn state_name(state: SpanState) -> &'static str {
    match state {
        SpanState::Running => "running",
        SpanState::Waiting => "waiting",
        SpanState::Sleeping => "sleeping",
        SpanState::Unknown => "unknown",
    }
}
