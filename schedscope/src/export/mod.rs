//! Trace export.
//!
//! Serializes collections to external visualization formats. Currently
//! Chrome Trace Event Format for chrome://tracing and Perfetto.

pub mod chrome_trace;

pub use chrome_trace::ChromeTraceExporter;
