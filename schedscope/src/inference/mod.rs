//! Scheduler inference: event loaders, per-thread conflict resolution,
//! and span generation.
//!
//! Decoded events only partially constrain thread state. This module
//! turns them into per-thread transition streams, repairs or rejects
//! contradictory attestations, fills unknown fields from neighboring
//! events, and convolutes the result into contiguous spans.

pub mod inferrer;
pub mod loaders;
pub mod span_builder;
pub mod transition;

pub use inferrer::ThreadInferrer;
pub use loaders::LoaderSet;
pub use span_builder::{SplitOptions, ThreadSpanBuilder};
pub use transition::{resolve_conflict, ConflictPolicy, Resolution, Transition, TransitionSource};
