//! The `tracer` module records the bus's processing pipeline into a
//! bounded ring buffer: one sampled entry per message, carrying the
//! envelope snapshot and the summary of every route that matched it.

pub mod recorder;

pub use recorder::{RouteSummary, TraceEntry, TraceFilter, Tracer};
