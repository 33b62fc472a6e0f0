//! Per-turn diagnostic traces for Toolwright agents.
//!
//! A turn produces an ordered list of [`TraceRecord`]s (model rounds, tool
//! calls, fallbacks, limits). Records are mirrored to a [`TraceSink`] and,
//! when enabled, sent to the client before the stream ends.

pub mod model;
pub mod sink;

pub use model::{PREVIEW_CHARS, Trace, TraceKind, TraceRecord, preview};
pub use sink::{CollectingSink, TraceSink, TracingSink};
