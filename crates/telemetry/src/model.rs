//! Data model for per-turn diagnostic traces.

use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Longest preview kept in a trace record, in characters.
pub const PREVIEW_CHARS: usize = 400;

/// What happened at a trace point.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TraceKind {
    /// Turn accepted.
    Start,
    /// Model invoked.
    LlmStart,
    /// Model round finished.
    LlmEnd,
    LlmError,
    ToolStart,
    ToolEnd,
    ToolError,
    /// Text was re-derived because the model streamed none.
    Fallback,
    /// Recursion limit reached.
    Limit,
}

impl std::fmt::Display for TraceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Start => "start",
            Self::LlmStart => "llm_start",
            Self::LlmEnd => "llm_end",
            Self::LlmError => "llm_error",
            Self::ToolStart => "tool_start",
            Self::ToolEnd => "tool_end",
            Self::ToolError => "tool_error",
            Self::Fallback => "fallback",
            Self::Limit => "limit",
        };
        f.write_str(name)
    }
}

/// One diagnostic record: `{t, type, ...fields}` on the wire.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TraceRecord {
    pub t: DateTime<Utc>,
    #[serde(rename = "type")]
    pub kind: TraceKind,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl TraceRecord {
    pub fn new(kind: TraceKind) -> Self {
        Self {
            t: Utc::now(),
            kind,
            fields: Map::new(),
        }
    }

    /// Attach a field.
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(key.to_string(), value.into());
        self
    }

    /// Attach a text field cut to [`PREVIEW_CHARS`].
    pub fn with_preview(self, key: &str, text: &str) -> Self {
        self.with(key, preview(text))
    }
}

/// First [`PREVIEW_CHARS`] characters of `text`.
pub fn preview(text: &str) -> String {
    text.chars().take(PREVIEW_CHARS).collect()
}

/// The ordered records of one turn.
#[derive(Debug, Clone)]
pub struct Trace {
    records: Vec<TraceRecord>,
    started: Instant,
}

impl Trace {
    pub fn new() -> Self {
        Self {
            records: Vec::new(),
            started: Instant::now(),
        }
    }

    pub fn push(&mut self, record: TraceRecord) {
        self.records.push(record);
    }

    pub fn records(&self) -> &[TraceRecord] {
        &self.records
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn into_records(self) -> Vec<TraceRecord> {
        self.records
    }

    /// Milliseconds since the trace was opened.
    pub fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    /// Number of records of the given kind.
    pub fn count(&self, kind: TraceKind) -> usize {
        self.records.iter().filter(|r| r.kind == kind).count()
    }
}

impl Default for Trace {
    fn default() -> Self {
        Self::new()
    }
}
