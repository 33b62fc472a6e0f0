//! Destinations for trace records.
//!
//! Recording is best effort: a sink never fails the turn that feeds it.

use std::sync::Mutex;

use crate::model::TraceRecord;

/// Receives trace records as they are produced.
pub trait TraceSink: Send + Sync {
    fn record(&self, record: &TraceRecord);
}

/// Mirrors records to `tracing::debug!`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl TraceSink for TracingSink {
    fn record(&self, record: &TraceRecord) {
        let fields = serde_json::Value::Object(record.fields.clone());
        tracing::debug!(kind = %record.kind, fields = %fields, "TRACE");
    }
}

/// Keeps every record in memory.
#[derive(Debug, Default)]
pub struct CollectingSink {
    records: Mutex<Vec<TraceRecord>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<TraceRecord> {
        self.records.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn count(&self) -> usize {
        self.records.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn clear(&self) {
        self.records.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }
}

impl TraceSink for CollectingSink {
    fn record(&self, record: &TraceRecord) {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(record.clone());
    }
}
