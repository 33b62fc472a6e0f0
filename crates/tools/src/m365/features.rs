//! In-memory feature toggles behind `tooling.feature.toggle`.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureRecord {
    pub feature: String,
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct FeatureStore {
    records: Mutex<HashMap<String, FeatureRecord>>,
}

impl FeatureStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the toggle, replacing any earlier state.
    pub fn set(&self, feature: &str, enabled: bool, context: Option<Value>) -> FeatureRecord {
        let record = FeatureRecord {
            feature: feature.to_string(),
            enabled,
            context,
            updated_at: Utc::now(),
        };
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(feature.to_string(), record.clone());
        record
    }

    pub fn get(&self, feature: &str) -> Option<FeatureRecord> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(feature)
            .cloned()
    }

    pub fn is_enabled(&self, feature: &str) -> bool {
        self.get(feature).is_some_and(|r| r.enabled)
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn later_toggles_replace_earlier_ones() {
        let store = FeatureStore::new();
        assert!(!store.is_enabled("cli-fallback"));
        store.set("cli-fallback", true, Some(json!({"reason": "test"})));
        assert!(store.is_enabled("cli-fallback"));
        store.set("cli-fallback", false, None);
        assert!(!store.is_enabled("cli-fallback"));
        assert_eq!(store.len(), 1);
        assert!(store.get("cli-fallback").unwrap().context.is_none());
    }
}
