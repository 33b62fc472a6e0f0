//! Message content.
//!
//! Model backends hand content back in several shapes: a bare string, a list
//! of typed parts, or an object carrying a text-ish field. [`Content`] names
//! those shapes and [`Content::flatten`] is the single place that turns any of
//! them into plain text.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Object fields consulted, in order, when flattening structured content.
const TEXT_FIELDS: [&str; 3] = ["text", "output_text", "value"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Content {
    Plain(String),
    Parts(Vec<ContentPart>),
    Structured(Value),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ContentPart {
    Text { text: String },
    Other(Value),
}

impl Content {
    /// Plain text view of this content.
    pub fn flatten(&self) -> String {
        match self {
            Self::Plain(s) => s.clone(),
            Self::Parts(parts) => parts.iter().map(ContentPart::flatten).collect(),
            Self::Structured(value) => flatten_value(value),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.flatten().is_empty()
    }

    /// Borrow the text without allocating when the content is already plain.
    pub fn as_plain(&self) -> Option<&str> {
        match self {
            Self::Plain(s) => Some(s),
            _ => None,
        }
    }
}

impl ContentPart {
    pub fn flatten(&self) -> String {
        match self {
            Self::Text { text } => text.clone(),
            Self::Other(value) => flatten_value(value),
        }
    }
}

/// Flatten an arbitrary JSON value the same way [`Content::flatten`] does.
///
/// Strings are returned as-is, arrays are concatenated, and objects yield the
/// first of `text`, `output_text`, `value` that is a string, falling back to a
/// `content` field (string or nested array). Anything else flattens to "".
pub fn flatten_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Array(items) => items.iter().map(flatten_value).collect(),
        Value::Object(map) => {
            for field in TEXT_FIELDS {
                if let Some(Value::String(s)) = map.get(field) {
                    return s.clone();
                }
            }
            match map.get("content") {
                Some(Value::String(s)) => s.clone(),
                Some(inner @ Value::Array(_)) => flatten_value(inner),
                _ => String::new(),
            }
        }
        _ => String::new(),
    }
}

impl Default for Content {
    fn default() -> Self {
        Self::Plain(String::new())
    }
}

impl From<String> for Content {
    fn from(s: String) -> Self {
        Self::Plain(s)
    }
}

impl From<&str> for Content {
    fn from(s: &str) -> Self {
        Self::Plain(s.to_string())
    }
}

impl From<Value> for Content {
    fn from(value: Value) -> Self {
        match value {
            Value::String(s) => Self::Plain(s),
            other => Self::Structured(other),
        }
    }
}

impl std::fmt::Display for Content {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.flatten())
    }
}
