//! # Toolwright Schema
//!
//! Compiles the JSON-Schema subset used by tool manifests into a [`Validator`].
//!
//! Supported keywords: `type` (scalar or union array), `enum`, `format:
//! date-time`, `minimum`/`maximum`, `items`, `minItems`/`maxItems`,
//! `properties`, `required`, `default`, `nullable` and `additionalProperties`.
//! A malformed node is rejected by [`compile`], so a bad manifest fails at
//! startup rather than on the first call.
//!
//! Validation normalizes as it checks: absent properties with a `default`
//! receive it, and unknown object keys are kept, rejected or dropped
//! according to `additionalProperties` (true, false, or absent).

mod node;
mod validate;

use serde_json::Value;
use thiserror::Error;

use node::{Node, compile_node};
use validate::Checker;

/// A schema node could not be compiled.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("invalid schema at {path}: {message}")]
pub struct SchemaError {
    pub path: String,
    pub message: String,
}

impl SchemaError {
    pub(crate) fn new(path: &str, message: impl Into<String>) -> Self {
        Self {
            path: path.to_string(),
            message: message.into(),
        }
    }
}

/// One reason a value failed validation, with its JSON path (`$.a.b[0]`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    pub path: String,
    pub message: String,
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// A compiled, immutable validator.
#[derive(Debug, Clone, PartialEq)]
pub struct Validator {
    root: Node,
}

/// Compile `schema` into a validator.
pub fn compile(schema: &Value) -> Result<Validator, SchemaError> {
    Ok(Validator { root: compile_node(schema, "$")? })
}

impl Validator {
    /// Validate `value`, returning the normalized copy or every issue found.
    pub fn validate(&self, value: &Value) -> Result<Value, Vec<ValidationIssue>> {
        let mut checker = Checker::new();
        let normalized = checker.check(&self.root, value, "$");
        if checker.issues.is_empty() {
            Ok(normalized)
        } else {
            Err(checker.issues)
        }
    }

    pub fn is_valid(&self, value: &Value) -> bool {
        self.validate(value).is_ok()
    }
}
