//! Validation and normalization of argument values against a compiled tree.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde_json::{Map, Value};

use crate::ValidationIssue;
use crate::node::{Additional, Node, Property};

pub(crate) struct Checker {
    pub issues: Vec<ValidationIssue>,
}

impl Checker {
    pub fn new() -> Self {
        Self { issues: Vec::new() }
    }

    fn fail(&mut self, path: &str, message: impl Into<String>) -> Value {
        self.issues.push(ValidationIssue {
            path: path.to_string(),
            message: message.into(),
        });
        Value::Null
    }

    /// Check `value` against `node`, returning the normalized value.
    pub fn check(&mut self, node: &Node, value: &Value, path: &str) -> Value {
        match node {
            Node::Any => value.clone(),
            Node::Defaulted { inner, .. } => self.check(inner, value, path),
            Node::Nullable(inner) => {
                if value.is_null() {
                    Value::Null
                } else {
                    self.check(inner, value, path)
                }
            }
            Node::String { date_time } => match value {
                Value::String(s) => {
                    if *date_time && !is_date_time(s) {
                        return self.fail(path, "invalid date-time format");
                    }
                    value.clone()
                }
                other => self.fail(path, format!("expected string, got {}", type_name(other))),
            },
            Node::Number {
                integer,
                minimum,
                maximum,
            } => self.check_number(*integer, *minimum, *maximum, value, path),
            Node::Boolean => match value {
                Value::Bool(_) => value.clone(),
                other => self.fail(path, format!("expected boolean, got {}", type_name(other))),
            },
            Node::Null => match value {
                Value::Null => Value::Null,
                other => self.fail(path, format!("expected null, got {}", type_name(other))),
            },
            Node::StringSet(allowed) => match value.as_str() {
                Some(s) if allowed.contains(s) => value.clone(),
                _ => {
                    let options: Vec<&str> = allowed.iter().map(String::as_str).collect();
                    self.fail(path, format!("expected one of [{}]", options.join(", ")))
                }
            },
            Node::Literals(literals) => {
                if literals.contains(value) {
                    value.clone()
                } else {
                    let options: Vec<String> = literals.iter().map(Value::to_string).collect();
                    self.fail(path, format!("expected one of [{}]", options.join(", ")))
                }
            }
            Node::Union(branches) => {
                for branch in branches {
                    let mut attempt = Checker::new();
                    let normalized = attempt.check(branch, value, path);
                    if attempt.issues.is_empty() {
                        return normalized;
                    }
                }
                let names: Vec<&str> = branches.iter().map(describe).collect();
                self.fail(path, format!("expected {}, got {}", names.join(" | "), type_name(value)))
            }
            Node::Array {
                items,
                min_items,
                max_items,
            } => {
                let Value::Array(elements) = value else {
                    return self.fail(path, format!("expected array, got {}", type_name(value)));
                };
                if let Some(min) = min_items
                    && elements.len() < *min
                {
                    self.fail(path, format!("must contain at least {min} items"));
                }
                if let Some(max) = max_items
                    && elements.len() > *max
                {
                    self.fail(path, format!("must contain at most {max} items"));
                }
                let out = elements
                    .iter()
                    .enumerate()
                    .map(|(i, el)| self.check(items, el, &format!("{path}[{i}]")))
                    .collect();
                Value::Array(out)
            }
            Node::Object {
                properties,
                additional,
            } => {
                let Value::Object(input) = value else {
                    return self.fail(path, format!("expected object, got {}", type_name(value)));
                };
                self.check_object(properties, additional, input, path)
            }
        }
    }

    fn check_number(
        &mut self,
        integer: bool,
        minimum: Option<f64>,
        maximum: Option<f64>,
        value: &Value,
        path: &str,
    ) -> Value {
        let Some(n) = value.as_f64() else {
            let expected = if integer { "integer" } else { "number" };
            return self.fail(path, format!("expected {expected}, got {}", type_name(value)));
        };
        if let Some(min) = minimum
            && n < min
        {
            return self.fail(path, format!("must be >= {min}"));
        }
        if let Some(max) = maximum
            && n > max
        {
            return self.fail(path, format!("must be <= {max}"));
        }
        if integer {
            if value.is_i64() || value.is_u64() {
                return value.clone();
            }
            // 3.0 is accepted as 3
            if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
                return Value::from(n as i64);
            }
            return self.fail(path, "expected integer, got fractional number");
        }
        value.clone()
    }

    fn check_object(
        &mut self,
        properties: &[Property],
        additional: &Additional,
        input: &Map<String, Value>,
        path: &str,
    ) -> Value {
        let mut out = Map::new();
        for prop in properties {
            let prop_path = format!("{path}.{}", prop.name);
            match input.get(&prop.name) {
                // A null for an optional property that cannot hold null means "not given".
                Some(Value::Null) if !prop.required && !accepts_null(&prop.node) => {
                    if let Some(default) = default_of(&prop.node) {
                        out.insert(prop.name.clone(), default.clone());
                    }
                }
                Some(v) => {
                    let normalized = self.check(&prop.node, v, &prop_path);
                    out.insert(prop.name.clone(), normalized);
                }
                None => match default_of(&prop.node) {
                    Some(default) => {
                        out.insert(prop.name.clone(), default.clone());
                    }
                    None if prop.required => {
                        self.fail(&prop_path, "required");
                    }
                    None => {}
                },
            }
        }

        for (key, v) in input {
            if properties.iter().any(|p| &p.name == key) {
                continue;
            }
            match additional {
                Additional::PassThrough => {
                    out.insert(key.clone(), v.clone());
                }
                Additional::Reject => {
                    self.fail(&format!("{path}.{key}"), "unexpected property");
                }
                Additional::Strip => {}
                Additional::Schema(node) => {
                    let normalized = self.check(node, v, &format!("{path}.{key}"));
                    out.insert(key.clone(), normalized);
                }
            }
        }
        Value::Object(out)
    }
}

pub(crate) fn default_of(node: &Node) -> Option<&Value> {
    match node {
        Node::Defaulted { default, .. } => Some(default),
        Node::Nullable(inner) => default_of(inner),
        _ => None,
    }
}

fn accepts_null(node: &Node) -> bool {
    match node {
        Node::Any | Node::Null | Node::Nullable(_) => true,
        Node::Defaulted { inner, .. } => accepts_null(inner),
        Node::Union(branches) => branches.iter().any(accepts_null),
        Node::Literals(values) => values.contains(&Value::Null),
        _ => false,
    }
}

fn is_date_time(s: &str) -> bool {
    DateTime::parse_from_rfc3339(s).is_ok()
        || NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f").is_ok()
        || NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M").is_ok()
        || NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok()
}

fn describe(node: &Node) -> &'static str {
    match node {
        Node::Any => "any",
        Node::String { .. } | Node::StringSet(_) => "string",
        Node::Number { integer: true, .. } => "integer",
        Node::Number { .. } => "number",
        Node::Boolean => "boolean",
        Node::Null => "null",
        Node::Array { .. } => "array",
        Node::Object { .. } => "object",
        Node::Literals(_) => "literal",
        Node::Union(_) => "union",
        Node::Defaulted { inner, .. } | Node::Nullable(inner) => describe(inner),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
