//! Compiled schema tree and the recursive-descent compiler that builds it.

use std::collections::BTreeSet;

use serde_json::{Map, Value};

use crate::SchemaError;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Node {
    Any,
    String { date_time: bool },
    Number {
        integer: bool,
        minimum: Option<f64>,
        maximum: Option<f64>,
    },
    Boolean,
    Null,
    Array {
        items: Box<Node>,
        min_items: Option<usize>,
        max_items: Option<usize>,
    },
    Object {
        properties: Vec<Property>,
        additional: Additional,
    },
    StringSet(BTreeSet<String>),
    Literals(Vec<Value>),
    Union(Vec<Node>),
    /// Applies a fallback when the value is absent.
    Defaulted {
        inner: Box<Node>,
        default: Value,
    },
    Nullable(Box<Node>),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Property {
    pub name: String,
    pub node: Node,
    pub required: bool,
}

/// What happens to object keys not listed under `properties`.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Additional {
    /// `additionalProperties: true`
    PassThrough,
    /// `additionalProperties: false`
    Reject,
    /// No `additionalProperties` keyword.
    Strip,
    /// `additionalProperties: {schema}`
    Schema(Box<Node>),
}

pub(crate) fn compile_node(schema: &Value, path: &str) -> Result<Node, SchemaError> {
    let obj = schema
        .as_object()
        .ok_or_else(|| SchemaError::new(path, "schema node must be an object"))?;

    if let Some(values) = obj.get("enum") {
        let node = compile_enum(values, path)?;
        return Ok(wrap_common(node, obj));
    }

    match obj.get("type") {
        Some(Value::Array(variants)) => {
            if variants.is_empty() {
                return Err(SchemaError::new(path, "type list must not be empty"));
            }
            let mut nodes = Vec::with_capacity(variants.len());
            for variant in variants {
                let name = variant
                    .as_str()
                    .ok_or_else(|| SchemaError::new(path, "type list entries must be strings"))?;
                nodes.push(compile_typed(name, obj, path)?);
            }
            Ok(wrap_common(Node::Union(nodes), obj))
        }
        Some(Value::String(name)) => {
            let node = compile_typed(name, obj, path)?;
            Ok(wrap_common(node, obj))
        }
        Some(_) => Err(SchemaError::new(path, "type must be a string or an array of strings")),
        None => Ok(wrap_common(Node::Any, obj)),
    }
}

fn compile_enum(values: &Value, path: &str) -> Result<Node, SchemaError> {
    let values = match values.as_array() {
        Some(v) if !v.is_empty() => v,
        _ => return Err(SchemaError::new(path, "enum must be a non-empty array")),
    };
    if values.iter().all(Value::is_string) {
        let set = values.iter().filter_map(|v| v.as_str().map(str::to_string)).collect();
        Ok(Node::StringSet(set))
    } else {
        Ok(Node::Literals(values.clone()))
    }
}

fn compile_typed(name: &str, obj: &Map<String, Value>, path: &str) -> Result<Node, SchemaError> {
    match name {
        "string" => Ok(Node::String {
            date_time: obj.get("format").and_then(Value::as_str) == Some("date-time"),
        }),
        "number" | "integer" => Ok(Node::Number {
            integer: name == "integer",
            minimum: number_keyword(obj, "minimum", path)?,
            maximum: number_keyword(obj, "maximum", path)?,
        }),
        "boolean" => Ok(Node::Boolean),
        "null" => Ok(Node::Null),
        "array" => {
            let items = match obj.get("items") {
                Some(items) => compile_node(items, &format!("{path}.items"))?,
                None => Node::Any,
            };
            Ok(Node::Array {
                items: Box::new(items),
                min_items: count_keyword(obj, "minItems", path)?,
                max_items: count_keyword(obj, "maxItems", path)?,
            })
        }
        "object" => compile_object(obj, path),
        other => Err(SchemaError::new(path, format!("unsupported type '{other}'"))),
    }
}

fn compile_object(obj: &Map<String, Value>, path: &str) -> Result<Node, SchemaError> {
    let required: BTreeSet<&str> = match obj.get("required") {
        None => BTreeSet::new(),
        Some(Value::Array(names)) => names
            .iter()
            .map(|n| {
                n.as_str()
                    .ok_or_else(|| SchemaError::new(path, "required entries must be strings"))
            })
            .collect::<Result<_, _>>()?,
        Some(_) => return Err(SchemaError::new(path, "required must be an array")),
    };

    let mut properties = Vec::new();
    match obj.get("properties") {
        None => {}
        Some(Value::Object(props)) => {
            for (name, schema) in props {
                properties.push(Property {
                    name: name.clone(),
                    node: compile_node(schema, &format!("{path}.{name}"))?,
                    required: required.contains(name.as_str()),
                });
            }
        }
        Some(_) => return Err(SchemaError::new(path, "properties must be an object")),
    }

    let additional = match obj.get("additionalProperties") {
        None => Additional::Strip,
        Some(Value::Bool(true)) => Additional::PassThrough,
        Some(Value::Bool(false)) => Additional::Reject,
        Some(schema @ Value::Object(_)) => {
            Additional::Schema(Box::new(compile_node(schema, &format!("{path}.*"))?))
        }
        Some(_) => {
            return Err(SchemaError::new(
                path,
                "additionalProperties must be a boolean or a schema",
            ));
        }
    };

    Ok(Node::Object {
        properties,
        additional,
    })
}

fn wrap_common(mut node: Node, obj: &Map<String, Value>) -> Node {
    if let Some(default) = obj.get("default") {
        node = Node::Defaulted {
            inner: Box::new(node),
            default: default.clone(),
        };
    }
    if obj.get("nullable").and_then(Value::as_bool) == Some(true) {
        node = Node::Nullable(Box::new(node));
    }
    node
}

fn number_keyword(
    obj: &Map<String, Value>,
    key: &str,
    path: &str,
) -> Result<Option<f64>, SchemaError> {
    match obj.get(key) {
        None => Ok(None),
        Some(v) => v
            .as_f64()
            .map(Some)
            .ok_or_else(|| SchemaError::new(path, format!("{key} must be a number"))),
    }
}

fn count_keyword(
    obj: &Map<String, Value>,
    key: &str,
    path: &str,
) -> Result<Option<usize>, SchemaError> {
    match obj.get(key) {
        None => Ok(None),
        Some(v) => v
            .as_u64()
            .map(|n| Some(n as usize))
            .ok_or_else(|| SchemaError::new(path, format!("{key} must be a non-negative integer"))),
    }
}
