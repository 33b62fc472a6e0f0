//! Tool contract: definitions, call requests and the handler trait.
//!
//! A tool is described declaratively by a [`ToolDefinition`] (name, schemas,
//! metadata) and executed by a [`ToolHandler`]. The two are paired up by the
//! dispatcher in `toolwright-tools`; nothing here knows about any concrete tool.

use std::future::Future;
use std::marker::PhantomData;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ToolError;
use crate::provider::ToolSchema;

/// A tool call as requested by the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique call ID (matches the LLM's tool_call.id)
    pub id: String,

    /// Name of the tool to execute
    pub name: String,

    /// Arguments as a JSON value
    pub arguments: Value,
}

/// A name plus raw arguments, before validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

impl ToolCallRequest {
    pub fn new(name: impl Into<String>, arguments: Value) -> Self {
        Self {
            name: name.into(),
            arguments,
        }
    }
}

impl From<&ToolCall> for ToolCallRequest {
    fn from(call: &ToolCall) -> Self {
        Self::new(call.name.clone(), call.arguments.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolMetadata {
    pub category: String,
    pub deterministic: bool,
    #[serde(default)]
    pub scopes: Vec<String>,
    pub resource: String,
}

/// One manifest entry. Immutable once the manifest is built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDefinition {
    /// Dotted name, e.g. `mail.message.fetch`
    pub name: String,
    pub description: String,
    pub input_schema: Value,
    pub output_schema: Value,
    pub metadata: ToolMetadata,
}

impl ToolDefinition {
    /// The model-facing view of this tool.
    pub fn to_schema(&self) -> ToolSchema {
        ToolSchema {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: self.input_schema.clone(),
        }
    }
}

/// Versioned catalogue of tools, in declaration order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub namespace: String,
    pub version: String,
    pub tools: Vec<ToolDefinition>,
}

impl Manifest {
    pub fn get(&self, name: &str) -> Option<&ToolDefinition> {
        self.tools.iter().find(|t| t.name == name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tools.iter().map(|t| t.name.as_str())
    }
}

/// Executes one tool against already-validated arguments.
///
/// Returns a small summary object, never the raw upstream payload.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, arguments: Value) -> std::result::Result<Value, ToolError>;
}

/// Adapts an async closure into a [`ToolHandler`].
pub struct HandlerFn<F, Fut> {
    f: F,
    _fut: PhantomData<fn() -> Fut>,
}

/// Wrap `f` so it can be registered as a handler.
pub fn handler_fn<F, Fut>(f: F) -> HandlerFn<F, Fut>
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = std::result::Result<Value, ToolError>> + Send,
{
    HandlerFn { f, _fut: PhantomData }
}

#[async_trait]
impl<F, Fut> ToolHandler for HandlerFn<F, Fut>
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = std::result::Result<Value, ToolError>> + Send,
{
    async fn call(&self, arguments: Value) -> std::result::Result<Value, ToolError> {
        (self.f)(arguments).await
    }
}
