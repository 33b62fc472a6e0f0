//! Name → handler call table with schema validation in front of every call.
//!
//! The agent loop uses this to:
//! 1. Get tool definitions to send to the model
//! 2. Validate and execute tool calls the model requests

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use serde_json::{Map, Value};
use toolwright_core::error::ToolError;
use toolwright_core::tool::{Manifest, ToolCallRequest, ToolDefinition, ToolHandler};
use toolwright_schema::Validator;
use tracing::{debug, info, warn};

struct Entry {
    validator: Validator,
    handler: Arc<dyn ToolHandler>,
}

/// Immutable dispatcher built once at startup.
pub struct Dispatcher {
    manifest: Manifest,
    entries: HashMap<String, Entry>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("namespace", &self.manifest.namespace)
            .field("version", &self.manifest.version)
            .field("tool_count", &self.entries.len())
            .finish()
    }
}

/// Collects handlers before [`DispatcherBuilder::build`] checks coverage.
pub struct DispatcherBuilder {
    manifest: Manifest,
    handlers: Vec<(String, Arc<dyn ToolHandler>)>,
}

impl Dispatcher {
    pub fn builder(manifest: Manifest) -> DispatcherBuilder {
        DispatcherBuilder {
            manifest,
            handlers: Vec::new(),
        }
    }

    pub fn list_tools(&self) -> &Manifest {
        &self.manifest
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Definitions exposed to the model. An empty allowlist exposes everything.
    pub fn definitions_for_model(&self, allowlist: &[String]) -> Vec<ToolDefinition> {
        self.manifest
            .tools
            .iter()
            .filter(|t| allowlist.is_empty() || allowlist.iter().any(|a| a == &t.name))
            .cloned()
            .collect()
    }

    /// Validate arguments and run the handler.
    pub async fn call_tool(&self, request: ToolCallRequest) -> Result<Value, ToolError> {
        let ToolCallRequest { name, arguments } = request;
        let entry = self
            .entries
            .get(&name)
            .ok_or_else(|| ToolError::UnknownTool(name.clone()))?;

        // Models sometimes send `null` for a tool without arguments.
        let arguments = match arguments {
            Value::Null => Value::Object(Map::new()),
            other => other,
        };

        let normalized = entry.validator.validate(&arguments).map_err(|issues| {
            let errors: Vec<String> = issues.iter().map(ToString::to_string).collect();
            debug!(tool = %name, ?errors, "Tool arguments rejected");
            ToolError::Validation {
                tool_name: name.clone(),
                errors,
            }
        })?;

        let started = Instant::now();
        let result = entry.handler.call(normalized).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &result {
            Ok(_) => info!(tool = %name, elapsed_ms, "Tool call finished"),
            Err(e) => warn!(tool = %name, elapsed_ms, error = %e, "Tool call failed"),
        }
        result
    }
}

impl DispatcherBuilder {
    /// Register the handler for one manifest entry.
    pub fn handler(mut self, name: impl Into<String>, handler: impl ToolHandler + 'static) -> Self {
        self.handlers.push((name.into(), Arc::new(handler)));
        self
    }

    /// Append another family's definitions; their handlers still have to be
    /// registered before [`build`](Self::build).
    pub fn include(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.manifest.tools.extend(tools);
        self
    }

    /// Compile every validator and check manifest/handler coverage.
    pub fn build(self) -> Result<Dispatcher, ToolError> {
        let mut seen = HashSet::new();
        for tool in &self.manifest.tools {
            if !seen.insert(tool.name.as_str()) {
                return Err(ToolError::Configuration(format!(
                    "duplicate tool in manifest: {}",
                    tool.name
                )));
            }
        }

        let mut handlers: HashMap<String, Arc<dyn ToolHandler>> = HashMap::new();
        for (name, handler) in self.handlers {
            if !seen.contains(name.as_str()) {
                return Err(ToolError::Configuration(format!(
                    "handler registered for unknown tool: {name}"
                )));
            }
            if handlers.insert(name.clone(), handler).is_some() {
                return Err(ToolError::Configuration(format!(
                    "duplicate handler for tool: {name}"
                )));
            }
        }

        let mut entries = HashMap::with_capacity(self.manifest.tools.len());
        for tool in &self.manifest.tools {
            let handler = handlers.remove(&tool.name).ok_or_else(|| {
                let name = &tool.name;
                ToolError::Configuration(format!("missing handler implementation for {name}"))
            })?;
            let validator = toolwright_schema::compile(&tool.input_schema)
                .map_err(|e| ToolError::Configuration(format!("{}: {e}", tool.name)))?;
            entries.insert(tool.name.clone(), Entry { validator, handler });
        }

        debug!(
            namespace = %self.manifest.namespace,
            tools = entries.len(),
            "Dispatcher built"
        );
        Ok(Dispatcher {
            manifest: self.manifest,
            entries,
        })
    }
}
