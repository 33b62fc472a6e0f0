//! The PostgreSQL toolset: SQL execution, catalogue browsing and performance
//! analysis, proxied to an MCP database server.
//!
//! Model-facing arguments are camelCase like every other manifest; the
//! server expects snake_case, so each tool maps its fields explicitly.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use toolwright_core::error::ToolError;
use toolwright_core::tool::{Manifest, ToolHandler};
use tracing::debug;

use crate::dispatcher::{Dispatcher, DispatcherBuilder};
use crate::manifest::postgres_manifest;
use crate::mcp::{RemoteTools, result_text};
use crate::summarize::cap;

/// Longest server output handed back, in characters.
pub const MAX_RESULT_CHARS: usize = 3_000;

/// Which remote tool a [`PostgresTool`] proxies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostgresOp {
    ExecuteSql,
    ListSchemas,
    ListObjects,
    ObjectDetails,
    ExplainQuery,
    TopQueries,
    DbHealth,
    WorkloadIndexes,
    QueryIndexes,
}

impl PostgresOp {
    pub const ALL: [PostgresOp; 9] = [
        Self::ExecuteSql,
        Self::ListSchemas,
        Self::ListObjects,
        Self::ObjectDetails,
        Self::ExplainQuery,
        Self::TopQueries,
        Self::DbHealth,
        Self::WorkloadIndexes,
        Self::QueryIndexes,
    ];

    pub fn tool_name(self) -> &'static str {
        match self {
            Self::ExecuteSql => "postgres.sql.execute",
            Self::ListSchemas => "postgres.schemas.list",
            Self::ListObjects => "postgres.objects.list",
            Self::ObjectDetails => "postgres.object.details",
            Self::ExplainQuery => "postgres.query.explain",
            Self::TopQueries => "postgres.queries.top",
            Self::DbHealth => "postgres.health.analyze",
            Self::WorkloadIndexes => "postgres.indexes.workload",
            Self::QueryIndexes => "postgres.indexes.queries",
        }
    }

    /// Name of the tool on the MCP server.
    pub fn remote_name(self) -> &'static str {
        match self {
            Self::ExecuteSql => "execute_sql",
            Self::ListSchemas => "list_schemas",
            Self::ListObjects => "list_objects",
            Self::ObjectDetails => "get_object_details",
            Self::ExplainQuery => "explain_query",
            Self::TopQueries => "get_top_queries",
            Self::DbHealth => "analyze_db_health",
            Self::WorkloadIndexes => "analyze_workload_indexes",
            Self::QueryIndexes => "analyze_query_indexes",
        }
    }

    pub fn from_tool_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.tool_name() == name)
    }

    /// `(ours, theirs)` argument names.
    fn fields(self) -> &'static [(&'static str, &'static str)] {
        match self {
            Self::ExecuteSql => &[("sql", "sql")],
            Self::ListSchemas => &[],
            Self::ListObjects => &[("schemaName", "schema_name"), ("objectType", "object_type")],
            Self::ObjectDetails => &[
                ("schemaName", "schema_name"),
                ("objectName", "object_name"),
                ("objectType", "object_type"),
            ],
            Self::ExplainQuery => &[
                ("sql", "sql"),
                ("analyze", "analyze"),
                ("hypotheticalIndexes", "hypothetical_indexes"),
            ],
            Self::TopQueries => &[("sortBy", "sort_by"), ("limit", "limit")],
            Self::DbHealth => &[("healthType", "health_type")],
            Self::WorkloadIndexes => {
                &[("maxIndexSizeMb", "max_index_size_mb"), ("method", "method")]
            }
            Self::QueryIndexes => &[
                ("queries", "queries"),
                ("maxIndexSizeMb", "max_index_size_mb"),
                ("method", "method"),
            ],
        }
    }
}

/// A [`ToolHandler`] forwarding one `postgres` tool to the server.
#[derive(Clone)]
pub struct PostgresTool {
    op: PostgresOp,
    client: Arc<dyn RemoteTools>,
}

impl std::fmt::Debug for PostgresTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresTool").field("op", &self.op).finish()
    }
}

impl PostgresTool {
    pub fn new(op: PostgresOp, client: Arc<dyn RemoteTools>) -> Self {
        Self { op, client }
    }
}

#[async_trait]
impl ToolHandler for PostgresTool {
    async fn call(&self, arguments: Value) -> Result<Value, ToolError> {
        let remote = self.op.remote_name();
        let remote_args = remote_arguments(self.op, &arguments)?;
        let result = self.client.call_tool(remote, remote_args).await?;

        let raw = result_text(&result);
        let raw = raw.trim();
        let raw_chars = raw.chars().count();
        let truncated = raw_chars > MAX_RESULT_CHARS;
        let text = cap(raw, MAX_RESULT_CHARS);
        debug!(tool = remote, raw_chars, truncated, "Database tool output");
        Ok(json!({"text": text, "truncated": truncated}))
    }
}

/// Rename validated arguments to the server's names and reject blank SQL.
fn remote_arguments(op: PostgresOp, arguments: &Value) -> Result<Value, ToolError> {
    let mut out = Map::new();
    for (ours, theirs) in op.fields() {
        if let Some(value) = arguments.get(*ours) {
            out.insert((*theirs).to_string(), value.clone());
        }
    }

    let blank = |path: String| ToolError::Validation {
        tool_name: op.tool_name().to_string(),
        errors: vec![format!("{path}: must not be blank")],
    };
    if let Some(Value::String(sql)) = out.get_mut("sql") {
        if sql.trim().is_empty() {
            return Err(blank("$.sql".into()));
        }
        *sql = sql.trim().to_string();
    }
    if let Some(Value::Array(queries)) = out.get_mut("queries") {
        for (i, query) in queries.iter_mut().enumerate() {
            match query.as_str().map(str::trim) {
                Some(q) if !q.is_empty() => *query = Value::String(q.to_string()),
                _ => return Err(blank(format!("$.queries[{i}]"))),
            }
        }
    }
    Ok(Value::Object(out))
}

/// Add the `enabled` postgres tools to `builder`, bound to `client`.
///
/// Unknown names fail: a typo would otherwise silently drop a tool.
pub fn register(
    builder: DispatcherBuilder,
    client: Arc<dyn RemoteTools>,
    enabled: &[String],
) -> Result<DispatcherBuilder, ToolError> {
    let mut ops = Vec::new();
    for name in enabled {
        let op = PostgresOp::from_tool_name(name)
            .ok_or_else(|| ToolError::Configuration(format!("unknown postgres tool: {name}")))?;
        if !ops.contains(&op) {
            ops.push(op);
        }
    }

    let manifest = postgres_manifest();
    let tools = manifest
        .tools
        .into_iter()
        .filter(|t| ops.iter().any(|op| op.tool_name() == t.name))
        .collect();

    Ok(ops.into_iter().fold(builder.include(tools), |builder, op| {
        builder.handler(op.tool_name(), PostgresTool::new(op, Arc::clone(&client)))
    }))
}

/// A dispatcher with only the `enabled` postgres tools.
pub fn dispatcher(
    client: Arc<dyn RemoteTools>,
    enabled: &[String],
) -> Result<Dispatcher, ToolError> {
    let empty = Manifest {
        tools: Vec::new(),
        ..postgres_manifest()
    };
    register(Dispatcher::builder(empty), client, enabled)?.build()
}
