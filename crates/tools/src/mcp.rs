//! A small Model Context Protocol client over stdio.
//!
//! Messages are newline-delimited JSON-RPC 2.0. One background task owns the
//! read half and completes pending requests by id; callers only ever write.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;
use toolwright_core::content::flatten_value;
use toolwright_core::error::{ToolError, UpstreamError};
use toolwright_security::redact_text;
use tracing::{debug, info, trace, warn};

pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// Runs tools hosted by another process.
#[async_trait]
pub trait RemoteTools: Send + Sync {
    /// Call `name` and return the raw `tools/call` result.
    async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value, ToolError>;
}

/// Plain text of a `tools/call` result: its `content` parts joined, or the
/// whole result as JSON when they carry no text.
pub fn result_text(result: &Value) -> String {
    let text = result.get("content").map(flatten_value).unwrap_or_default();
    if text.trim().is_empty() {
        serde_json::to_string(result).unwrap_or_default()
    } else {
        text
    }
}

#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<u64>,
    method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

type Pending = Arc<StdMutex<HashMap<u64, oneshot::Sender<RpcResponse>>>>;
type Writer = Box<dyn AsyncWrite + Send + Unpin>;

/// A connected MCP server.
pub struct McpClient {
    name: String,
    writer: Mutex<Writer>,
    pending: Pending,
    next_id: AtomicU64,
    timeout: Duration,
    reader: JoinHandle<()>,
    child: Option<Child>,
}

impl std::fmt::Debug for McpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpClient")
            .field("name", &self.name)
            .field("timeout", &self.timeout)
            .field("pid", &self.child.as_ref().and_then(Child::id))
            .finish()
    }
}

impl McpClient {
    /// Start `command_line` (program and whitespace-separated arguments) and
    /// complete the `initialize` handshake. The child is killed on drop.
    pub async fn spawn(
        name: impl Into<String>,
        command_line: &str,
        env: &[(&str, String)],
        timeout: Duration,
    ) -> Result<Self, ToolError> {
        let name = name.into();
        let mut parts = command_line.split_whitespace();
        let program = parts
            .next()
            .ok_or_else(|| ToolError::Configuration(format!("{name}: empty MCP server command")))?;

        let mut command = Command::new(program);
        command
            .args(parts)
            .envs(env.iter().map(|(k, v)| (*k, v.as_str())))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|e| {
            ToolError::Configuration(format!("{name}: failed to start '{program}': {e}"))
        })?;
        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            return Err(ToolError::Configuration(format!(
                "{name}: MCP server stdio not captured"
            )));
        };
        debug!(server = %name, program, pid = ?child.id(), "MCP server started");

        let mut client = Self::connect(name, stdout, stdin, timeout).await?;
        client.child = Some(child);
        Ok(client)
    }

    /// Talk to a server over an existing byte stream pair.
    pub async fn connect<R, W>(
        name: impl Into<String>,
        reader: R,
        writer: W,
        timeout: Duration,
    ) -> Result<Self, ToolError>
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let name = name.into();
        let pending: Pending = Arc::default();
        let reader = tokio::spawn(read_loop(
            name.clone(),
            BufReader::new(reader),
            Arc::clone(&pending),
        ));

        let client = Self {
            name,
            writer: Mutex::new(Box::new(writer)),
            pending,
            next_id: AtomicU64::new(1),
            timeout,
            reader,
            child: None,
        };
        client.initialize().await?;
        Ok(client)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    async fn initialize(&self) -> Result<(), ToolError> {
        let result = self
            .request(
                "initialize",
                json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": {},
                    "clientInfo": {
                        "name": format!("toolwright-{}", self.name),
                        "version": env!("CARGO_PKG_VERSION")
                    },
                }),
            )
            .await?;

        info!(
            server = %self.name,
            remote = result
                .pointer("/serverInfo/name")
                .and_then(serde_json::Value::as_str)
                .unwrap_or("unknown"),
            protocol = result
                .get("protocolVersion")
                .and_then(serde_json::Value::as_str)
                .unwrap_or(PROTOCOL_VERSION),
            "MCP server connected"
        );
        self.send(&RpcRequest {
            jsonrpc: "2.0",
            id: None,
            method: "notifications/initialized",
            params: None,
        })
        .await
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value, ToolError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        lock(&self.pending).insert(id, tx);

        let sent = self
            .send(&RpcRequest {
                jsonrpc: "2.0",
                id: Some(id),
                method,
                params: Some(params),
            })
            .await;
        if let Err(e) = sent {
            lock(&self.pending).remove(&id);
            return Err(e);
        }

        let response = match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => return Err(self.failure(method, "server closed the connection")),
            Err(_) => {
                lock(&self.pending).remove(&id);
                let ms = self.timeout.as_millis();
                return Err(self.failure(method, format!("no response within {ms}ms")));
            }
        };

        match response.error {
            Some(err) => Err(self.failure(
                method,
                format!("{} (code {})", redact_text(&err.message), err.code),
            )),
            None => Ok(response.result.unwrap_or(Value::Null)),
        }
    }

    async fn send(&self, message: &RpcRequest<'_>) -> Result<(), ToolError> {
        let mut line = serde_json::to_string(message)
            .map_err(|e| self.failure(message.method, format!("encode failed: {e}")))?;
        line.push('\n');

        let mut writer = self.writer.lock().await;
        let written = async {
            writer.write_all(line.as_bytes()).await?;
            writer.flush().await
        }
        .await;
        written.map_err(|e| {
            let path = format!("{}/{}", self.name, message.method);
            ToolError::Upstream(
                UpstreamError::new("MCP", path, None, "write failed").with_source(e),
            )
        })
    }

    fn failure(&self, method: &str, message: impl Into<String>) -> ToolError {
        ToolError::Upstream(UpstreamError::new(
            "MCP",
            format!("{}/{method}", self.name),
            None,
            message,
        ))
    }
}

#[async_trait]
impl RemoteTools for McpClient {
    async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value, ToolError> {
        let result = self
            .request("tools/call", json!({"name": name, "arguments": arguments}))
            .await?;
        if result.get("isError").and_then(Value::as_bool) == Some(true) {
            return Err(ToolError::ExecutionFailed {
                tool_name: name.to_string(),
                reason: redact_text(&result_text(&result)),
            });
        }
        Ok(result)
    }
}

impl Drop for McpClient {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

async fn read_loop<R: AsyncRead + Unpin>(name: String, reader: BufReader<R>, pending: Pending) {
    let mut lines = reader.lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                info!(server = %name, "MCP server closed its output");
                break;
            }
            Err(e) => {
                warn!(server = %name, error = %e, "MCP read failed");
                break;
            }
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        trace!(server = %name, "MCP received: {}", redact_text(line));

        let message: Value = match serde_json::from_str(line) {
            Ok(v) => v,
            Err(e) => {
                // Servers may log to stdout; skip anything that is not JSON.
                debug!(server = %name, error = %e, "MCP line is not JSON-RPC");
                continue;
            }
        };
        if message.get("method").is_some() {
            debug!(server = %name, method = ?message["method"], "MCP server message ignored");
            continue;
        }
        let Some(id) = message.get("id").and_then(Value::as_u64) else {
            continue;
        };
        let response: RpcResponse = match serde_json::from_value(message) {
            Ok(r) => r,
            Err(e) => {
                warn!(server = %name, id, error = %e, "MCP response malformed");
                continue;
            }
        };
        match lock(&pending).remove(&id) {
            Some(tx) => {
                let _ = tx.send(response);
            }
            None => debug!(server = %name, id, "MCP response without a waiting caller"),
        }
    }
    // Dropping the senders fails every waiting call.
    lock(&pending).clear();
}

fn lock<T>(mutex: &StdMutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
