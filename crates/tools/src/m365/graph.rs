//! Access to the remote mail, calendar, drive and workbook API.
//!
//! Handlers build [`GraphRequest`]s and hand them to a [`GraphBackend`].
//! [`GraphClient`] is the reqwest implementation; tests substitute a
//! recording backend.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Method;
use serde_json::Value;
use toolwright_core::error::{ToolError, UpstreamError};
use toolwright_security::{ScopeSet, TokenManager, redact_text};
use tracing::debug;

/// Default Graph endpoint.
pub const DEFAULT_GRAPH_BASE_URL: &str = "https://graph.microsoft.com/v1.0";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
const ERROR_BODY_LIMIT: usize = 600;

/// Request body variants.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum GraphBody {
    #[default]
    Empty,
    Json(Value),
    Bytes(Vec<u8>),
}

/// One call against the Graph API, relative to the backend's base URL.
#[derive(Debug, Clone, PartialEq)]
pub struct GraphRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub prefer: Vec<String>,
    pub body: GraphBody,
    pub scopes: ScopeSet,
}

impl GraphRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            headers: Vec::new(),
            prefer: Vec::new(),
            body: GraphBody::Empty,
            scopes: ScopeSet::default(),
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn prefer(mut self, value: impl Into<String>) -> Self {
        self.prefer.push(value.into());
        self
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = GraphBody::Json(body);
        self
    }

    pub fn bytes(mut self, body: Vec<u8>) -> Self {
        self.body = GraphBody::Bytes(body);
        self
    }

    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Executes Graph requests. Returns the parsed JSON body, `Null` when empty.
#[async_trait]
pub trait GraphBackend: Send + Sync {
    async fn send(&self, request: GraphRequest) -> Result<Value, ToolError>;
}

/// reqwest-backed [`GraphBackend`] authenticating through the [`TokenManager`].
pub struct GraphClient {
    client: reqwest::Client,
    base_url: String,
    tokens: Arc<TokenManager>,
}

impl std::fmt::Debug for GraphClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphClient")
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl GraphClient {
    pub fn new(base_url: impl Into<String>, tokens: Arc<TokenManager>) -> Result<Self, ToolError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ToolError::Configuration(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            tokens,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url_for(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else if path.starts_with('/') {
            format!("{}{path}", self.base_url)
        } else {
            format!("{}/{path}", self.base_url)
        }
    }
}

#[async_trait]
impl GraphBackend for GraphClient {
    async fn send(&self, request: GraphRequest) -> Result<Value, ToolError> {
        let token = self.tokens.get_token(&request.scopes).await?;
        let url = self.url_for(&request.path);
        let method = request.method.to_string();

        let mut builder = self
            .client
            .request(request.method.clone(), &url)
            .bearer_auth(token)
            .header("Accept", "application/json");
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if !request.prefer.is_empty() {
            builder = builder.header("Prefer", request.prefer.join(", "));
        }
        builder = match request.body {
            GraphBody::Empty => builder,
            GraphBody::Json(body) => builder.json(&body),
            GraphBody::Bytes(bytes) => builder
                .header("Content-Type", "application/octet-stream")
                .body(bytes),
        };

        debug!(method = %method, path = %request.path, "Graph request");
        let response = builder.send().await.map_err(|e| {
            UpstreamError::new(&method, &request.path, None, redact_text(&e.to_string()))
                .with_source(e)
        })?;

        let status = response.status();
        let path = response.url().path().to_string();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message: String = redact_text(text.trim()).chars().take(ERROR_BODY_LIMIT).collect();
            return Err(UpstreamError::new(method, path, Some(status.as_u16()), message).into());
        }

        let bytes = response.bytes().await.map_err(|e| {
            let message = "failed to read response body";
            UpstreamError::new(&method, &path, Some(status.as_u16()), message).with_source(e)
        })?;
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Value::Null);
        }
        serde_json::from_slice(&bytes).map_err(|e| {
            UpstreamError::new(&method, &path, Some(status.as_u16()), "response is not valid JSON")
                .with_source(e)
                .into()
        })
    }
}
