//! Error types for the Toolwright domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant.

use thiserror::Error;

/// The top-level error type for all Toolwright operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Provider errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Tool errors ---
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    // --- Credential errors ---
    #[error("Credential error: {0}")]
    Credential(#[from] CredentialError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError {
        status_code: u16,
        message: String,
    },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),
}

impl ProviderError {
    /// HTTP status to surface to the client, if the failure carried one.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::ApiError { status_code, .. } => Some(*status_code),
            Self::RateLimited { .. } => Some(429),
            Self::AuthenticationFailed(_) => Some(401),
            _ => None,
        }
    }

    /// Stable machine-readable code for the error event.
    pub fn code(&self) -> &'static str {
        match self {
            Self::ApiError { .. } => "provider_api_error",
            Self::RateLimited { .. } => "rate_limited",
            Self::AuthenticationFailed(_) => "provider_auth_failed",
            Self::StreamInterrupted(_) => "stream_interrupted",
            Self::NotConfigured(_) => "provider_not_configured",
            Self::Timeout(_) => "provider_timeout",
            Self::Network(_) => "provider_network_error",
        }
    }
}

/// A failed call against a remote API made from inside a tool handler.
///
/// Keeps enough request context (method, path, status) to explain the failure
/// to the model and to the logs without leaking request headers.
#[derive(Debug, Error)]
#[error("Upstream request failed: {method} {path} -> {} {message}", status_label(.status))]
pub struct UpstreamError {
    pub method: String,
    pub path: String,
    pub status: Option<u16>,
    pub message: String,
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl UpstreamError {
    pub fn new(
        method: impl Into<String>,
        path: impl Into<String>,
        status: Option<u16>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            status,
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }
}

fn status_label(status: &Option<u16>) -> String {
    status.map_or_else(|| "no response".into(), |s| s.to_string())
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Invalid arguments for {tool_name}: {}", .errors.join("; "))]
    Validation {
        tool_name: String,
        errors: Vec<String>,
    },

    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    #[error(transparent)]
    Credential(#[from] CredentialError),

    #[error("Tool execution failed: {tool_name}: {reason}")]
    ExecutionFailed {
        tool_name: String,
        reason: String,
    },

    #[error("Tool configuration error: {0}")]
    Configuration(String),
}

/// Credential acquisition failures.
///
/// `Clone` because one refresh outcome is shared by every caller waiting on it.
#[derive(Debug, Clone, Error)]
pub enum CredentialError {
    #[error("No credential source available; missing: {}", .missing.join(", "))]
    NotConfigured { missing: Vec<String> },

    #[error("Token request failed: {status} {message}")]
    Exchange { status: u16, message: String },

    #[error("Credential CLI failed: {0}")]
    Cli(String),

    #[error("Credential source '{source_name}' timed out after {timeout_ms}ms")]
    Timeout {
        source_name: String,
        timeout_ms: u64,
    },

    #[error("Network error while acquiring token: {0}")]
    Network(String),
}

/// Walk an error's `source()` chain, outermost first, stopping after `max_depth` links.
pub fn causal_chain(err: &(dyn std::error::Error + 'static), max_depth: usize) -> Vec<String> {
    let mut chain = Vec::new();
    let mut current: Option<&(dyn std::error::Error + 'static)> = Some(err);
    while let Some(e) = current {
        if chain.len() >= max_depth {
            break;
        }
        chain.push(e.to_string());
        current = e.source();
    }
    chain
}
