//! Configuration loading, validation, and management for Toolwright.
//!
//! Loads configuration from `~/.toolwright/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.toolwright/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Model backend
    #[serde(default)]
    pub provider: ProviderConfig,

    /// Agent loop behaviour
    #[serde(default)]
    pub agent: AgentConfig,

    /// HTTP ingress
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// SSE framing
    #[serde(default)]
    pub sse: SseConfig,

    /// Conversation thread retention
    #[serde(default)]
    pub session: SessionConfig,

    /// Bearer-token acquisition for tool backends
    #[serde(default)]
    pub credentials: CredentialsConfig,

    /// Tool exposure
    #[serde(default)]
    pub tools: ToolsConfig,
}

fn default_true() -> bool {
    true
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default = "default_provider_name")]
    pub name: String,

    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Extra request headers (OpenRouter reads `HTTP-Referer` and `X-Title`)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
}

fn default_provider_name() -> String {
    "openrouter".into()
}
fn default_base_url() -> String {
    "https://openrouter.ai/api/v1".into()
}
fn default_model() -> String {
    "openai/gpt-4o-mini".into()
}
fn default_temperature() -> f32 {
    0.3
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            name: default_provider_name(),
            base_url: default_base_url(),
            api_key: None,
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: None,
            headers: BTreeMap::new(),
        }
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("name", &self.name)
            .field("base_url", &self.base_url)
            .field("api_key", &redact(&self.api_key))
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("headers", &self.headers)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Maximum reasoning ↔ tool-call cycles per turn
    #[serde(default = "default_recursion_limit")]
    pub recursion_limit: usize,

    /// Replaces the built-in system prompt body
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,

    /// Emit a `trace` event before `end`
    #[serde(default)]
    pub trace_enabled: bool,
}

fn default_recursion_limit() -> usize {
    15
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            recursion_limit: default_recursion_limit(),
            system_prompt: None,
            trace_enabled: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_host")]
    pub host: String,

    /// Maximum accepted request body, in bytes
    #[serde(default = "default_body_limit")]
    pub body_limit: usize,
}

fn default_port() -> u16 {
    9999
}
fn default_host() -> String {
    "127.0.0.1".into()
}
fn default_body_limit() -> usize {
    1024 * 1024
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            body_limit: default_body_limit(),
        }
    }
}

/// Smallest chunk size the SSE splitter accepts.
pub const MIN_SSE_CHUNK_SIZE: usize = 16;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SseConfig {
    /// Split long text deltas at sentence or word boundaries
    #[serde(default = "default_true")]
    pub split: bool,

    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
}

fn default_chunk_size() -> usize {
    80
}

impl Default for SseConfig {
    fn default() -> Self {
        Self {
            split: true,
            chunk_size: default_chunk_size(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Threads kept in memory before the least recently updated is evicted.
    /// 0 keeps every thread for the lifetime of the process.
    #[serde(default = "default_max_threads")]
    pub max_threads: usize,
}

fn default_max_threads() -> usize {
    1_000
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_threads: default_max_threads(),
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct CredentialsConfig {
    /// Pre-provisioned bearer token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,

    /// Scope used by the client-credentials exchange when a call names none
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_scope: Option<String>,

    /// OAuth authority host
    #[serde(default = "default_authority")]
    pub authority: String,

    /// Resource passed to the CLI delegate
    #[serde(default = "default_resource")]
    pub resource: String,

    #[serde(default = "default_cli_bin")]
    pub cli_bin: String,

    #[serde(default = "default_cli_timeout_ms")]
    pub cli_timeout_ms: u64,

    #[serde(default)]
    pub cli_disabled: bool,

    /// Seconds before `expires_at` at which a cached token stops being served
    #[serde(default = "default_safety_margin_secs")]
    pub safety_margin_secs: u64,
}

fn default_authority() -> String {
    "https://login.microsoftonline.com".into()
}
fn default_resource() -> String {
    "https://graph.microsoft.com".into()
}
fn default_cli_bin() -> String {
    "m365".into()
}
fn default_cli_timeout_ms() -> u64 {
    8_000
}
fn default_safety_margin_secs() -> u64 {
    60
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            access_token: None,
            tenant_id: None,
            client_id: None,
            client_secret: None,
            default_scope: None,
            authority: default_authority(),
            resource: default_resource(),
            cli_bin: default_cli_bin(),
            cli_timeout_ms: default_cli_timeout_ms(),
            cli_disabled: false,
            safety_margin_secs: default_safety_margin_secs(),
        }
    }
}

impl CredentialsConfig {
    /// Tenant, client id and secret are all present.
    pub fn has_client_credentials(&self) -> bool {
        self.tenant_id.is_some() && self.client_id.is_some() && self.client_secret.is_some()
    }
}

impl std::fmt::Debug for CredentialsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialsConfig")
            .field("access_token", &redact(&self.access_token))
            .field("tenant_id", &self.tenant_id)
            .field("client_id", &self.client_id)
            .field("client_secret", &redact(&self.client_secret))
            .field("default_scope", &self.default_scope)
            .field("authority", &self.authority)
            .field("resource", &self.resource)
            .field("cli_bin", &self.cli_bin)
            .field("cli_timeout_ms", &self.cli_timeout_ms)
            .field("cli_disabled", &self.cli_disabled)
            .field("safety_margin_secs", &self.safety_margin_secs)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Register the Microsoft 365 toolset
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Tool names advertised to the model. Empty = all.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowlist: Vec<String>,

    /// Base URL of the Graph API
    #[serde(default = "default_graph_base_url")]
    pub graph_base_url: String,

    /// PostgreSQL toolset behind an MCP server
    #[serde(default)]
    pub postgres: PostgresToolsConfig,
}

fn default_graph_base_url() -> String {
    "https://graph.microsoft.com/v1.0".into()
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            allowlist: Vec::new(),
            graph_base_url: default_graph_base_url(),
            postgres: PostgresToolsConfig::default(),
        }
    }
}

/// Tools registered when `[tools.postgres] tools` is not set. The two index
/// advisors are opt-in.
pub const DEFAULT_POSTGRES_TOOLS: [&str; 7] = [
    "postgres.sql.execute",
    "postgres.schemas.list",
    "postgres.objects.list",
    "postgres.object.details",
    "postgres.query.explain",
    "postgres.queries.top",
    "postgres.health.analyze",
];

#[derive(Clone, Serialize, Deserialize)]
pub struct PostgresToolsConfig {
    /// Command line that starts the MCP server over stdio. Unset disables the toolset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,

    /// Passed to the server as `DATABASE_URI`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_uri: Option<String>,

    /// Tools to register
    #[serde(default = "default_postgres_tools")]
    pub tools: Vec<String>,

    /// Per-call timeout, also applied to the handshake
    #[serde(default = "default_postgres_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_postgres_tools() -> Vec<String> {
    DEFAULT_POSTGRES_TOOLS.iter().map(|t| t.to_string()).collect()
}
fn default_postgres_timeout_ms() -> u64 {
    30_000
}

impl Default for PostgresToolsConfig {
    fn default() -> Self {
        Self {
            command: None,
            database_uri: None,
            tools: default_postgres_tools(),
            timeout_ms: default_postgres_timeout_ms(),
        }
    }
}

impl PostgresToolsConfig {
    pub fn is_enabled(&self) -> bool {
        self.command.as_deref().is_some_and(|c| !c.trim().is_empty())
    }
}

impl std::fmt::Debug for PostgresToolsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresToolsConfig")
            .field("command", &self.command)
            .field("database_uri", &redact(&self.database_uri))
            .field("tools", &self.tools)
            .field("timeout_ms", &self.timeout_ms)
            .finish()
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.toolwright/config.toml),
    /// then apply environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides. `lookup` is `std::env::var` outside tests.
    ///
    /// Secrets from the environment only fill gaps left by the file; tuning
    /// knobs (`AGENT_*`) always win.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let first = |keys: &[&str]| {
            keys.iter()
                .find_map(|k| lookup(*k).filter(|v| !v.trim().is_empty()))
        };

        if self.provider.api_key.is_none() {
            self.provider.api_key =
                first(&["TOOLWRIGHT_API_KEY", "OPENROUTER_API_KEY", "OPENAI_API_KEY"]);
        }
        if let Some(model) = first(&["TOOLWRIGHT_MODEL"]) {
            self.provider.model = model;
        }
        if let Some(url) = first(&["TOOLWRIGHT_BASE_URL"]) {
            self.provider.base_url = url;
        }

        if let Some(limit) = first(&["AGENT_RECURSION_LIMIT"]).and_then(|v| v.trim().parse().ok()) {
            self.agent.recursion_limit = limit;
        }
        if let Some(trace) = first(&["AGENT_TRACE"]) {
            self.agent.trace_enabled = !is_off(&trace);
        }
        if let Some(split) = first(&["AGENT_SSE_SPLIT"]) {
            self.sse.split = !is_off(&split);
        }
        if let Some(size) =
            first(&["AGENT_SSE_CHUNK_SIZE"]).and_then(|v| v.trim().parse::<usize>().ok())
        {
            self.sse.chunk_size = size.max(MIN_SSE_CHUNK_SIZE);
        }

        let creds = &mut self.credentials;
        if creds.access_token.is_none() {
            creds.access_token =
                first(&["TOOLWRIGHT_ACCESS_TOKEN", "GRAPH_ACCESS_TOKEN", "AZURE_ACCESS_TOKEN"]);
        }
        if creds.tenant_id.is_none() {
            creds.tenant_id = first(&["TOOLWRIGHT_TENANT_ID", "AZURE_TENANT_ID"]);
        }
        if creds.client_id.is_none() {
            creds.client_id = first(&["TOOLWRIGHT_CLIENT_ID", "AZURE_CLIENT_ID"]);
        }
        if creds.client_secret.is_none() {
            creds.client_secret = first(&["TOOLWRIGHT_CLIENT_SECRET", "AZURE_CLIENT_SECRET"]);
        }
        if creds.default_scope.is_none() {
            creds.default_scope = first(&["TOOLWRIGHT_DEFAULT_SCOPE"]);
        }
        if let Some(bin) = first(&["TOOLWRIGHT_CLI_BIN"]) {
            creds.cli_bin = bin;
        }
        if let Some(ms) =
            first(&["TOOLWRIGHT_CLI_TIMEOUT_MS"]).and_then(|v| v.trim().parse().ok())
        {
            creds.cli_timeout_ms = ms;
        }
        if let Some(disabled) = first(&["TOOLWRIGHT_DISABLE_CLI"]) {
            creds.cli_disabled = is_on(&disabled);
        }

        if let Some(referer) = first(&["OPENROUTER_HTTP_REFERER"]) {
            self.provider.headers.entry("HTTP-Referer".into()).or_insert(referer);
        }
        if let Some(title) = first(&["OPENROUTER_APP_TITLE"]) {
            self.provider.headers.entry("X-Title".into()).or_insert(title);
        }

        let pg = &mut self.tools.postgres;
        if pg.command.is_none() {
            pg.command = first(&["MCP_POSTGRES_CMD"]);
        }
        if pg.database_uri.is_none() {
            pg.database_uri = first(&[
                "MCP_POSTGRES_URI",
                "MCP_POSTGRES_DATABASE_URI",
                "MCP_POSTGRES_URL",
                "DATABASE_URL",
                "POSTGRES_URL",
            ]);
        }
        if let Some(tools) = first(&["MCP_POSTGRES_TOOLS"]) {
            pg.tools = tools
                .split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .collect();
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".toolwright")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.provider.temperature) {
            return Err(ConfigError::ValidationError(
                "provider.temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.agent.recursion_limit == 0 {
            return Err(ConfigError::ValidationError(
                "agent.recursion_limit must be at least 1".into(),
            ));
        }

        if self.sse.chunk_size < MIN_SSE_CHUNK_SIZE {
            return Err(ConfigError::ValidationError(format!(
                "sse.chunk_size must be at least {MIN_SSE_CHUNK_SIZE}"
            )));
        }

        if self.credentials.cli_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "credentials.cli_timeout_ms must be > 0".into(),
            ));
        }

        if self.tools.postgres.timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "tools.postgres.timeout_ms must be > 0".into(),
            ));
        }

        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.provider.api_key.is_some()
    }

    /// Generate a default config TOML string (for the `config init` command).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

fn is_off(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "0" | "false" | "off" | "no")
}

fn is_on(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "on" | "yes")
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
