pub mod config_cmd;
pub mod doctor;
pub mod manifest;
pub mod render;
pub mod serve;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use toolwright_config::AppConfig;
use toolwright_core::tool::Manifest;
use toolwright_security::TokenManager;
use toolwright_tools::{Dispatcher, McpClient, m365, m365_manifest, postgres};

/// Load `~/.toolwright/config.toml` with environment overrides applied.
pub fn load_config() -> anyhow::Result<AppConfig> {
    let path = AppConfig::config_dir().join("config.toml");
    tracing::debug!(path = %path.display(), "Loading config");
    AppConfig::load().context("Failed to load config")
}

/// The `m365` tools plus, when an MCP command is configured, the enabled
/// `postgres` tools. Empty when `[tools] enabled = false`.
///
/// A postgres server that fails to start is logged and left out; the
/// Microsoft 365 tools stay available.
pub async fn build_dispatcher(
    config: &AppConfig,
    tokens: Arc<TokenManager>,
) -> anyhow::Result<Dispatcher> {
    if !config.tools.enabled {
        let empty = Manifest {
            tools: Vec::new(),
            ..m365_manifest()
        };
        return Dispatcher::builder(empty)
            .build()
            .context("Failed to build empty dispatcher");
    }

    let ctx = m365::M365Context::from_config(&config.tools, tokens)
        .context("Failed to build Graph client")?;
    let mut builder = m365::register(Dispatcher::builder(m365_manifest()), Arc::new(ctx));

    let pg = &config.tools.postgres;
    if let Some(command) = pg.command.as_deref().filter(|_| pg.is_enabled()) {
        let env: Vec<(&str, String)> = pg
            .database_uri
            .iter()
            .map(|uri| ("DATABASE_URI", uri.clone()))
            .collect();
        let timeout = Duration::from_millis(pg.timeout_ms);
        match McpClient::spawn("postgres", command, &env, timeout).await {
            Ok(client) => {
                builder = postgres::register(builder, Arc::new(client), &pg.tools)
                    .context("Failed to register postgres tools")?;
            }
            Err(e) => tracing::warn!(error = %e, "Postgres MCP server unavailable, tools skipped"),
        }
    }

    builder.build().context("Failed to compile tool manifest")
}
