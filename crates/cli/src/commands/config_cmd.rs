//! `toolwright config`: configuration management commands.

use std::path::Path;

use anyhow::Context;
use toolwright_config::AppConfig;
use toolwright_security::redact_value;

pub fn validate() -> anyhow::Result<()> {
    println!("🔍 Validating configuration...");

    let config = match AppConfig::load() {
        Ok(config) => config,
        Err(e) => {
            println!("   ❌ Config error: {e}");
            return Err(e.into());
        }
    };
    println!("   ✅ Config parsed successfully");

    let warnings = warnings(&config);
    if warnings.is_empty() {
        println!("   ✅ All checks passed");
    } else {
        println!();
        for w in &warnings {
            println!("   ⚠️  {w}");
        }
    }

    println!();
    println!("   Provider:  {} ({})", config.provider.name, config.provider.base_url);
    println!("   Model:     {}", config.provider.model);
    println!("   Gateway:   {}:{}", config.gateway.host, config.gateway.port);
    println!("   Recursion: {}", config.agent.recursion_limit);
    println!(
        "   SSE:       split={} chunk_size={}",
        config.sse.split, config.sse.chunk_size
    );
    println!("   Threads:   {}", config.session.max_threads);

    Ok(())
}

/// Non-fatal findings on an otherwise valid config.
fn warnings(config: &AppConfig) -> Vec<&'static str> {
    let mut warnings = Vec::new();
    if !config.has_api_key() {
        warnings.push(
            "No API key set (set TOOLWRIGHT_API_KEY, OPENROUTER_API_KEY or OPENAI_API_KEY)",
        );
    }
    if config.gateway.host == "0.0.0.0" {
        warnings.push("Gateway bound to 0.0.0.0, reachable from the network");
    }
    let creds = &config.credentials;
    if creds.access_token.is_none() && !creds.has_client_credentials() && creds.cli_disabled {
        warnings.push(
            "No token source: no access token, no client credentials and the CLI delegate \
             is disabled",
        );
    }
    if !config.tools.enabled {
        warnings.push("Tools are disabled, the agent can only answer from the model");
    }
    warnings
}

/// Print the effective config as TOML with secrets masked.
pub fn show() -> anyhow::Result<()> {
    let config = super::load_config()?;
    println!("{}", redacted_toml(&config)?);
    Ok(())
}

pub fn redacted_toml(config: &AppConfig) -> anyhow::Result<String> {
    let mut value = serde_json::to_value(config).context("Failed to serialize config")?;
    redact_value(&mut value);
    toml::to_string_pretty(&value).context("Failed to render config as TOML")
}

pub fn path() {
    let config_path = AppConfig::config_dir().join("config.toml");
    println!("{}", config_path.display());
}

pub fn init(force: bool) -> anyhow::Result<()> {
    let config_path = AppConfig::config_dir().join("config.toml");
    if write_default(&config_path, force)? {
        println!("✅ Wrote starter config to {}", config_path.display());
    } else {
        println!(
            "⚠️  {} already exists. Use --force to overwrite.",
            config_path.display()
        );
    }
    Ok(())
}

/// Write [`AppConfig::default_toml`] to `path`. Returns `false` if the file
/// exists and `force` is off.
fn write_default(path: &Path, force: bool) -> anyhow::Result<bool> {
    if path.exists() && !force {
        return Ok(false);
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    std::fs::write(path, AppConfig::default_toml())
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(true)
}
