//! `toolwright doctor`: diagnose configuration, credentials and provider.

use std::sync::Arc;
use std::time::Duration;

use toolwright_config::AppConfig;
use toolwright_core::provider::Provider;
use toolwright_providers::OpenAiCompatProvider;
use toolwright_security::TokenManager;

const PROVIDER_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

pub async fn run() -> anyhow::Result<()> {
    println!("🩺 Toolwright Doctor");
    println!("====================\n");

    let mut issues = 0;

    let config_path = AppConfig::config_dir().join("config.toml");
    let config = match AppConfig::load() {
        Ok(config) => {
            if config_path.exists() {
                println!("  ✅ Config file valid ({})", config_path.display());
            } else {
                println!("  ⚠️  No config file, using defaults. Run `toolwright config init`");
                issues += 1;
            }
            config
        }
        Err(e) => {
            println!("  ❌ Config file invalid: {e}");
            println!("\n  ⚠️  Fix the config file and run doctor again.");
            return Ok(());
        }
    };

    issues += check_credentials(&config);
    issues += check_tools(&config).await;
    issues += check_provider(&config).await;

    println!();
    if issues == 0 {
        println!("  🎉 All checks passed!");
    } else {
        println!("  ⚠️  {issues} issue(s) found, service degraded. See above for details.");
    }

    Ok(())
}

fn check_credentials(config: &AppConfig) -> usize {
    let tokens = TokenManager::from_config(&config.credentials);
    let status = tokens.source_status();

    let ready: Vec<String> = status
        .iter()
        .filter(|(_, missing)| missing.is_empty())
        .map(|(source, _)| source.to_string())
        .collect();
    for (source, missing) in status.iter().filter(|(_, missing)| !missing.is_empty()) {
        println!("  ⚠️  Token source {source} unavailable, missing: {}", missing.join(", "));
    }

    if ready.is_empty() {
        println!("  ❌ No usable token source. Set an access token or client credentials");
        1
    } else {
        println!("  ✅ Token sources: {}", ready.join(", "));
        0
    }
}

async fn check_tools(config: &AppConfig) -> usize {
    if !config.tools.enabled {
        println!("  ⚠️  Tools disabled in config");
        return 0;
    }
    let tokens = Arc::new(TokenManager::from_config(&config.credentials));
    match super::build_dispatcher(config, tokens).await {
        Ok(dispatcher) => {
            println!("  ✅ Tool manifest compiled ({} tools)", dispatcher.len());
            let pg = &config.tools.postgres;
            if pg.is_enabled() {
                let serving = pg.tools.iter().any(|name| dispatcher.contains(name.as_str()));
                if serving || pg.tools.is_empty() {
                    println!("  ✅ Postgres MCP server connected");
                } else {
                    println!("  ❌ Postgres MCP server did not start");
                    return 1;
                }
            }
            let unknown: Vec<&String> = config
                .tools
                .allowlist
                .iter()
                .filter(|name| !dispatcher.contains(name.as_str()))
                .collect();
            if unknown.is_empty() {
                0
            } else {
                for name in &unknown {
                    println!("  ⚠️  Allowlisted tool not in manifest: {name}");
                }
                unknown.len()
            }
        }
        Err(e) => {
            println!("  ❌ Tool manifest failed: {e:#}");
            1
        }
    }
}

async fn check_provider(config: &AppConfig) -> usize {
    let provider = match OpenAiCompatProvider::from_config(&config.provider) {
        Ok(provider) => provider,
        Err(e) => {
            println!("  ❌ Provider not configured: {e}");
            return 1;
        }
    };

    match tokio::time::timeout(PROVIDER_PROBE_TIMEOUT, provider.health_check()).await {
        Ok(Ok(true)) => {
            println!("  ✅ Provider reachable ({})", config.provider.base_url);
            0
        }
        Ok(Ok(false)) => {
            println!(
                "  ❌ Provider rejected the health probe ({})",
                config.provider.base_url
            );
            1
        }
        Ok(Err(e)) => {
            println!("  ❌ Provider unreachable: {e}");
            1
        }
        Err(_) => {
            println!("  ❌ Provider health probe timed out");
            1
        }
    }
}
