//! `toolwright serve`: start the streaming gateway.

use std::sync::Arc;

use anyhow::Context;
use toolwright_agent::AgentLoop;
use toolwright_gateway::{GatewayState, SseEncoder};
use toolwright_providers::OpenAiCompatProvider;
use toolwright_security::TokenManager;

pub async fn run(
    port_override: Option<u16>,
    host_override: Option<String>,
) -> anyhow::Result<()> {
    let mut config = super::load_config()?;
    if let Some(port) = port_override {
        config.gateway.port = port;
    }
    if let Some(host) = host_override {
        config.gateway.host = host;
    }

    let tokens = Arc::new(TokenManager::from_config(&config.credentials));
    let dispatcher = Arc::new(super::build_dispatcher(&config, tokens).await?);
    let provider = OpenAiCompatProvider::from_config(&config.provider)
        .context("Failed to build model provider")?;
    let agent = Arc::new(AgentLoop::from_config(
        &config,
        Arc::new(provider),
        Arc::clone(&dispatcher),
    ));
    let state = Arc::new(GatewayState::new(agent, SseEncoder::from_config(&config.sse)));

    println!("🔧 Toolwright Gateway");
    println!("   Listening: {}:{}", config.gateway.host, config.gateway.port);
    println!("   Model:     {}", config.provider.model);
    println!("   Tools:     {}", dispatcher.len());

    toolwright_gateway::serve(state, &config.gateway)
        .await
        .context("Gateway stopped with an error")
}
