//! Process bootstrap for the palaver AI proxy server.

mod config;
mod routes;

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use pprovider::adapters::{
    AnthropicProvider, ChatGptProvider, GeminiProvider, GrokProvider, LlamaProvider,
};
use pprovider::{ProviderRegistry, SecureCredentialManager};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::config::ServerConfig;
use crate::routes::AppState;

/// Upstream LLM calls can run long; the client timeout has to outlast them.
const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(90);

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("pserver=info,warn")),
        )
        .init();

    let config = ServerConfig::from_env()?;
    let registry = build_registry(&config)?;

    let listener = tokio::net::TcpListener::bind(config.bind).await?;
    tracing::info!(bind = %config.bind, providers = registry.len(), "palaver server listening");

    let app = routes::router(AppState {
        registry: Arc::new(registry),
    });
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

fn build_registry(config: &ServerConfig) -> Result<ProviderRegistry, Box<dyn Error>> {
    let client = reqwest::Client::builder()
        .timeout(UPSTREAM_TIMEOUT)
        .build()?;
    let credentials = Arc::new(SecureCredentialManager::new());
    for (provider, key) in &config.api_keys {
        credentials.set_api_key(*provider, key.clone())?;
        tracing::info!(provider = %provider, "api key configured");
    }

    let mut registry = ProviderRegistry::new();
    registry.register(ChatGptProvider::new(
        credentials.clone(),
        Arc::new(ChatGptProvider::default_http_transport(client.clone())),
    ));
    registry.register(GrokProvider::new(
        credentials.clone(),
        Arc::new(GrokProvider::default_http_transport(client.clone())),
    ));
    registry.register(AnthropicProvider::new(credentials.clone(), client.clone()));
    registry.register(GeminiProvider::new(credentials.clone(), client.clone()));

    let mut llama = LlamaProvider::new(client);
    if let Some(base_url) = &config.llama_base_url {
        llama = llama.with_base_url(base_url.clone());
    }
    registry.register(llama);

    Ok(registry)
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %error, "failed to install shutdown handler");
    }
}
