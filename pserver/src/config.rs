//! Environment-driven server configuration.

use std::error::Error;
use std::fmt::{Display, Formatter};
use std::net::SocketAddr;

use pprovider::ProviderId;

pub const DEFAULT_BIND: &str = "127.0.0.1:3000";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigError {
    pub message: String,
}

impl ConfigError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl Error for ConfigError {}

/// Startup configuration. API keys are optional here; a provider without a
/// key answers requests with an authentication error instead of keeping the
/// whole server from starting.
pub struct ServerConfig {
    pub bind: SocketAddr,
    pub api_keys: Vec<(ProviderId, String)>,
    pub llama_base_url: Option<String>,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let bind_raw = non_empty_env("PALAVER_BIND").unwrap_or_else(|| DEFAULT_BIND.to_string());
        let bind = bind_raw.parse::<SocketAddr>().map_err(|error| {
            ConfigError::new(format!("invalid PALAVER_BIND address '{bind_raw}': {error}"))
        })?;

        let key_vars = [
            (ProviderId::ChatGpt, "OPENAI_API_KEY"),
            (ProviderId::Claude, "ANTHROPIC_API_KEY"),
            (ProviderId::Gemini, "GEMINI_API_KEY"),
            (ProviderId::Grok, "GROK_API_KEY"),
        ];
        let api_keys = key_vars
            .into_iter()
            .filter_map(|(provider, var)| non_empty_env(var).map(|key| (provider, key)))
            .collect();

        Ok(Self {
            bind,
            api_keys,
            llama_base_url: non_empty_env("LLAMA_API_URL"),
        })
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
