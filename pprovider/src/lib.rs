//! Normalized LLM provider contract and the per-vendor adapters behind it.
//!
//! Every adapter accepts the same `{message, model?}` request, talks its
//! vendor's wire protocol, and returns either the reply text or a classified
//! [`ProviderError`]. Nothing past the adapter boundary panics on upstream
//! failure.

use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::Arc;

mod credentials;
mod error;

pub mod adapters;

pub use credentials::{SecretString, SecureCredentialManager};
pub use error::{ProviderError, ProviderErrorKind};

pub type ProviderFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderId {
    ChatGpt,
    Claude,
    Gemini,
    Grok,
    Llama,
}

impl ProviderId {
    pub const ALL: [ProviderId; 5] = [
        ProviderId::ChatGpt,
        ProviderId::Claude,
        ProviderId::Gemini,
        ProviderId::Grok,
        ProviderId::Llama,
    ];

    /// Human-facing vendor name, used in chat-visible error text.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::ChatGpt => "ChatGPT",
            Self::Claude => "Claude",
            Self::Gemini => "Gemini",
            Self::Grok => "Grok",
            Self::Llama => "Llama",
        }
    }

    /// Model used when a request does not name one.
    pub fn default_model(&self) -> &'static str {
        match self {
            Self::ChatGpt => "gpt-4o-mini",
            Self::Claude => "claude-sonnet-4-20250514",
            Self::Gemini => "gemini-1.5-flash",
            Self::Grok => "grok-4",
            Self::Llama => "llama3:8b",
        }
    }

    pub fn fallback_error_text(&self) -> String {
        format!("Failed to get response from {}", self.display_name())
    }
}

impl Display for ProviderId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let id = match self {
            Self::ChatGpt => "chatgpt",
            Self::Claude => "claude",
            Self::Gemini => "gemini",
            Self::Grok => "grok",
            Self::Llama => "llama",
        };

        f.write_str(id)
    }
}

impl FromStr for ProviderId {
    type Err = ProviderError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "chatgpt" => Ok(Self::ChatGpt),
            "claude" => Ok(Self::Claude),
            "gemini" => Ok(Self::Gemini),
            "grok" => Ok(Self::Grok),
            "llama" => Ok(Self::Llama),
            other => Err(ProviderError::invalid_request(format!(
                "Unsupported AI provider: {other}"
            ))),
        }
    }
}

/// Normalized request every adapter accepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionRequest {
    pub message: String,
    pub model: Option<String>,
}

impl CompletionRequest {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            model: None,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn validate(&self) -> Result<(), ProviderError> {
        if self.message.trim().is_empty() {
            return Err(ProviderError::invalid_request("Message is required"));
        }

        Ok(())
    }

    /// Model to send upstream, falling back to the provider default.
    pub fn model_for(&self, provider: ProviderId) -> String {
        match &self.model {
            Some(model) if !model.trim().is_empty() => model.clone(),
            _ => provider.default_model().to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionReply {
    pub provider: ProviderId,
    pub model: String,
    pub text: String,
}

pub trait ProviderAdapter: Send + Sync {
    fn id(&self) -> ProviderId;

    fn complete<'a>(
        &'a self,
        request: CompletionRequest,
    ) -> ProviderFuture<'a, Result<CompletionReply, ProviderError>>;
}

#[derive(Default)]
pub struct ProviderRegistry {
    adapters: HashMap<ProviderId, Arc<dyn ProviderAdapter>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<A>(&mut self, adapter: A)
    where
        A: ProviderAdapter + 'static,
    {
        self.adapters.insert(adapter.id(), Arc::new(adapter));
    }

    pub fn get(&self, provider_id: ProviderId) -> Option<Arc<dyn ProviderAdapter>> {
        self.adapters.get(&provider_id).map(Arc::clone)
    }

    pub fn contains(&self, provider_id: ProviderId) -> bool {
        self.adapters.contains_key(&provider_id)
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct FakeAdapter;

    impl ProviderAdapter for FakeAdapter {
        fn id(&self) -> ProviderId {
            ProviderId::ChatGpt
        }

        fn complete<'a>(
            &'a self,
            request: CompletionRequest,
        ) -> ProviderFuture<'a, Result<CompletionReply, ProviderError>> {
            Box::pin(async move {
                request.validate()?;
                Ok(CompletionReply {
                    provider: ProviderId::ChatGpt,
                    model: request.model_for(ProviderId::ChatGpt),
                    text: "hello from provider".to_string(),
                })
            })
        }
    }

    #[test]
    fn provider_id_display_is_stable() {
        assert_eq!(ProviderId::ChatGpt.to_string(), "chatgpt");
        assert_eq!(ProviderId::Claude.to_string(), "claude");
        assert_eq!(ProviderId::Gemini.to_string(), "gemini");
        assert_eq!(ProviderId::Grok.to_string(), "grok");
        assert_eq!(ProviderId::Llama.to_string(), "llama");
    }

    #[test]
    fn provider_id_parses_from_route_segment() {
        for id in ProviderId::ALL {
            assert_eq!(id.to_string().parse::<ProviderId>().unwrap(), id);
        }

        let err = "copilot".parse::<ProviderId>().expect_err("must fail");
        assert_eq!(err.kind, ProviderErrorKind::InvalidRequest);
    }

    #[test]
    fn completion_request_validate_requires_message() {
        let err = CompletionRequest::new("   ")
            .validate()
            .expect_err("blank message must fail");
        assert_eq!(err.kind, ProviderErrorKind::InvalidRequest);
        assert_eq!(err.message, "Message is required");

        assert!(CompletionRequest::new("hi").validate().is_ok());
    }

    #[test]
    fn model_for_falls_back_to_provider_default() {
        let request = CompletionRequest::new("hi");
        assert_eq!(request.model_for(ProviderId::Grok), "grok-4");

        let request = CompletionRequest::new("hi").with_model("grok-3");
        assert_eq!(request.model_for(ProviderId::Grok), "grok-3");

        let request = CompletionRequest::new("hi").with_model("  ");
        assert_eq!(request.model_for(ProviderId::Llama), "llama3:8b");
    }

    #[tokio::test]
    async fn provider_registry_registers_and_returns_adapters() {
        let mut registry = ProviderRegistry::new();
        assert!(registry.is_empty());

        registry.register(FakeAdapter);
        assert_eq!(registry.len(), 1);
        assert!(registry.contains(ProviderId::ChatGpt));
        assert!(!registry.contains(ProviderId::Grok));

        let adapter = registry.get(ProviderId::ChatGpt).expect("adapter exists");
        let reply = adapter
            .complete(CompletionRequest::new("hi"))
            .await
            .expect("completion should work");

        assert_eq!(reply.provider, ProviderId::ChatGpt);
        assert_eq!(reply.model, "gpt-4o-mini");
    }
}
