//! Claude adapter over the native Anthropic messages API.

use std::sync::Arc;

use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::adapters::openai::{
    non_empty_or, normalize_network_error, resolve_api_key, response_error, send_error,
};
use crate::{
    CompletionReply, CompletionRequest, ProviderAdapter, ProviderError, ProviderFuture,
    ProviderId, SecureCredentialManager,
};

pub const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com/v1";
pub const ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Clone)]
pub struct AnthropicProvider {
    credentials: Arc<SecureCredentialManager>,
    client: Client,
    base_url: String,
}

impl AnthropicProvider {
    pub fn new(credentials: Arc<SecureCredentialManager>, client: Client) -> Self {
        Self {
            credentials,
            client,
            base_url: ANTHROPIC_BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/messages", self.base_url.trim_end_matches('/'))
    }
}

impl ProviderAdapter for AnthropicProvider {
    fn id(&self) -> ProviderId {
        ProviderId::Claude
    }

    fn complete<'a>(
        &'a self,
        request: CompletionRequest,
    ) -> ProviderFuture<'a, Result<CompletionReply, ProviderError>> {
        Box::pin(async move {
            request.validate()?;
            let api_key = resolve_api_key(
                &self.credentials,
                ProviderId::Claude,
                "Anthropic API key is required",
            )?;

            let model = request.model_for(ProviderId::Claude);
            let body = MessagesRequest::single_user(&model, &request.message);

            let response = self
                .client
                .post(self.endpoint())
                .header("x-api-key", api_key.expose())
                .header("anthropic-version", ANTHROPIC_VERSION)
                .json(&body)
                .send()
                .await
                .map_err(|err| normalize_network_error(ProviderId::Claude, send_error(err)))?;

            if !response.status().is_success() {
                return Err(response_error(response).await);
            }

            let parsed: MessagesResponse = response
                .json()
                .await
                .map_err(|err| ProviderError::transport(err.to_string()))?;

            Ok(CompletionReply {
                provider: ProviderId::Claude,
                model,
                text: non_empty_or(parsed.text(), "No response from Claude received."),
            })
        })
    }
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    messages: Vec<MessagesRequestMessage<'a>>,
}

impl<'a> MessagesRequest<'a> {
    fn single_user(model: &'a str, message: &'a str) -> Self {
        Self {
            model,
            max_tokens: 1000,
            temperature: 0.7,
            messages: vec![MessagesRequestMessage {
                role: "user",
                content: message,
            }],
        }
    }
}

#[derive(Debug, Serialize)]
struct MessagesRequestMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

impl MessagesResponse {
    /// First text block of the reply; non-text blocks are skipped.
    fn text(&self) -> String {
        self.content
            .iter()
            .find_map(|block| match block {
                ContentBlock::Text { text } => Some(text.clone()),
                ContentBlock::Other => None,
            })
            .unwrap_or_default()
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(other)]
    Other,
}
