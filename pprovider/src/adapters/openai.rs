//! OpenAI-compatible chat-completions transport plus the ChatGPT and Grok
//! adapters that share it. Grok speaks the same protocol against the x.ai
//! endpoint and additionally validates its model against a fixed allow-list.

use std::sync::Arc;

use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};

use crate::{
    CompletionReply, CompletionRequest, ProviderAdapter, ProviderError, ProviderFuture,
    ProviderId, SecretString, SecureCredentialManager,
};

pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const GROK_BASE_URL: &str = "https://api.x.ai/v1";

pub const VALID_GROK_MODELS: [&str; 3] = ["grok-4", "grok-3", "grok-3-mini"];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatCompletionsMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatCompletionsRequest {
    pub model: String,
    pub messages: Vec<ChatCompletionsMessage>,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl ChatCompletionsRequest {
    /// Request carrying a single user message, with the upstream defaults the
    /// proxy always sends.
    pub fn single_user(model: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            messages: vec![ChatCompletionsMessage {
                role: "user".to_string(),
                content: message.into(),
            }],
            max_tokens: 1000,
            temperature: 0.7,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatCompletionsReply {
    pub model: String,
    pub content: String,
}

pub trait ChatCompletionsTransport: Send + Sync + std::fmt::Debug {
    fn complete<'a>(
        &'a self,
        request: ChatCompletionsRequest,
        api_key: SecretString,
    ) -> ProviderFuture<'a, Result<ChatCompletionsReply, ProviderError>>;
}

#[derive(Debug, Clone)]
pub struct HttpChatCompletionsTransport {
    client: Client,
    base_url: String,
}

impl HttpChatCompletionsTransport {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            base_url: OPENAI_BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }
}

impl ChatCompletionsTransport for HttpChatCompletionsTransport {
    fn complete<'a>(
        &'a self,
        request: ChatCompletionsRequest,
        api_key: SecretString,
    ) -> ProviderFuture<'a, Result<ChatCompletionsReply, ProviderError>> {
        Box::pin(async move {
            let url = self.endpoint("chat/completions");
            let response = self
                .client
                .post(url)
                .bearer_auth(api_key.expose())
                .json(&request)
                .send()
                .await
                .map_err(send_error)?;

            if !response.status().is_success() {
                return Err(response_error(response).await);
            }

            let parsed: ApiResponse = response
                .json()
                .await
                .map_err(|err| ProviderError::transport(err.to_string()))?;

            let content = parsed
                .choices
                .into_iter()
                .next()
                .and_then(|choice| choice.message.content)
                .unwrap_or_default();

            Ok(ChatCompletionsReply {
                model: parsed.model.unwrap_or(request.model),
                content,
            })
        })
    }
}

/// Classify a reqwest send failure (nothing came back from upstream).
pub(crate) fn send_error(err: reqwest::Error) -> ProviderError {
    if err.is_timeout() {
        ProviderError::timeout(err.to_string())
    } else {
        ProviderError::transport(err.to_string())
    }
}

/// Classify a non-2xx upstream response by status, preferring the error
/// message embedded in the body.
pub(crate) async fn response_error(response: Response) -> ProviderError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let message = extract_error_message(&body)
        .unwrap_or_else(|| format!("upstream request failed with status {status}"));

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ProviderError::authentication(message),
        StatusCode::TOO_MANY_REQUESTS => ProviderError::rate_limited(message),
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => {
            ProviderError::timeout(message)
        }
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY | StatusCode::NOT_FOUND => {
            ProviderError::invalid_request(message)
        }
        StatusCode::SERVICE_UNAVAILABLE | StatusCode::BAD_GATEWAY => {
            ProviderError::unavailable(message)
        }
        _ => ProviderError::transport(message),
    }
}

pub(crate) fn extract_error_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    if let Some(message) = value["error"]["message"].as_str() {
        return Some(message.to_string());
    }

    value["error"].as_str().map(str::to_string)
}

/// Replace low-level network noise with the vendor's user-visible fallback;
/// messages that came from an upstream response body pass through.
pub(crate) fn normalize_network_error(provider: ProviderId, error: ProviderError) -> ProviderError {
    match error.kind {
        crate::ProviderErrorKind::Transport | crate::ProviderErrorKind::Timeout => {
            ProviderError::new(error.kind, provider.fallback_error_text())
        }
        _ => error,
    }
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Vec<ApiChoice>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ApiChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Clone)]
pub struct ChatGptProvider {
    credentials: Arc<SecureCredentialManager>,
    transport: Arc<dyn ChatCompletionsTransport>,
}

impl ChatGptProvider {
    pub fn new(
        credentials: Arc<SecureCredentialManager>,
        transport: Arc<dyn ChatCompletionsTransport>,
    ) -> Self {
        Self {
            credentials,
            transport,
        }
    }

    pub fn default_http_transport(client: Client) -> HttpChatCompletionsTransport {
        HttpChatCompletionsTransport::new(client)
    }
}

impl ProviderAdapter for ChatGptProvider {
    fn id(&self) -> ProviderId {
        ProviderId::ChatGpt
    }

    fn complete<'a>(
        &'a self,
        request: CompletionRequest,
    ) -> ProviderFuture<'a, Result<CompletionReply, ProviderError>> {
        Box::pin(async move {
            request.validate()?;
            let api_key = resolve_api_key(
                &self.credentials,
                ProviderId::ChatGpt,
                "OpenAI API key is required",
            )?;

            let model = request.model_for(ProviderId::ChatGpt);
            let upstream = ChatCompletionsRequest::single_user(model, request.message);
            let reply = self
                .transport
                .complete(upstream, api_key)
                .await
                .map_err(|err| normalize_network_error(ProviderId::ChatGpt, err))?;

            Ok(CompletionReply {
                provider: ProviderId::ChatGpt,
                model: reply.model,
                text: non_empty_or(reply.content, "No response from ChatGPT received."),
            })
        })
    }
}

#[derive(Clone)]
pub struct GrokProvider {
    credentials: Arc<SecureCredentialManager>,
    transport: Arc<dyn ChatCompletionsTransport>,
}

impl GrokProvider {
    pub fn new(
        credentials: Arc<SecureCredentialManager>,
        transport: Arc<dyn ChatCompletionsTransport>,
    ) -> Self {
        Self {
            credentials,
            transport,
        }
    }

    pub fn default_http_transport(client: Client) -> HttpChatCompletionsTransport {
        HttpChatCompletionsTransport::new(client).with_base_url(GROK_BASE_URL)
    }
}

impl ProviderAdapter for GrokProvider {
    fn id(&self) -> ProviderId {
        ProviderId::Grok
    }

    fn complete<'a>(
        &'a self,
        request: CompletionRequest,
    ) -> ProviderFuture<'a, Result<CompletionReply, ProviderError>> {
        Box::pin(async move {
            request.validate()?;

            let model = request.model_for(ProviderId::Grok);
            if !VALID_GROK_MODELS.contains(&model.as_str()) {
                return Err(ProviderError::invalid_request(format!(
                    "Invalid model: {model}. Use one of: {}",
                    VALID_GROK_MODELS.join(", ")
                )));
            }

            let api_key = resolve_api_key(
                &self.credentials,
                ProviderId::Grok,
                "xAI API key is required",
            )?;

            let upstream = ChatCompletionsRequest::single_user(model, request.message);
            let reply = self
                .transport
                .complete(upstream, api_key)
                .await
                .map_err(|err| normalize_network_error(ProviderId::Grok, err))?;

            Ok(CompletionReply {
                provider: ProviderId::Grok,
                model: reply.model,
                text: non_empty_or(reply.content, "No response received"),
            })
        })
    }
}

pub(crate) fn resolve_api_key(
    credentials: &SecureCredentialManager,
    provider: ProviderId,
    missing_message: &str,
) -> Result<SecretString, ProviderError> {
    credentials
        .with_api_key(provider, |key| SecretString::new(key))?
        .ok_or_else(|| ProviderError::authentication(missing_message))
}

pub(crate) fn non_empty_or(text: String, fallback: &str) -> String {
    if text.trim().is_empty() {
        fallback.to_string()
    } else {
        text
    }
}
