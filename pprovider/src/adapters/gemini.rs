//! Gemini adapter over the native generateContent API.

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

pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

#[derive(Clone)]
pub struct GeminiProvider {
    credentials: Arc<SecureCredentialManager>,
    client: Client,
    base_url: String,
}

impl GeminiProvider {
    pub fn new(credentials: Arc<SecureCredentialManager>, client: Client) -> Self {
        Self {
            credentials,
            client,
            base_url: GEMINI_BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn endpoint(&self, model: &str) -> String {
        format!(
            "{}/models/{model}:generateContent",
            self.base_url.trim_end_matches('/')
        )
    }
}

impl ProviderAdapter for GeminiProvider {
    fn id(&self) -> ProviderId {
        ProviderId::Gemini
    }

    fn complete<'a>(
        &'a self,
        request: CompletionRequest,
    ) -> ProviderFuture<'a, Result<CompletionReply, ProviderError>> {
        Box::pin(async move {
            request.validate()?;
            let api_key = resolve_api_key(
                &self.credentials,
                ProviderId::Gemini,
                "Gemini API key is required",
            )?;

            let model = request.model_for(ProviderId::Gemini);
            let body = GenerateContentRequest::single_prompt(&request.message);

            let response = self
                .client
                .post(self.endpoint(&model))
                .header("x-goog-api-key", api_key.expose())
                .json(&body)
                .send()
                .await
                .map_err(|err| normalize_network_error(ProviderId::Gemini, send_error(err)))?;

            if !response.status().is_success() {
                return Err(response_error(response).await);
            }

            let parsed: GenerateContentResponse = response
                .json()
                .await
                .map_err(|err| ProviderError::transport(err.to_string()))?;

            Ok(CompletionReply {
                provider: ProviderId::Gemini,
                model,
                text: non_empty_or(parsed.text(), "No response from Gemini received."),
            })
        })
    }
}

#[derive(Debug, Serialize)]
struct GenerateContentRequest<'a> {
    contents: Vec<Content<'a>>,
}

impl<'a> GenerateContentRequest<'a> {
    fn single_prompt(message: &'a str) -> Self {
        Self {
            contents: vec![Content {
                parts: vec![Part { text: message }],
            }],
        }
    }
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

impl GenerateContentResponse {
    /// Concatenated text parts of the first candidate.
    fn text(&self) -> String {
        self.candidates
            .first()
            .map(|candidate| {
                candidate
                    .content
                    .parts
                    .iter()
                    .filter_map(|part| part.text.as_deref())
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default()
    }
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: CandidateContent,
}

#[derive(Debug, Default, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: Option<String>,
}
