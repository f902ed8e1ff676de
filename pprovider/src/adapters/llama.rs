//! Locally hosted Llama adapter over the Ollama generate API.
//!
//! The upstream protocol is a chunked NDJSON stream even for a single
//! completion; the adapter drains every chunk and returns the accumulated
//! text as one reply.

use futures_util::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::adapters::openai::{non_empty_or, response_error};
use crate::{
    CompletionReply, CompletionRequest, ProviderAdapter, ProviderError, ProviderFuture,
    ProviderId,
};

pub const LLAMA_BASE_URL: &str = "http://localhost:11434";

#[derive(Clone)]
pub struct LlamaProvider {
    client: Client,
    base_url: String,
}

impl LlamaProvider {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            base_url: LLAMA_BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/api/generate", self.base_url.trim_end_matches('/'))
    }
}

impl ProviderAdapter for LlamaProvider {
    fn id(&self) -> ProviderId {
        ProviderId::Llama
    }

    fn complete<'a>(
        &'a self,
        request: CompletionRequest,
    ) -> ProviderFuture<'a, Result<CompletionReply, ProviderError>> {
        Box::pin(async move {
            request.validate()?;
            let model = request.model_for(ProviderId::Llama);
            let body = GenerateRequest {
                model: &model,
                prompt: &request.message,
                stream: true,
            };

            let response = self
                .client
                .post(self.endpoint())
                .json(&body)
                .send()
                .await
                .map_err(|err| {
                    if err.is_timeout() {
                        ProviderError::timeout("Failed to connect to llama")
                    } else {
                        ProviderError::transport("Failed to connect to llama")
                    }
                })?;

            if !response.status().is_success() {
                return Err(response_error(response).await);
            }

            let mut decoder = GenerateStreamDecoder::default();
            let mut chunks = response.bytes_stream();

            while let Some(chunk) = chunks.next().await {
                let bytes =
                    chunk.map_err(|err| ProviderError::transport(err.to_string()))?;
                decoder.push(&bytes)?;
            }

            Ok(CompletionReply {
                provider: ProviderId::Llama,
                model,
                text: non_empty_or(decoder.finish()?, "No response from Llama received."),
            })
        })
    }
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

/// Line-framed NDJSON decoder over raw network chunks. Chunk boundaries are
/// arbitrary: a line, or a single multibyte UTF-8 character, may span chunks,
/// so bytes buffer until a newline completes the line and only complete lines
/// are decoded as UTF-8.
#[derive(Debug, Default)]
struct GenerateStreamDecoder {
    buffer: Vec<u8>,
    accumulator: GenerateAccumulator,
}

impl GenerateStreamDecoder {
    fn push(&mut self, bytes: &[u8]) -> Result<(), ProviderError> {
        self.buffer.extend_from_slice(bytes);
        while let Some(newline_index) = self.buffer.iter().position(|byte| *byte == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=newline_index).collect();
            self.accumulator.apply_line(decode_line(&line)?.trim())?;
        }
        Ok(())
    }

    /// Consume the final line, which may not be newline-terminated, and
    /// return the accumulated reply text.
    fn finish(mut self) -> Result<String, ProviderError> {
        let tail = std::mem::take(&mut self.buffer);
        self.accumulator.apply_line(decode_line(&tail)?.trim())?;
        Ok(std::mem::take(&mut self.accumulator.text))
    }
}

fn decode_line(bytes: &[u8]) -> Result<&str, ProviderError> {
    std::str::from_utf8(bytes)
        .map_err(|err| ProviderError::transport(format!("Invalid UTF-8 in response: {err}")))
}

#[derive(Debug, Default)]
struct GenerateAccumulator {
    text: String,
}

impl GenerateAccumulator {
    /// Fold one NDJSON line into the accumulated reply, reporting whether the
    /// line carried the `done` marker. Chunks after the marker are still
    /// consumed so the stream is fully drained.
    fn apply_line(&mut self, line: &str) -> Result<bool, ProviderError> {
        if line.is_empty() {
            return Ok(false);
        }

        let chunk: GenerateChunk = serde_json::from_str(line)
            .map_err(|err| ProviderError::transport(format!("Non-JSON response: {err}")))?;

        if let Some(error) = chunk.error {
            return Err(ProviderError::transport(error));
        }

        if let Some(piece) = chunk.response {
            self.text.push_str(&piece);
        }

        Ok(chunk.done.unwrap_or(false))
    }
}

#[derive(Debug, Deserialize)]
struct GenerateChunk {
    #[serde(default)]
    response: Option<String>,
    #[serde(default)]
    done: Option<bool>,
    #[serde(default)]
    error: Option<String>,
}
