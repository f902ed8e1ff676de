//! Vendor adapters behind the normalized completion contract.

pub mod anthropic;
pub mod gemini;
pub mod llama;
pub mod openai;

pub use anthropic::AnthropicProvider;
pub use gemini::GeminiProvider;
pub use llama::LlamaProvider;
pub use openai::{ChatGptProvider, GrokProvider};
