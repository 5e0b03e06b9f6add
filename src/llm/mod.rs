pub mod anthropic;
pub mod client;
pub mod ollama;

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

use crate::config::LlmConfig;

pub use anthropic::AnthropicClient;
pub use client::LlmClient;
pub use ollama::OllamaClient;

/// One message in a conversation sent to a backend.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Message {
    pub role: String,
    pub content: String,
}

/// LLM response with metadata.
#[derive(Debug)]
pub struct LlmResponse {
    pub text: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// Builds the backend named by `config.provider`.
pub fn client_from_config(config: &LlmConfig) -> Result<Box<dyn LlmClient>> {
    match config.provider.as_str() {
        "ollama" => Ok(Box::new(OllamaClient::new(config.clone()))),
        "anthropic" => Ok(Box::new(AnthropicClient::new(config.clone()))),
        other => bail!("unknown LLM provider `{other}` (expected `ollama` or `anthropic`)"),
    }
}
