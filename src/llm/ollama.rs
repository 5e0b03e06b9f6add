//! Ollama API provider.
//!
//! Calls `POST {host}/api/chat` with an Ollama-native request format.
//!
//! Planning notes:
//! - System prompt is sent as a `role: "system"` message (not a top-level field).
//! - `format: "json"` asks the model for strict JSON back — the planner
//!   still re-parses and validates, the hint just raises the hit rate.
//! - Must set `stream: false` for synchronous responses.
//! - Token usage: `prompt_eval_count` / `eval_count` (may be absent).

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::client::LlmClient;
use super::{LlmResponse, Message};
use crate::config::LlmConfig;

/// Default Ollama API base URL.
const DEFAULT_OLLAMA_HOST: &str = "http://localhost:11434";

/// Request timeout. Local models can be slow to first token.
const REQUEST_TIMEOUT_SECS: u64 = 120;

// ── Ollama API request types ─────────────────────────────

/// Ollama `/api/chat` request body.
#[derive(Debug, Serialize)]
struct OllamaChatRequest {
    model: String,
    messages: Vec<OllamaMessage>,
    stream: bool,
    format: String,
    options: OllamaOptions,
}

/// Ollama message in the conversation.
#[derive(Debug, Serialize, Deserialize, Clone)]
struct OllamaMessage {
    role: String,
    content: String,
}

/// Ollama generation options.
#[derive(Debug, Serialize)]
struct OllamaOptions {
    num_predict: u32,
}

// ── Ollama API response types ────────────────────────────

/// Ollama `/api/chat` response.
#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    message: OllamaResponseMessage,
    #[serde(default)]
    prompt_eval_count: Option<u32>,
    #[serde(default)]
    eval_count: Option<u32>,
}

/// Message in an Ollama response.
#[derive(Debug, Deserialize)]
struct OllamaResponseMessage {
    content: String,
}

// ── OllamaClient ────────────────────────────────────────

/// Client for the Ollama API.
pub struct OllamaClient {
    client: Client,
    config: LlmConfig,
    host: String,
}

impl OllamaClient {
    /// Creates a new Ollama client from configuration.
    ///
    /// If `config.host` is `None`, defaults to `http://localhost:11434`.
    pub fn new(config: LlmConfig) -> Self {
        let host = config
            .host
            .clone()
            .unwrap_or_else(|| DEFAULT_OLLAMA_HOST.to_string());
        // Strip trailing slash for consistent URL construction
        let host = host.trim_end_matches('/').to_string();
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            config,
            host,
        }
    }
}

#[async_trait]
impl LlmClient for OllamaClient {
    async fn complete(&self, system_prompt: &str, messages: &[Message]) -> Result<LlmResponse> {
        // System prompt as the first message, then the conversation
        let mut ollama_messages = Vec::with_capacity(messages.len() + 1);
        if !system_prompt.is_empty() {
            ollama_messages.push(OllamaMessage {
                role: "system".to_string(),
                content: system_prompt.to_string(),
            });
        }
        for msg in messages {
            ollama_messages.push(OllamaMessage {
                role: msg.role.clone(),
                content: msg.content.clone(),
            });
        }

        let request = OllamaChatRequest {
            model: self.config.model.clone(),
            messages: ollama_messages,
            stream: false,
            format: "json".to_string(),
            options: OllamaOptions {
                num_predict: self.config.max_tokens_per_request,
            },
        };

        let url = format!("{}/api/chat", self.host);

        debug!(
            "Calling Ollama API ({}) with {} messages",
            self.config.model,
            messages.len()
        );

        let response = self.client.post(&url).json(&request).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Ollama API error ({status}): {body}");
        }

        let resp: OllamaChatResponse = response.json().await?;

        let input_tokens = resp.prompt_eval_count.unwrap_or(0);
        let output_tokens = resp.eval_count.unwrap_or(0);
        info!("LLM response: {input_tokens} in / {output_tokens} out tokens");

        Ok(LlmResponse {
            text: resp.message.content,
            input_tokens,
            output_tokens,
        })
    }

    fn description(&self) -> String {
        format!("ollama ({}) at {}", self.config.model, self.host)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(host: Option<&str>) -> LlmConfig {
        LlmConfig {
            provider: "ollama".to_string(),
            model: "llama3".to_string(),
            host: host.map(String::from),
            api_key: String::new(),
            max_tokens_per_request: 2048,
        }
    }

    #[test]
    fn test_default_host() {
        let client = OllamaClient::new(config(None));
        assert_eq!(client.host, DEFAULT_OLLAMA_HOST);
    }

    #[test]
    fn test_host_trailing_slash_stripped() {
        let client = OllamaClient::new(config(Some("http://10.0.0.5:11434/")));
        assert_eq!(client.host, "http://10.0.0.5:11434");
    }

    #[test]
    fn test_request_serialization() {
        let request = OllamaChatRequest {
            model: "llama3".to_string(),
            messages: vec![OllamaMessage {
                role: "user".to_string(),
                content: "hi".to_string(),
            }],
            stream: false,
            format: "json".to_string(),
            options: OllamaOptions { num_predict: 2048 },
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["stream"], false);
        assert_eq!(json["format"], "json");
        assert_eq!(json["options"]["num_predict"], 2048);
        assert_eq!(json["messages"][0]["role"], "user");
    }

    #[test]
    fn test_response_parsing_without_token_counts() {
        let resp: OllamaChatResponse = serde_json::from_str(
            r#"{"message": {"content": "{\"steps\": []}"}}"#,
        )
        .unwrap();
        assert_eq!(resp.message.content, "{\"steps\": []}");
        assert_eq!(resp.prompt_eval_count, None);
        assert_eq!(resp.eval_count, None);
    }

    #[test]
    fn test_description() {
        let client = OllamaClient::new(config(None));
        assert_eq!(
            client.description(),
            "ollama (llama3) at http://localhost:11434"
        );
    }
}
