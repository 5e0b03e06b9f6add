//! `LlmClient` trait — abstraction over LLM backends.
//!
//! Providers (Ollama, Anthropic, …) implement this trait so the planner can
//! be pointed at any supported backend via the `[llm] provider` config
//! field. The engine treats whatever text comes back as untrusted input.

use anyhow::Result;
use async_trait::async_trait;

use super::{LlmResponse, Message};

/// Abstraction over LLM backends.
///
/// Each provider translates the shared message types into its own wire
/// format and normalizes responses back into [`LlmResponse`].
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Sends a conversation to the LLM and returns the response.
    async fn complete(&self, system_prompt: &str, messages: &[Message]) -> Result<LlmResponse>;

    /// Human-readable description of the provider and model.
    ///
    /// Used in status output, e.g. `"ollama (llama3)"`.
    fn description(&self) -> String;
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Compile-time verification that `LlmClient` is object-safe.
    #[test]
    fn test_llm_client_is_object_safe() {
        fn _assert_object_safe(_: &dyn LlmClient) {}
    }
}
