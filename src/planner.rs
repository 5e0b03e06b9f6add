//! Natural-language request → raw plan value.
//!
//! The planner shows the backend the plan schema and the user's request and
//! expects JSON back. Its output is NOT trusted: whatever comes back goes
//! through `validator::validate` like any plan loaded from a file.

use anyhow::{Context, Result};
use serde_json::Value;
use tracing::debug;

use crate::llm::{LlmClient, Message};
use crate::plan::PLAN_SCHEMA_JSON;

/// Planning instructions shared by every backend.
const SYSTEM_PROMPT: &str = "\
You are a planning function that outputs ONLY JSON matching the provided schema. \
Allowed skills: create_file, write_text, append_text, read_file, list_dir, \
move_file, copy_file, delete_file, replace_text, remove_text. \
Preserve user-provided filenames/paths verbatim; do not rename or add folders. \
Never use absolute paths; always use relative paths under the sandbox root. \
Prefer small, safe steps. Use 'on_fail':'abort' unless the user requests otherwise.";

/// Asks the backend to produce a plan for a free-text request.
///
/// Returns the raw JSON value — untrusted until validated.
pub async fn plan_from_prompt(client: &dyn LlmClient, request: &str) -> Result<Value> {
    let user = format!(
        "Schema:\n{PLAN_SCHEMA_JSON}\n\nUser request:\n{request}\nReturn ONLY the JSON plan."
    );
    let messages = [Message {
        role: "user".to_string(),
        content: user,
    }];

    let response = client
        .complete(SYSTEM_PROMPT, &messages)
        .await
        .context("planner backend call failed")?;

    debug!(
        "Planner replied with {} chars ({} tokens used)",
        response.text.len(),
        response.input_tokens + response.output_tokens
    );

    let body = strip_code_fences(&response.text);
    serde_json::from_str(body).with_context(|| {
        format!(
            "planner did not return valid JSON: {}",
            preview(&response.text)
        )
    })
}

/// Models sometimes wrap the JSON in a markdown code fence despite the
/// instructions. Peel it off before parsing.
fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let inner = inner.strip_prefix("json").unwrap_or(inner);
    let inner = inner.strip_suffix("```").unwrap_or(inner);
    inner.trim()
}

fn preview(text: &str) -> String {
    let short: String = text.chars().take(120).collect();
    if short.len() < text.len() {
        format!("{short}…")
    } else {
        short
    }
}
