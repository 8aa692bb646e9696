//! LLM chat client abstraction.
//!
//! All pipeline stages that need a model go through [`LlmClient`], so tests
//! substitute canned responses. The production implementation is
//! [`OpenAiChatClient`], which talks to any OpenAI-compatible chat
//! completions endpoint.
//!
//! # Retry Strategy
//!
//! - HTTP 429 and 5xx → retry with exponential backoff (1s, 2s, 4s, ...)
//! - other 4xx → fail immediately
//! - network errors → retry
//!
//! Models frequently wrap JSON answers in markdown fences; the parsing
//! helpers here tolerate that. A response that still fails to parse is a
//! recoverable, per-call condition: callers degrade, they do not abort
//! the task.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::time::Duration;

use crate::config::LlmConfig;

#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Send one prompt and return the raw text of the first completion.
    async fn chat(&self, prompt: &str, system_prompt: Option<&str>) -> Result<String>;
}

/// Chat client for OpenAI-compatible endpoints.
pub struct OpenAiChatClient {
    config: LlmConfig,
    client: reqwest::Client,
}

impl OpenAiChatClient {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        if std::env::var(&config.api_key_env).is_err() {
            bail!("{} environment variable not set", config.api_key_env);
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            config: config.clone(),
            client,
        })
    }
}

#[async_trait]
impl LlmClient for OpenAiChatClient {
    async fn chat(&self, prompt: &str, system_prompt: Option<&str>) -> Result<String> {
        let api_key = std::env::var(&self.config.api_key_env)
            .map_err(|_| anyhow::anyhow!("{} not set", self.config.api_key_env))?;

        let mut messages = Vec::new();
        if let Some(system) = system_prompt {
            messages.push(serde_json::json!({ "role": "system", "content": system }));
        }
        messages.push(serde_json::json!({ "role": "user", "content": prompt }));

        let body = serde_json::json!({
            "model": self.config.model,
            "messages": messages,
        });

        let mut last_err = None;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .post(&self.config.endpoint)
                .header("Authorization", format!("Bearer {}", api_key))
                .header("Content-Type", "application/json")
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value = response.json().await?;
                        return extract_completion(&json);
                    }

                    if status.as_u16() == 429 || status.is_server_error() {
                        let body_text = response.text().await.unwrap_or_default();
                        last_err =
                            Some(anyhow::anyhow!("LLM API error {}: {}", status, body_text));
                        continue;
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    bail!("LLM API error {}: {}", status, body_text);
                }
                Err(e) => {
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("LLM call failed after retries")))
    }
}

fn extract_completion(json: &serde_json::Value) -> Result<String> {
    json.get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| anyhow::anyhow!("Invalid LLM response: missing choices[0].message.content"))
}

/// Remove a surrounding markdown code fence, if present.
pub fn strip_code_fences(text: &str) -> String {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed.to_string();
    };
    // Drop the language tag on the opening fence line.
    let rest = match rest.find('\n') {
        Some(pos) => &rest[pos + 1..],
        None => rest,
    };
    let rest = rest.trim_end();
    let rest = rest.strip_suffix("```").unwrap_or(rest);
    rest.trim().to_string()
}

/// Parse a model response as JSON, tolerating fences and surrounding prose.
pub fn parse_json_response(text: &str) -> Result<serde_json::Value> {
    let cleaned = strip_code_fences(text);
    if let Ok(value) = serde_json::from_str(&cleaned) {
        return Ok(value);
    }
    // Last resort: the outermost braces in the text.
    if let (Some(start), Some(end)) = (cleaned.find('{'), cleaned.rfind('}')) {
        if start < end {
            if let Ok(value) = serde_json::from_str(&cleaned[start..=end]) {
                return Ok(value);
            }
        }
    }
    bail!("response is not valid JSON")
}

/// Read an array of strings at `key`, treating anything malformed as empty.
pub fn string_list(value: &serde_json::Value, key: &str) -> Vec<String> {
    value
        .get(key)
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str().map(|s| s.to_string()))
                .collect()
        })
        .unwrap_or_default()
}
