use super::LlmBackend;
use crate::config::ModelConfig;
use async_trait::async_trait;
use maestro_core::{MaestroError, MaestroResult};

/// Claude (Anthropic Messages API) backend.
pub struct ClaudeBackend {
    config: ModelConfig,
    http: reqwest::Client,
}

impl ClaudeBackend {
    /// Create a backend with its own HTTP client.
    pub fn new(config: ModelConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl LlmBackend for ClaudeBackend {
    async fn complete(&self, system_prompt: &str, user_message: &str) -> MaestroResult<String> {
        let url = format!("{}/v1/messages", self.config.base_url());

        let body = serde_json::json!({
            "model": self.config.model_id,
            "max_tokens": self.config.max_tokens,
            "temperature": self.config.temperature,
            "system": system_prompt,
            "messages": [{ "role": "user", "content": user_message }],
        });

        let resp = self
            .http
            .post(&url)
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| MaestroError::Http(e.to_string()))?;

        let status = resp.status();
        let resp_body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| MaestroError::Http(e.to_string()))?;

        if !status.is_success() {
            return Err(MaestroError::Http(format!(
                "Claude API error {status}: {resp_body}"
            )));
        }

        parse_claude_response(&resp_body)
    }
}

/// Concatenate every text block of a Messages API response.
pub fn parse_claude_response(body: &serde_json::Value) -> MaestroResult<String> {
    let blocks = body["content"]
        .as_array()
        .ok_or_else(|| MaestroError::Http(format!("Claude response without content: {body}")))?;

    let text: Vec<&str> = blocks
        .iter()
        .filter(|b| b["type"] == "text")
        .filter_map(|b| b["text"].as_str())
        .collect();

    Ok(text.join("\n"))
}
