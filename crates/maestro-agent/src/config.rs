use serde::{Deserialize, Serialize};

/// Which HTTP API the [`LlmInvoker`](crate::LlmInvoker) talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    /// Anthropic Messages API.
    Claude,
    /// OpenAI chat completions.
    OpenAi,
    /// OpenRouter (OpenAI-compatible).
    OpenRouter,
    /// Groq cloud inference (OpenAI-compatible).
    Groq,
}

/// Model settings shared by every role the invoker serves.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// API family to call.
    pub provider: LlmProvider,
    /// Provider-specific model identifier.
    pub model_id: String,
    /// API key. Left empty in config files and filled from the environment.
    #[serde(default)]
    pub api_key: String,
    /// Overrides the provider's default base URL (proxies, tests).
    #[serde(default)]
    pub api_base_url: Option<String>,
    /// Sampling temperature.
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Completion token cap per call.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_temperature() -> f32 {
    0.4
}

fn default_max_tokens() -> u32 {
    4096
}

impl ModelConfig {
    /// Base URL for API calls, honouring `api_base_url` when set.
    pub fn base_url(&self) -> &str {
        if let Some(url) = &self.api_base_url {
            url.trim_end_matches('/')
        } else {
            match self.provider {
                LlmProvider::Claude => "https://api.anthropic.com",
                LlmProvider::OpenAi => "https://api.openai.com",
                LlmProvider::OpenRouter => "https://openrouter.ai/api",
                LlmProvider::Groq => "https://api.groq.com/openai",
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_serialization() {
        assert_eq!(serde_json::to_string(&LlmProvider::OpenAi).unwrap(), "\"openai\"");
        let parsed: LlmProvider = serde_json::from_str("\"openrouter\"").unwrap();
        assert_eq!(parsed, LlmProvider::OpenRouter);
    }

    #[test]
    fn test_deserialization_with_defaults() {
        let config: ModelConfig = toml::from_str(
            r#"
            provider = "claude"
            model_id = "claude-sonnet-4-20250514"
            "#,
        )
        .unwrap();
        assert_eq!(config.provider, LlmProvider::Claude);
        assert!(config.api_key.is_empty());
        assert_eq!(config.max_tokens, 4096);
        assert_eq!(config.base_url(), "https://api.anthropic.com");
    }

    #[test]
    fn test_base_url_override_strips_trailing_slash() {
        let config = ModelConfig {
            provider: LlmProvider::Groq,
            model_id: "llama".into(),
            api_key: String::new(),
            api_base_url: Some("http://localhost:8080/".into()),
            temperature: 0.0,
            max_tokens: 16,
        };
        assert_eq!(config.base_url(), "http://localhost:8080");
    }
}
