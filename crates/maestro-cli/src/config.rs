use anyhow::Context;
use maestro_agent::ModelConfig;
use maestro_core::{MaestroError, MaestroResult};
use maestro_orchestrator::OrchestratorConfig;
use serde::Deserialize;
use std::path::Path;

/// Environment variable that supplies the model API key when the config
/// file leaves it empty.
pub const API_KEY_ENV: &str = "MAESTRO_API_KEY";

/// Contents of `maestro.toml`.
#[derive(Debug, Deserialize)]
pub struct MaestroConfig {
    pub model: ModelConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub security: SecurityConfig,
}

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct SecurityConfig {
    /// Keys accepted on `/api` routes. Empty disables auth.
    #[serde(default)]
    pub api_keys: Vec<String>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

impl MaestroConfig {
    /// Read and parse `path`, then fill the API key from the environment.
    pub async fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file '{}'", path.display()))?;
        let mut config = Self::parse(&raw)
            .with_context(|| format!("Invalid config file '{}'", path.display()))?;
        config.apply_api_key(std::env::var(API_KEY_ENV).ok());
        Ok(config)
    }

    /// Parse and validate a config document.
    pub fn parse(raw: &str) -> MaestroResult<Self> {
        let config: Self =
            toml::from_str(raw).map_err(|e| MaestroError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> MaestroResult<()> {
        if self.model.model_id.trim().is_empty() {
            return Err(MaestroError::Config("model.model_id must not be empty".into()));
        }
        if self.orchestrator.max_parallel_calls == 0 {
            return Err(MaestroError::Config(
                "orchestrator.max_parallel_calls must be at least 1".into(),
            ));
        }
        if self.orchestrator.call_timeout_ms == 0 {
            return Err(MaestroError::Config(
                "orchestrator.call_timeout_ms must be positive".into(),
            ));
        }
        Ok(())
    }

    /// An empty `model.api_key` takes `key`.
    pub fn apply_api_key(&mut self, key: Option<String>) {
        if self.model.api_key.is_empty() {
            if let Some(key) = key.filter(|k| !k.trim().is_empty()) {
                self.model.api_key = key;
            }
        }
    }
}
