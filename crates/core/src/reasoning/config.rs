//! Reasoning provider configuration.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{AnthropicClient, OllamaClient, OpenAiClient, ReasoningClient, ReasoningError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasoningProvider {
    Anthropic,
    #[default]
    #[serde(rename = "openai")]
    OpenAi,
    Ollama,
}

impl ReasoningProvider {
    pub fn requires_api_key(&self) -> bool {
        !matches!(self, ReasoningProvider::Ollama)
    }
}

/// Reasoning client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasoningConfig {
    #[serde(default)]
    pub provider: ReasoningProvider,
    /// Model for writing, outlining and rewriting.
    #[serde(default = "default_main_model")]
    pub main_model: String,
    /// Model for scoring and classification.
    #[serde(default = "default_fast_model")]
    pub fast_model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Custom API base URL (for proxies or self-hosted).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_base: Option<String>,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_main_model() -> String {
    "gpt-4o".to_string()
}

fn default_fast_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_timeout() -> u64 {
    120
}

impl Default for ReasoningConfig {
    fn default() -> Self {
        Self {
            provider: ReasoningProvider::default(),
            main_model: default_main_model(),
            fast_model: default_fast_model(),
            api_key: None,
            api_base: None,
            timeout_secs: default_timeout(),
        }
    }
}

/// Build the configured reasoning client.
pub fn create_reasoning_client(
    config: &ReasoningConfig,
) -> Result<Arc<dyn ReasoningClient>, ReasoningError> {
    let timeout = Duration::from_secs(config.timeout_secs);
    let api_key = || config.api_key.clone().ok_or(ReasoningError::NotConfigured);

    let client: Arc<dyn ReasoningClient> = match config.provider {
        ReasoningProvider::Anthropic => {
            let mut client =
                AnthropicClient::new(api_key()?, &config.main_model, &config.fast_model)
                    .with_timeout(timeout);
            if let Some(ref base) = config.api_base {
                client = client.with_api_base(base);
            }
            Arc::new(client)
        }
        ReasoningProvider::OpenAi => {
            let mut client = OpenAiClient::new(api_key()?, &config.main_model, &config.fast_model)
                .with_timeout(timeout);
            if let Some(ref base) = config.api_base {
                client = client.with_api_base(base);
            }
            Arc::new(client)
        }
        ReasoningProvider::Ollama => {
            let mut client =
                OllamaClient::new(&config.main_model, &config.fast_model).with_timeout(timeout);
            if let Some(ref base) = config.api_base {
                client = client.with_api_base(base);
            }
            Arc::new(client)
        }
    };

    Ok(client)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reasoning::ModelTier;

    #[test]
    fn test_deserialize() {
        let toml = r#"
            provider = "anthropic"
            main_model = "claude-sonnet-4-20250514"
            fast_model = "claude-3-5-haiku-20241022"
            api_key = "sk-ant"
        "#;
        let config: ReasoningConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.provider, ReasoningProvider::Anthropic);
        assert_eq!(config.timeout_secs, 120);

        let client = create_reasoning_client(&config).unwrap();
        assert_eq!(client.provider(), "anthropic");
        assert_eq!(client.model(ModelTier::Fast), "claude-3-5-haiku-20241022");
    }

    #[test]
    fn test_openai_requires_key() {
        let config = ReasoningConfig::default();
        assert!(matches!(
            create_reasoning_client(&config),
            Err(ReasoningError::NotConfigured)
        ));
    }

    #[test]
    fn test_ollama_needs_no_key() {
        let config: ReasoningConfig = toml::from_str(
            r#"
            provider = "ollama"
            main_model = "llama3"
            fast_model = "llama3"
        "#,
        )
        .unwrap();
        assert!(!config.provider.requires_api_key());
        assert_eq!(create_reasoning_client(&config).unwrap().provider(), "ollama");
    }
}
