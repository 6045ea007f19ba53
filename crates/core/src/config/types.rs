use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::PathBuf;

use crate::actors::SiteConfig;
use crate::assembly::ArtifactsConfig;
use crate::generation::GenerationConfig;
use crate::orchestrator::OrchestratorConfig;
use crate::originality::OriginalityConfig;
use crate::pacing::PacingConfig;
use crate::pricing::PricingConfig;
use crate::reasoning::{ReasoningConfig, ReasoningProvider};
use crate::scheduler::SchedulerConfig;
use crate::verification::{VerificationConfig, VerificationProvider};

/// Root configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub pacing: PacingConfig,
    #[serde(default)]
    pub pricing: PricingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub originality: OriginalityConfig,
    #[serde(default)]
    pub reasoning: ReasoningConfig,
    #[serde(default)]
    pub verification: VerificationConfig,
    /// HTTP site bridge. Without it the service has no platform to act on.
    #[serde(default)]
    pub site: Option<SiteConfig>,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub artifacts: ArtifactsConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: IpAddr,
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

fn default_host() -> IpAddr {
    IpAddr::from([0, 0, 0, 0])
}

fn default_port() -> u16 {
    8080
}

/// Database configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("scrivener.db")
}

/// Sanitized config for API responses (secrets redacted)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub orchestrator: OrchestratorConfig,
    pub pacing: PacingConfig,
    pub pricing: PricingConfig,
    pub generation: GenerationConfig,
    pub originality: OriginalityConfig,
    pub reasoning: SanitizedReasoningConfig,
    pub verification: SanitizedVerificationConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub site: Option<SanitizedSiteConfig>,
    pub scheduler: SchedulerConfig,
    pub artifacts: ArtifactsConfig,
}

/// Sanitized reasoning config (API key hidden)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedReasoningConfig {
    pub provider: ReasoningProvider,
    pub main_model: String,
    pub fast_model: String,
    pub api_key_configured: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_base: Option<String>,
    pub timeout_secs: u64,
}

/// Sanitized verification config (API key hidden)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedVerificationConfig {
    pub provider: VerificationProvider,
    pub api_key_configured: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_base: Option<String>,
    pub poll_interval_secs: u64,
    pub timeout_secs: u64,
}

/// Sanitized site bridge config (token hidden)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedSiteConfig {
    pub base_url: String,
    pub token_configured: bool,
    pub timeout_secs: u64,
}

fn configured(secret: &Option<String>) -> bool {
    secret.as_deref().is_some_and(|s| !s.is_empty())
}

impl From<&Config> for SanitizedConfig {
    fn from(config: &Config) -> Self {
        Self {
            server: config.server.clone(),
            database: config.database.clone(),
            orchestrator: config.orchestrator.clone(),
            pacing: config.pacing.clone(),
            pricing: config.pricing.clone(),
            generation: config.generation.clone(),
            originality: config.originality.clone(),
            reasoning: SanitizedReasoningConfig {
                provider: config.reasoning.provider,
                main_model: config.reasoning.main_model.clone(),
                fast_model: config.reasoning.fast_model.clone(),
                api_key_configured: configured(&config.reasoning.api_key),
                api_base: config.reasoning.api_base.clone(),
                timeout_secs: config.reasoning.timeout_secs,
            },
            verification: SanitizedVerificationConfig {
                provider: config.verification.provider,
                api_key_configured: configured(&config.verification.api_key),
                api_base: config.verification.api_base.clone(),
                poll_interval_secs: config.verification.poll_interval_secs,
                timeout_secs: config.verification.timeout_secs,
            },
            site: config.site.as_ref().map(|s| SanitizedSiteConfig {
                base_url: s.base_url.clone(),
                token_configured: configured(&s.token),
                timeout_secs: s.timeout_secs,
            }),
            scheduler: config.scheduler.clone(),
            artifacts: config.artifacts.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::originality::ExhaustedPolicy;
    use crate::pacing::ActionKind;

    #[test]
    fn test_deserialize_empty_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.host.to_string(), "0.0.0.0");
        assert_eq!(config.database.path.to_str().unwrap(), "scrivener.db");
        assert_eq!(config.orchestrator.min_score, 60);
        assert_eq!(config.pacing.limit_for(ActionKind::Bid), Some(20));
        assert!(config.site.is_none());
    }

    #[test]
    fn test_deserialize_sections() {
        let toml = r#"
[server]
host = "127.0.0.1"
port = 9000

[orchestrator]
max_concurrent_items = 3

[pacing]
min_delay_ms = 1000
max_delay_ms = 2000

[pacing.daily_limits]
bid = 10
delivery = 30

[originality]
threshold = 70.0
on_exhausted = "fail"

[reasoning]
provider = "anthropic"
api_key = "sk-ant"

[site]
base_url = "http://127.0.0.1:9300"
token = "bridge-token"
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.orchestrator.max_concurrent_items, 3);
        assert_eq!(config.pacing.limit_for(ActionKind::Bid), Some(10));
        assert_eq!(config.pacing.limit_for(ActionKind::Delivery), Some(30));
        assert_eq!(config.originality.threshold, 70.0);
        assert_eq!(config.originality.on_exhausted, ExhaustedPolicy::Fail);
        assert_eq!(config.reasoning.provider, ReasoningProvider::Anthropic);
        assert_eq!(config.site.as_ref().unwrap().timeout_secs, 30);
    }

    #[test]
    fn test_sanitized_config_hides_secrets() {
        let mut config = Config::default();
        config.reasoning.api_key = Some("sk-secret".to_string());
        config.site = Some(SiteConfig {
            base_url: "http://127.0.0.1:9300".to_string(),
            token: Some("bridge-token".to_string()),
            timeout_secs: 30,
        });

        let sanitized = SanitizedConfig::from(&config);
        assert!(sanitized.reasoning.api_key_configured);
        assert!(!sanitized.verification.api_key_configured);
        assert!(sanitized.site.as_ref().unwrap().token_configured);

        let json = serde_json::to_string(&sanitized).unwrap();
        assert!(!json.contains("sk-secret"));
        assert!(!json.contains("bridge-token"));
    }

    #[test]
    fn test_empty_key_is_not_configured() {
        let mut config = Config::default();
        config.verification.api_key = Some(String::new());
        let sanitized = SanitizedConfig::from(&config);
        assert!(!sanitized.verification.api_key_configured);
    }
}
