//! Originality verification interface.
//!
//! Providers follow a submit-then-poll pattern; [`check_text`] drives it
//! with a poll interval and an overall timeout.

mod etxt;
mod textru;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::retry::{Classify, FailureClass};

pub use etxt::EtxtChecker;
pub use textru::TextRuChecker;

#[derive(Debug, thiserror::Error)]
pub enum VerificationError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("service unavailable (status {0})")]
    Unavailable(u16),

    #[error("service error {code}: {message}")]
    Api { code: i64, message: String },

    #[error("check not finished after {0:?}")]
    Timeout(Duration),

    #[error("nothing to check")]
    EmptyText,

    #[error("Not configured")]
    NotConfigured,
}

impl Classify for VerificationError {
    fn failure_class(&self) -> FailureClass {
        match self {
            VerificationError::Http(_)
            | VerificationError::Unavailable(_)
            | VerificationError::Timeout(_) => FailureClass::Transient,
            VerificationError::Api { .. }
            | VerificationError::EmptyText
            | VerificationError::NotConfigured => FailureClass::Permanent,
        }
    }
}

/// Provider-specific id of a submitted check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckHandle(pub String);

/// A source that matched part of the checked text.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MatchedFragment {
    pub source: String,
    /// Zero-based positions of matched words in the submitted text.
    pub word_positions: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckReport {
    /// Uniqueness percentage, 0-100.
    pub uniqueness: f32,
    #[serde(default)]
    pub matches: Vec<MatchedFragment>,
}

impl CheckReport {
    pub fn new(uniqueness: f32) -> Self {
        Self {
            uniqueness,
            matches: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CheckStatus {
    Pending,
    Done(CheckReport),
}

/// An originality checking service.
#[async_trait]
pub trait OriginalityChecker: Send + Sync {
    fn name(&self) -> &str;

    async fn submit(&self, text: &str) -> Result<CheckHandle, VerificationError>;

    async fn poll(&self, handle: &CheckHandle) -> Result<CheckStatus, VerificationError>;
}

/// Submit `text` and poll until a result arrives or `timeout` elapses.
///
/// Transient poll errors are logged and polling continues.
pub async fn check_text(
    checker: &dyn OriginalityChecker,
    text: &str,
    poll_interval: Duration,
    timeout: Duration,
) -> Result<CheckReport, VerificationError> {
    if text.trim().is_empty() {
        return Err(VerificationError::EmptyText);
    }

    let handle = checker.submit(text).await?;
    debug!(checker = checker.name(), handle = %handle.0, chars = text.len(), "Check submitted");

    let deadline = Instant::now() + timeout;
    loop {
        tokio::time::sleep(poll_interval).await;

        match checker.poll(&handle).await {
            Ok(CheckStatus::Done(report)) => return Ok(report),
            Ok(CheckStatus::Pending) => {}
            Err(e) if e.is_transient() => {
                warn!(checker = checker.name(), "Poll failed, will retry: {}", e);
            }
            Err(e) => return Err(e),
        }

        if Instant::now() >= deadline {
            return Err(VerificationError::Timeout(timeout));
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationProvider {
    #[default]
    Textru,
    Etxt,
}

/// Verification service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationConfig {
    #[serde(default)]
    pub provider: VerificationProvider,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_base: Option<String>,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// Give up on a single check after this long.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_poll_interval() -> u64 {
    10
}

fn default_timeout() -> u64 {
    600 // 60 polls
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            provider: VerificationProvider::default(),
            api_key: None,
            api_base: None,
            poll_interval_secs: default_poll_interval(),
            timeout_secs: default_timeout(),
        }
    }
}

impl VerificationConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

pub fn create_checker(
    config: &VerificationConfig,
) -> Result<Arc<dyn OriginalityChecker>, VerificationError> {
    let key = config
        .api_key
        .clone()
        .ok_or(VerificationError::NotConfigured)?;
    let base = config.api_base.as_deref();

    let checker: Arc<dyn OriginalityChecker> = match config.provider {
        VerificationProvider::Textru => {
            let checker = TextRuChecker::new(key);
            Arc::new(match base {
                Some(base) => checker.with_api_base(base),
                None => checker,
            })
        }
        VerificationProvider::Etxt => {
            let checker = EtxtChecker::new(key);
            Arc::new(match base {
                Some(base) => checker.with_api_base(base),
                None => checker,
            })
        }
    };
    Ok(checker)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct ScriptedChecker {
        polls: Mutex<Vec<Result<CheckStatus, VerificationError>>>,
    }

    #[async_trait]
    impl OriginalityChecker for ScriptedChecker {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn submit(&self, _text: &str) -> Result<CheckHandle, VerificationError> {
            Ok(CheckHandle("h-1".to_string()))
        }

        async fn poll(&self, _handle: &CheckHandle) -> Result<CheckStatus, VerificationError> {
            let mut polls = self.polls.lock().unwrap();
            if polls.is_empty() {
                Ok(CheckStatus::Pending)
            } else {
                polls.remove(0)
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_polls_until_done() {
        let checker = ScriptedChecker {
            polls: Mutex::new(vec![
                Ok(CheckStatus::Pending),
                Err(VerificationError::Unavailable(503)),
                Ok(CheckStatus::Done(CheckReport::new(72.5))),
            ]),
        };

        let start = Instant::now();
        let report = check_text(&checker, "some text", Duration::from_secs(10), Duration::from_secs(600))
            .await
            .unwrap();
        assert_eq!(report.uniqueness, 72.5);
        assert_eq!(start.elapsed(), Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out() {
        let checker = ScriptedChecker {
            polls: Mutex::new(Vec::new()),
        };
        let err = check_text(&checker, "text", Duration::from_secs(10), Duration::from_secs(60))
            .await
            .unwrap_err();
        assert!(matches!(err, VerificationError::Timeout(_)));
        assert!(err.is_transient());
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_poll_error_stops() {
        let checker = ScriptedChecker {
            polls: Mutex::new(vec![Err(VerificationError::Api {
                code: 142,
                message: "bad key".to_string(),
            })]),
        };
        let err = check_text(&checker, "text", Duration::from_secs(1), Duration::from_secs(60))
            .await
            .unwrap_err();
        assert!(!err.is_transient());
    }

    #[test]
    fn test_create_checker_by_provider() {
        let mut config = VerificationConfig {
            provider: VerificationProvider::Etxt,
            api_key: Some("tok".to_string()),
            ..Default::default()
        };
        assert_eq!(create_checker(&config).unwrap().name(), "etxt");

        config.provider = VerificationProvider::Textru;
        assert_eq!(create_checker(&config).unwrap().name(), "textru");

        config.api_key = None;
        assert!(matches!(
            create_checker(&config).err(),
            Some(VerificationError::NotConfigured)
        ));
    }

    #[test]
    fn test_provider_names_in_config() {
        let config: VerificationConfig =
            serde_json::from_value(serde_json::json!({"provider": "etxt"})).unwrap();
        assert_eq!(config.provider, VerificationProvider::Etxt);
    }

    #[tokio::test]
    async fn test_empty_text_rejected() {
        let checker = ScriptedChecker {
            polls: Mutex::new(Vec::new()),
        };
        let err = check_text(&checker, "   ", Duration::from_secs(1), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, VerificationError::EmptyText));
    }
}
