//! Failure classification and the shared retry-with-backoff policy.
//!
//! Every collaborator error type implements [`Classify`], so a single
//! [`RetryPolicy`] can decide whether a failed call deserves another try.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::metrics;

/// How a failure should be treated by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    /// Timeouts, rate limits, momentary unavailability. Worth retrying.
    Transient,
    /// Malformed request, explicit rejection, exhausted quota. Never retried.
    Permanent,
    /// The host platform signalled that we are being blocked.
    BanDetected,
}

impl FailureClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureClass::Transient => "transient",
            FailureClass::Permanent => "permanent",
            FailureClass::BanDetected => "ban_detected",
        }
    }
}

/// Errors that know which [`FailureClass`] they belong to.
pub trait Classify {
    fn failure_class(&self) -> FailureClass;

    fn is_transient(&self) -> bool {
        self.failure_class() == FailureClass::Transient
    }
}

/// Retry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries after the first attempt for transient failures.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay before the first retry (milliseconds). Doubles on every retry.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Upper bound for a single backoff delay (milliseconds).
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    5_000
}

fn default_max_delay_ms() -> u64 {
    60_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

/// Exponential backoff policy applied around collaborator calls.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_retries: u32,
    base_delay: Duration,
    max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(
            config.max_retries,
            Duration::from_millis(config.base_delay_ms),
            Duration::from_millis(config.max_delay_ms),
        )
    }

    /// A policy that never retries. Handy in tests.
    pub fn none() -> Self {
        Self::new(0, Duration::ZERO, Duration::ZERO)
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Backoff before retry number `retry` (1-based).
    pub fn backoff(&self, retry: u32) -> Duration {
        let exp = retry.saturating_sub(1).min(31);
        let delay = self.base_delay.saturating_mul(1u32 << exp);
        delay.min(self.max_delay)
    }

    /// Run `op` until it succeeds, fails non-transiently, or retries run out.
    ///
    /// The last error is returned unchanged; callers treat an exhausted
    /// transient error as permanent.
    pub async fn run<T, E, F, Fut>(&self, operation: &str, mut op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Classify + Display,
    {
        let mut retry = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && retry < self.max_retries => {
                    retry += 1;
                    let delay = self.backoff(retry);
                    warn!(
                        operation,
                        retry,
                        delay_ms = delay.as_millis() as u64,
                        "Transient failure, retrying: {}",
                        e
                    );
                    metrics::RETRY_ATTEMPTS.with_label_values(&[operation]).inc();
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    debug!(
                        operation,
                        class = e.failure_class().as_str(),
                        "Giving up: {}",
                        e
                    );
                    return Err(e);
                }
            }
        }
    }
}
