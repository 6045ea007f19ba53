//! Reasoning client abstraction.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::UsageTally;
use crate::retry::{Classify, FailureClass, RetryPolicy};

/// Error type for reasoning operations.
#[derive(Debug, thiserror::Error)]
pub enum ReasoningError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("JSON error: {0}")]
    Json(String),

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Not configured")]
    NotConfigured,
}

impl Classify for ReasoningError {
    fn failure_class(&self) -> FailureClass {
        match self {
            ReasoningError::Http(_) | ReasoningError::Timeout(_) => FailureClass::Transient,
            // Malformed model output usually succeeds on a second sample.
            ReasoningError::Json(_) => FailureClass::Transient,
            ReasoningError::Api { status, .. } => match status {
                408 | 429 | 529 => FailureClass::Transient,
                s if *s >= 500 => FailureClass::Transient,
                _ => FailureClass::Permanent,
            },
            ReasoningError::NotConfigured => FailureClass::Permanent,
        }
    }
}

/// Token usage statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.input_tokens as u64 + self.output_tokens as u64
    }
}

/// Which model of a provider a call should use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelTier {
    /// Cheap model for scoring and classification.
    Fast,
    /// Strong model for writing.
    Main,
}

/// Request for a completion.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    /// System prompt (instructions for the model)
    pub system: Option<String>,
    /// User message
    pub prompt: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub tier: ModelTier,
    /// Attribution label for usage accounting ("score", "outline", ...).
    pub purpose: String,
}

impl CompletionRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            system: None,
            prompt: prompt.into(),
            max_tokens: 1024,
            temperature: 0.7,
            tier: ModelTier::Main,
            purpose: "general".to_string(),
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_tier(mut self, tier: ModelTier) -> Self {
        self.tier = tier;
        self
    }

    pub fn with_purpose(mut self, purpose: impl Into<String>) -> Self {
        self.purpose = purpose.into();
        self
    }
}

/// Response from a completion.
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub text: String,
    pub usage: TokenUsage,
    /// Model that served the call.
    pub model: String,
}

/// A hosted (or local) reasoning service.
#[async_trait]
pub trait ReasoningClient: Send + Sync {
    /// Provider name (e.g., "anthropic", "openai", "ollama")
    fn provider(&self) -> &str;

    /// Model used for the given tier.
    fn model(&self, tier: ModelTier) -> &str;

    async fn complete(&self, request: CompletionRequest)
        -> Result<CompletionResponse, ReasoningError>;
}

/// Run a completion and record its usage in `tally`.
pub async fn complete_tracked(
    client: &dyn ReasoningClient,
    request: CompletionRequest,
    tally: &mut UsageTally,
) -> Result<CompletionResponse, ReasoningError> {
    let purpose = request.purpose.clone();
    let response = client.complete(request).await?;
    tally.record(client.provider(), &purpose, &response);
    Ok(response)
}

/// Run a completion and parse the response as JSON.
///
/// Models often wrap JSON in prose or code fences; the first JSON object or
/// array in the text is used.
pub async fn complete_json<T: DeserializeOwned>(
    client: &dyn ReasoningClient,
    request: CompletionRequest,
    tally: &mut UsageTally,
) -> Result<T, ReasoningError> {
    let response = complete_tracked(client, request, tally).await?;
    parse_json(&response.text)
}

/// [`complete_tracked`] under a retry policy.
///
/// Usage of every attempt that got a response is recorded, including
/// attempts whose output was discarded.
pub async fn complete_retrying(
    client: &dyn ReasoningClient,
    retry: &RetryPolicy,
    request: CompletionRequest,
    tally: &mut UsageTally,
) -> Result<CompletionResponse, ReasoningError> {
    complete_json_retrying_with(client, retry, request, tally, |r| Ok(r.clone())).await
}

/// [`complete_json`] under a retry policy. Unparseable output is retried.
pub async fn complete_json_retrying<T: DeserializeOwned>(
    client: &dyn ReasoningClient,
    retry: &RetryPolicy,
    request: CompletionRequest,
    tally: &mut UsageTally,
) -> Result<T, ReasoningError> {
    complete_json_retrying_with(client, retry, request, tally, |r| parse_json(&r.text)).await
}

async fn complete_json_retrying_with<T, F>(
    client: &dyn ReasoningClient,
    retry: &RetryPolicy,
    request: CompletionRequest,
    tally: &mut UsageTally,
    parse: F,
) -> Result<T, ReasoningError>
where
    F: Fn(&CompletionResponse) -> Result<T, ReasoningError>,
{
    let purpose = request.purpose.clone();
    let served = Mutex::new(Vec::new());

    let result = retry
        .run(&purpose, || async {
            let response = client.complete(request.clone()).await?;
            let parsed = parse(&response);
            served.lock().unwrap().push(response);
            parsed
        })
        .await;

    for response in served.into_inner().unwrap_or_default() {
        tally.record(client.provider(), &purpose, &response);
    }
    result
}

pub fn parse_json<T: DeserializeOwned>(text: &str) -> Result<T, ReasoningError> {
    let candidate = extract_json(text).unwrap_or(text);
    serde_json::from_str(candidate).map_err(|e| {
        let preview: String = text.chars().take(200).collect();
        ReasoningError::Json(format!("{}: {}", e, preview))
    })
}

/// Locate the outermost JSON object or array in `text`.
pub fn extract_json(text: &str) -> Option<&str> {
    let start = text.find(['{', '['])?;
    let close = if text[start..].starts_with('{') { '}' } else { ']' };
    let end = text.rfind(close)?;
    (end > start).then(|| &text[start..=end])
}
