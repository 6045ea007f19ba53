//! Reasoning service interface and providers.
//!
//! One [`ReasoningClient`] implementation per provider, selected by
//! configuration. Callers record token usage through a [`UsageTally`].

mod anthropic;
mod client;
mod config;
mod ollama;
mod openai;
mod usage;

use std::time::Duration;

pub use anthropic::AnthropicClient;
pub use client::{
    complete_json, complete_json_retrying, complete_retrying, complete_tracked, extract_json,
    parse_json, CompletionRequest, CompletionResponse, ModelTier, ReasoningClient,
    ReasoningError, TokenUsage,
};
pub use config::{create_reasoning_client, ReasoningConfig, ReasoningProvider};
pub use ollama::OllamaClient;
pub use openai::OpenAiClient;
pub use usage::{cost_usd, price_for, ModelPrice, UsageTally};

pub(crate) fn map_send_error(e: reqwest::Error, timeout: Duration) -> ReasoningError {
    if e.is_timeout() {
        ReasoningError::Timeout(timeout)
    } else {
        ReasoningError::Http(e.to_string())
    }
}
