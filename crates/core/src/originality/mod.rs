//! Originality enforcement: bounded check/rewrite cycles.

mod enforcer;
mod sampler;

pub use enforcer::{CheckKind, CheckOutcome, Decision, OriginalityLoop, Verdict};
pub use sampler::extract_samples;

use serde::{Deserialize, Serialize};

use crate::reasoning::ReasoningError;
use crate::retry::{Classify, FailureClass};
use crate::verification::VerificationError;

/// What to do when the check budget is spent below threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExhaustedPolicy {
    /// Deliver the best version anyway and tell the operator.
    #[default]
    DeliverBestEffort,
    /// Move the item to Error.
    Fail,
}

/// Originality loop configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OriginalityConfig {
    /// Minimum uniqueness percentage when the item does not specify one.
    #[serde(default = "default_threshold")]
    pub threshold: f32,
    /// Full verification rounds per document (so at most one fewer rewrites).
    #[serde(default = "default_max_checks")]
    pub max_checks: u32,
    #[serde(default = "default_true")]
    pub sampling_enabled: bool,
    #[serde(default = "default_sample_size")]
    pub sample_size: usize,
    #[serde(default = "default_excerpt_min_chars")]
    pub excerpt_min_chars: usize,
    #[serde(default = "default_excerpt_max_chars")]
    pub excerpt_max_chars: usize,
    /// Sampled average must beat the threshold by this much to skip the full check.
    #[serde(default = "default_sample_margin")]
    pub sample_margin: f32,
    /// Shorter texts always get a full check.
    #[serde(default = "default_min_sample_text_chars")]
    pub min_sample_text_chars: usize,
    #[serde(default = "default_max_passages")]
    pub max_passages_per_round: usize,
    #[serde(default = "default_rewrite_chunk_chars")]
    pub rewrite_chunk_chars: usize,
    #[serde(default = "default_rewrite_temperature")]
    pub rewrite_temperature: f32,
    #[serde(default)]
    pub on_exhausted: ExhaustedPolicy,
}

fn default_threshold() -> f32 {
    50.0
}

fn default_max_checks() -> u32 {
    3
}

fn default_true() -> bool {
    true
}

fn default_sample_size() -> usize {
    3
}

fn default_excerpt_min_chars() -> usize {
    1500
}

fn default_excerpt_max_chars() -> usize {
    2000
}

fn default_sample_margin() -> f32 {
    5.0
}

fn default_min_sample_text_chars() -> usize {
    5000
}

fn default_max_passages() -> usize {
    3
}

fn default_rewrite_chunk_chars() -> usize {
    14_000
}

fn default_rewrite_temperature() -> f32 {
    0.8
}

impl Default for OriginalityConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            max_checks: default_max_checks(),
            sampling_enabled: default_true(),
            sample_size: default_sample_size(),
            excerpt_min_chars: default_excerpt_min_chars(),
            excerpt_max_chars: default_excerpt_max_chars(),
            sample_margin: default_sample_margin(),
            min_sample_text_chars: default_min_sample_text_chars(),
            max_passages_per_round: default_max_passages(),
            rewrite_chunk_chars: default_rewrite_chunk_chars(),
            rewrite_temperature: default_rewrite_temperature(),
            on_exhausted: ExhaustedPolicy::default(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum OriginalityError {
    #[error("verification failed: {0}")]
    Verification(#[from] VerificationError),

    #[error("rewrite failed: {0}")]
    Rewrite(#[from] ReasoningError),

    #[error("document has no text to check")]
    EmptyDocument,
}

impl Classify for OriginalityError {
    /// Calls are retried inside the loop; an unverified document is never
    /// accepted, so whatever escapes fails the stage.
    fn failure_class(&self) -> FailureClass {
        FailureClass::Permanent
    }
}
