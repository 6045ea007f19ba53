//! Orchestrator configuration.

use serde::{Deserialize, Serialize};

use crate::retry::RetryConfig;

/// Configuration for the work item orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Enable/disable the worker pool.
    /// When disabled, items are recorded by discovery but never advanced.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Maximum active (post-discovery, non-terminal) items, and the number of
    /// workers. Discovered items wait until a slot frees.
    #[serde(default = "default_max_items")]
    pub max_concurrent_items: usize,

    /// Maximum items in `Generating` at once.
    #[serde(default = "default_max_generations")]
    pub max_concurrent_generations: usize,

    /// Minimum score (0-100) to bid on an item.
    #[serde(default = "default_min_score")]
    pub min_score: u8,

    /// Work types rejected before scoring (case-insensitive substring match).
    #[serde(default)]
    pub banned_work_types: Vec<String>,

    /// How long to wait between bid status polls (seconds).
    #[serde(default = "default_bid_poll_interval")]
    pub bid_poll_interval_secs: u64,

    /// Pending jobs buffered for the worker pool.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Backoff policy applied around every collaborator call.
    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_enabled() -> bool {
    true
}

fn default_max_items() -> usize {
    5
}

fn default_max_generations() -> usize {
    2
}

fn default_min_score() -> u8 {
    60
}

fn default_bid_poll_interval() -> u64 {
    600 // 10 minutes
}

fn default_queue_capacity() -> usize {
    256
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            max_concurrent_items: default_max_items(),
            max_concurrent_generations: default_max_generations(),
            min_score: default_min_score(),
            banned_work_types: Vec::new(),
            bid_poll_interval_secs: default_bid_poll_interval(),
            queue_capacity: default_queue_capacity(),
            retry: RetryConfig::default(),
        }
    }
}
