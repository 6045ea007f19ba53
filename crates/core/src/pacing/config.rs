//! Pacing configuration.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::ActionKind;

/// Configuration for the pacing governor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PacingConfig {
    /// Lower bound of the randomized delay before each action (milliseconds).
    #[serde(default = "default_min_delay")]
    pub min_delay_ms: u64,

    /// Upper bound of the randomized delay before each action (milliseconds).
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    /// How long all actions stay paused after a ban signal (seconds).
    #[serde(default = "default_ban_cooldown")]
    pub ban_cooldown_secs: u64,

    /// Daily maximum per action kind. Kinds not listed are unbounded.
    #[serde(default = "default_daily_limits")]
    pub daily_limits: BTreeMap<ActionKind, u32>,
}

fn default_min_delay() -> u64 {
    30_000
}

fn default_max_delay() -> u64 {
    120_000
}

fn default_ban_cooldown() -> u64 {
    1800 // 30 minutes
}

fn default_daily_limits() -> BTreeMap<ActionKind, u32> {
    BTreeMap::from([(ActionKind::Bid, 20)])
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            min_delay_ms: default_min_delay(),
            max_delay_ms: default_max_delay(),
            ban_cooldown_secs: default_ban_cooldown(),
            daily_limits: default_daily_limits(),
        }
    }
}

impl PacingConfig {
    pub fn limit_for(&self, kind: ActionKind) -> Option<u32> {
        self.daily_limits.get(&kind).copied()
    }
}
