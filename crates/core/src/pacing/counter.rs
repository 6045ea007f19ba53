//! Per-day action counters.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::registry::RegistryError;

/// Kinds of externally visible actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Discovery,
    DetailFetch,
    Bid,
    BidStatus,
    ChatFetch,
    ChatSend,
    Delivery,
}

impl ActionKind {
    pub const ALL: [ActionKind; 7] = [
        ActionKind::Discovery,
        ActionKind::DetailFetch,
        ActionKind::Bid,
        ActionKind::BidStatus,
        ActionKind::ChatFetch,
        ActionKind::ChatSend,
        ActionKind::Delivery,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Discovery => "discovery",
            ActionKind::DetailFetch => "detail_fetch",
            ActionKind::Bid => "bid",
            ActionKind::BidStatus => "bid_status",
            ActionKind::ChatFetch => "chat_fetch",
            ActionKind::ChatSend => "chat_send",
            ActionKind::Delivery => "delivery",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|k| k.as_str() == s)
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Durable backing for daily counters so quotas survive restarts.
pub trait ActionCountStore: Send + Sync {
    fn load_counts(&self, day: NaiveDate) -> Result<BTreeMap<ActionKind, u32>, RegistryError>;

    fn store_count(&self, day: NaiveDate, kind: ActionKind, count: u32)
        -> Result<(), RegistryError>;
}

struct CounterState {
    day: Option<NaiveDate>,
    counts: BTreeMap<ActionKind, u32>,
}

/// Process-wide counter of actions taken, keyed by calendar day.
///
/// Counts reset implicitly the first time a new day is observed. Check and
/// increment happen under one lock.
pub struct DailyActionCounter {
    state: Mutex<CounterState>,
    store: Option<Arc<dyn ActionCountStore>>,
}

impl Default for DailyActionCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl DailyActionCounter {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(CounterState {
                day: None,
                counts: BTreeMap::new(),
            }),
            store: None,
        }
    }

    pub fn with_store(mut self, store: Arc<dyn ActionCountStore>) -> Self {
        self.store = Some(store);
        self
    }

    fn roll_to(&self, state: &mut CounterState, day: NaiveDate) {
        if state.day == Some(day) {
            return;
        }
        state.day = Some(day);
        state.counts = match &self.store {
            Some(store) => store.load_counts(day).unwrap_or_else(|e| {
                warn!("Failed to load daily counters for {}: {}", day, e);
                BTreeMap::new()
            }),
            None => BTreeMap::new(),
        };
    }

    /// Increment the counter for `kind` unless it already reached `limit`.
    ///
    /// Returns the new count, or the current count if the limit is reached.
    pub fn try_acquire(&self, kind: ActionKind, day: NaiveDate, limit: u32) -> Result<u32, u32> {
        let mut state = self.state.lock().unwrap();
        self.roll_to(&mut state, day);

        let count = state.counts.entry(kind).or_insert(0);
        if *count >= limit {
            return Err(*count);
        }
        *count += 1;
        let new_count = *count;

        if let Some(ref store) = self.store {
            if let Err(e) = store.store_count(day, kind, new_count) {
                warn!("Failed to persist daily counter {}: {}", kind, e);
            }
        }

        Ok(new_count)
    }

    /// Give back a slot taken by [`try_acquire`](Self::try_acquire) for an
    /// action that did not happen. No-op once the day has rolled over.
    pub fn release(&self, kind: ActionKind, day: NaiveDate) {
        let mut state = self.state.lock().unwrap();
        if state.day != Some(day) {
            return;
        }
        let Some(count) = state.counts.get_mut(&kind) else {
            return;
        };
        if *count == 0 {
            return;
        }
        *count -= 1;
        let new_count = *count;

        if let Some(ref store) = self.store {
            if let Err(e) = store.store_count(day, kind, new_count) {
                warn!("Failed to persist daily counter {}: {}", kind, e);
            }
        }
    }

    pub fn count(&self, kind: ActionKind, day: NaiveDate) -> u32 {
        let mut state = self.state.lock().unwrap();
        self.roll_to(&mut state, day);
        state.counts.get(&kind).copied().unwrap_or(0)
    }

    pub fn snapshot(&self, day: NaiveDate) -> BTreeMap<ActionKind, u32> {
        let mut state = self.state.lock().unwrap();
        self.roll_to(&mut state, day);
        state.counts.clone()
    }
}
