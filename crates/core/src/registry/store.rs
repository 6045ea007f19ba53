//! Registry storage trait and query types.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use thiserror::Error;

use super::{
    ActionLogEntry, ApiUsageRecord, ConversationMessage, DailyStats, ItemStatus,
    NewActionLogEntry, NewMessage, NewWorkItem, WorkItem,
};

/// Error type for registry operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("work item not found: {0}")]
    NotFound(String),

    /// The stored status no longer matches what the writer expected.
    #[error("status conflict for {id}: expected {expected}, found {actual}")]
    Conflict {
        id: String,
        expected: ItemStatus,
        actual: ItemStatus,
    },

    #[error("invalid transition for {id}: {from} -> {to}")]
    InvalidTransition {
        id: String,
        from: ItemStatus,
        to: ItemStatus,
    },

    #[error("cannot {operation} item {id} in status {status}")]
    InvalidState {
        id: String,
        status: ItemStatus,
        operation: String,
    },

    #[error("database error: {0}")]
    Database(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<rusqlite::Error> for RegistryError {
    fn from(e: rusqlite::Error) -> Self {
        RegistryError::Database(e.to_string())
    }
}

impl From<serde_json::Error> for RegistryError {
    fn from(e: serde_json::Error) -> Self {
        RegistryError::Serialization(e.to_string())
    }
}

/// Filter for querying work items.
#[derive(Debug, Clone)]
pub struct ItemFilter {
    pub statuses: Vec<ItemStatus>,
    /// Exclude items parked beyond this instant.
    pub ready_at: Option<DateTime<Utc>>,
    pub limit: i64,
    pub offset: i64,
}

impl Default for ItemFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl ItemFilter {
    pub fn new() -> Self {
        Self {
            statuses: Vec::new(),
            ready_at: None,
            limit: 100,
            offset: 0,
        }
    }

    pub fn with_status(mut self, status: ItemStatus) -> Self {
        self.statuses.push(status);
        self
    }

    pub fn with_statuses(mut self, statuses: impl IntoIterator<Item = ItemStatus>) -> Self {
        self.statuses.extend(statuses);
        self
    }

    /// Only non-terminal items.
    pub fn non_terminal(self) -> Self {
        self.with_statuses(ItemStatus::ALL.into_iter().filter(|s| !s.is_terminal()))
    }

    /// Skip items whose parking has not expired at `now`.
    pub fn ready_at(mut self, now: DateTime<Utc>) -> Self {
        self.ready_at = Some(now);
        self
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_offset(mut self, offset: i64) -> Self {
        self.offset = offset;
        self
    }
}

/// Persistent state of every work item and its history.
///
/// Item updates go through [`Registry::commit_stage`], which only succeeds if
/// the stored status still equals the status the worker started from.
pub trait Registry: Send + Sync {
    /// Register a discovered item. Returns `None` if the external reference
    /// is already known.
    fn create_if_absent(&self, request: NewWorkItem) -> Result<Option<WorkItem>, RegistryError>;

    fn get(&self, id: &str) -> Result<Option<WorkItem>, RegistryError>;

    fn get_by_ref(&self, external_ref: &str) -> Result<Option<WorkItem>, RegistryError>;

    /// List items, oldest first.
    fn list(&self, filter: &ItemFilter) -> Result<Vec<WorkItem>, RegistryError>;

    fn count(&self, filter: &ItemFilter) -> Result<i64, RegistryError>;

    fn count_by_status(&self) -> Result<BTreeMap<ItemStatus, i64>, RegistryError>;

    /// Persist the result of one stage atomically with its action log entries.
    ///
    /// `expected` is the status the stage started from. Fails with
    /// [`RegistryError::Conflict`] if it changed in the meantime, and with
    /// [`RegistryError::InvalidTransition`] if `expected -> item.status` is
    /// not an edge of the lifecycle graph.
    fn commit_stage(
        &self,
        item: &WorkItem,
        expected: ItemStatus,
        actions: &[NewActionLogEntry],
    ) -> Result<WorkItem, RegistryError>;

    /// Flag an item for cancellation at its next safe point.
    fn request_cancel(&self, id: &str) -> Result<WorkItem, RegistryError>;

    fn append_action(&self, entry: NewActionLogEntry) -> Result<ActionLogEntry, RegistryError>;

    fn actions(&self, item_id: &str) -> Result<Vec<ActionLogEntry>, RegistryError>;

    /// Store a message. Inbound messages carrying an already-stored external
    /// id are ignored and `None` is returned.
    fn append_message(&self, message: NewMessage)
        -> Result<Option<ConversationMessage>, RegistryError>;

    fn messages(&self, item_id: &str) -> Result<Vec<ConversationMessage>, RegistryError>;

    /// Record reasoning usage and roll it into the item's totals.
    fn record_usage(&self, usage: &ApiUsageRecord) -> Result<(), RegistryError>;

    fn daily_stats(&self, day: NaiveDate) -> Result<DailyStats, RegistryError>;
}
