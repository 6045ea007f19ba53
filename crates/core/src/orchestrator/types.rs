//! Types for the work item orchestrator.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::actors::ActionError;
use crate::assembly::AssemblyError;
use crate::generation::GenerationError;
use crate::originality::OriginalityError;
use crate::reasoning::ReasoningError;
use crate::registry::{ItemStatus, RegistryError};
use crate::retry::{Classify, FailureClass};

/// Errors that can occur during orchestration.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("work item not found: {0}")]
    ItemNotFound(String),

    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("site action failed: {0}")]
    Action(#[from] ActionError),

    #[error("reasoning failed: {0}")]
    Reasoning(#[from] ReasoningError),

    #[error("generation failed: {0}")]
    Generation(#[from] GenerationError),

    #[error("originality check failed: {0}")]
    Originality(#[from] OriginalityError),

    #[error("assembly failed: {0}")]
    Assembly(#[from] AssemblyError),

    /// Uniqueness still below threshold with no checks left.
    #[error("uniqueness {uniqueness:.1}% below required {threshold:.1}% after {checks} checks")]
    OriginalityExhausted {
        uniqueness: f32,
        threshold: f32,
        checks: u32,
    },

    /// Missing required data on the work item.
    #[error("missing data on work item: {0}")]
    MissingData(&'static str),

    #[error("orchestrator is shutting down")]
    ShuttingDown,
}

impl OrchestratorError {
    /// A daily quota refused the action; the item waits for the reset.
    pub fn is_quota(&self) -> bool {
        matches!(
            self,
            OrchestratorError::Action(ActionError::QuotaExceeded { .. })
        )
    }
}

impl Classify for OrchestratorError {
    fn failure_class(&self) -> FailureClass {
        match self {
            OrchestratorError::Registry(_) => FailureClass::Transient,
            OrchestratorError::Action(e) => e.failure_class(),
            OrchestratorError::Reasoning(e) => e.failure_class(),
            OrchestratorError::Generation(e) => e.failure_class(),
            OrchestratorError::Originality(e) => e.failure_class(),
            OrchestratorError::Assembly(e) => e.failure_class(),
            OrchestratorError::ShuttingDown => FailureClass::Transient,
            OrchestratorError::ItemNotFound(_)
            | OrchestratorError::OriginalityExhausted { .. }
            | OrchestratorError::MissingData(_) => FailureClass::Permanent,
        }
    }
}

/// What a call to `advance` did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdvanceOutcome {
    /// One stage ran and the item moved.
    Advanced { from: ItemStatus, to: ItemStatus },
    /// The stage ran (or was skipped) without a status change.
    Waiting { status: ItemStatus, reason: String },
    /// Another worker owns the item right now.
    InFlight,
    /// The item is already terminal.
    Finished { status: ItemStatus },
}

impl AdvanceOutcome {
    pub fn moved(&self) -> bool {
        matches!(self, AdvanceOutcome::Advanced { .. })
    }
}

/// Current status of the orchestrator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrchestratorStatus {
    /// Whether the worker pool is running.
    pub running: bool,
    /// Configured maximum of active items.
    pub capacity: usize,
    /// Items past discovery and not yet terminal.
    pub active_items: i64,
    /// Items a worker is processing right now.
    pub in_flight: usize,
    /// Jobs waiting in the queue.
    pub queued: usize,
    /// Item counts by status name.
    pub counts: BTreeMap<String, i64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pacing::ActionKind;

    #[test]
    fn test_orchestrator_status_default() {
        let status = OrchestratorStatus::default();
        assert!(!status.running);
        assert_eq!(status.in_flight, 0);
        assert!(status.counts.is_empty());
    }

    #[test]
    fn test_error_classification() {
        let quota = OrchestratorError::Action(ActionError::QuotaExceeded {
            kind: ActionKind::Bid,
            limit: 20,
        });
        assert!(quota.is_quota());
        assert_eq!(quota.failure_class(), FailureClass::Permanent);

        let ban = OrchestratorError::Action(ActionError::Ban("403".to_string()));
        assert_eq!(ban.failure_class(), FailureClass::BanDetected);
        assert!(!ban.is_quota());

        let missing = OrchestratorError::MissingData("detail");
        assert_eq!(missing.failure_class(), FailureClass::Permanent);
    }

    #[test]
    fn test_error_display() {
        let err = OrchestratorError::OriginalityExhausted {
            uniqueness: 42.0,
            threshold: 60.0,
            checks: 3,
        };
        assert_eq!(
            err.to_string(),
            "uniqueness 42.0% below required 60.0% after 3 checks"
        );
    }
}
