//! Orchestrator API handlers.

use axum::{extract::State, Json};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::state::AppState;

/// Orchestrator status response
#[derive(Debug, Serialize)]
pub struct OrchestratorStatusResponse {
    /// Whether automatic processing is enabled in config
    pub enabled: bool,
    /// Whether the worker pool is running
    pub running: bool,
    /// Maximum number of active items
    pub capacity: usize,
    /// Items past discovery and not yet terminal
    pub active_items: i64,
    /// Items a worker holds right now
    pub in_flight: usize,
    /// Jobs waiting in the queue
    pub queued: usize,
    /// Item counts by status
    pub counts: BTreeMap<String, i64>,
}

/// Get orchestrator status
pub async fn get_status(State(state): State<Arc<AppState>>) -> Json<OrchestratorStatusResponse> {
    let orchestrator = state.orchestrator();
    let status = orchestrator.status();
    Json(OrchestratorStatusResponse {
        enabled: orchestrator.config().enabled,
        running: status.running,
        capacity: status.capacity,
        active_items: status.active_items,
        in_flight: status.in_flight,
        queued: status.queued,
        counts: status.counts,
    })
}
