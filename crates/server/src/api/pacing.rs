//! Pacing governor API handlers.

use axum::{extract::State, Json};
use std::sync::Arc;

use scrivener_core::PacingStatus;

use crate::state::AppState;

/// Breaker state, cooldown remaining and today's action counters
pub async fn get_status(State(state): State<Arc<AppState>>) -> Json<PacingStatus> {
    Json(state.governor().status())
}
