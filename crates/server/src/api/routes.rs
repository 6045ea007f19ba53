use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use super::middleware::metrics_middleware;
use super::{handlers, items, orchestrator, pacing};
use crate::state::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    let api_routes = Router::new()
        // Health and config
        .route("/health", get(handlers::health))
        .route("/config", get(handlers::get_config))
        // Work items
        .route("/items", get(items::list_items))
        .route("/items/{id}", get(items::get_item))
        .route("/items/{id}/actions", get(items::list_actions))
        .route("/items/{id}/messages", get(items::list_messages))
        .route("/items/{id}/cancel", post(items::cancel_item))
        // Pacing and worker pool
        .route("/pacing", get(pacing::get_status))
        .route("/orchestrator", get(orchestrator::get_status));

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/metrics", get(handlers::metrics))
        .layer(middleware::from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
