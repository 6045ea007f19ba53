//! Work item API handlers.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use scrivener_core::registry::{ActionLogEntry, Budget, ConversationMessage, Transition};
use scrivener_core::{ItemFilter, ItemStatus, OrchestratorError, RegistryError, WorkItem};

use crate::state::AppState;

/// Default limit for list queries
const DEFAULT_LIMIT: i64 = 100;

/// Maximum limit for list queries
const MAX_LIMIT: i64 = 1000;

/// Query parameters for listing items
#[derive(Debug, Deserialize)]
pub struct ListItemsParams {
    /// Filter by status name (e.g. "bid_placed")
    pub status: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// Work item as returned by the API. The generated document is omitted;
/// `artifact_path` points at the rendered file.
#[derive(Debug, Serialize)]
pub struct ItemResponse {
    pub id: String,
    pub external_ref: String,
    pub title: String,
    pub status: ItemStatus,
    pub listed_budget: Budget,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub work_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bid_price: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_price: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uniqueness: Option<f32>,
    pub originality_checks: u32,
    pub rewrite_attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_failure: Option<String>,
    pub cancel_requested: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parked_until: Option<DateTime<Utc>>,
    pub api_cost_usd: f64,
    pub api_tokens: u64,
    pub history: Vec<Transition>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<WorkItem> for ItemResponse {
    fn from(item: WorkItem) -> Self {
        Self {
            work_type: item.detail.as_ref().map(|d| d.work_type.clone()),
            id: item.id,
            external_ref: item.external_ref,
            title: item.title,
            status: item.status,
            listed_budget: item.listed_budget,
            score: item.score,
            score_reason: item.score_reason,
            bid_price: item.bid_price,
            final_price: item.final_price,
            uniqueness: item.uniqueness,
            originality_checks: item.originality_checks,
            rewrite_attempts: item.rewrite_attempts,
            artifact_path: item.artifact_path,
            last_failure: item.last_failure,
            cancel_requested: item.cancel_requested,
            parked_until: item.parked_until,
            api_cost_usd: item.api_cost_usd,
            api_tokens: item.api_tokens,
            history: item.history,
            created_at: item.created_at,
            updated_at: item.updated_at,
        }
    }
}

/// Response for listing items
#[derive(Debug, Serialize)]
pub struct ListItemsResponse {
    pub items: Vec<ItemResponse>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

#[derive(Debug, Serialize)]
pub struct ActionsResponse {
    pub item_id: String,
    pub actions: Vec<ActionLogEntry>,
}

#[derive(Debug, Serialize)]
pub struct MessagesResponse {
    pub item_id: String,
    pub messages: Vec<ConversationMessage>,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ItemErrorResponse {
    pub error: String,
}

pub type ApiError = (StatusCode, Json<ItemErrorResponse>);

fn api_error(status: StatusCode, error: impl Into<String>) -> ApiError {
    (
        status,
        Json(ItemErrorResponse {
            error: error.into(),
        }),
    )
}

fn not_found(id: &str) -> ApiError {
    api_error(StatusCode::NOT_FOUND, format!("Item not found: {}", id))
}

fn registry_error(e: RegistryError) -> ApiError {
    match e {
        RegistryError::NotFound(id) => not_found(&id),
        RegistryError::InvalidState {
            status, operation, ..
        } => api_error(
            StatusCode::CONFLICT,
            format!("Cannot {} item: current status is {}", operation, status),
        ),
        e => api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

/// Look up an item so sub-resources 404 instead of returning empty lists.
fn require_item(state: &AppState, id: &str) -> Result<WorkItem, ApiError> {
    match state.registry().get(id) {
        Ok(Some(item)) => Ok(item),
        Ok(None) => Err(not_found(id)),
        Err(e) => Err(registry_error(e)),
    }
}

/// List items with optional status filter
pub async fn list_items(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListItemsParams>,
) -> Result<Json<ListItemsResponse>, ApiError> {
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let offset = params.offset.unwrap_or(0).max(0);

    let mut filter = ItemFilter::new();
    if let Some(ref name) = params.status {
        match ItemStatus::parse(name) {
            Some(status) => filter = filter.with_status(status),
            None => {
                return Err(api_error(
                    StatusCode::BAD_REQUEST,
                    format!("Unknown status: {}", name),
                ));
            }
        }
    }

    // Total count ignores pagination
    let total = state.registry().count(&filter).map_err(registry_error)?;

    let items = state
        .registry()
        .list(&filter.with_limit(limit).with_offset(offset))
        .map_err(registry_error)?;

    Ok(Json(ListItemsResponse {
        items: items.into_iter().map(ItemResponse::from).collect(),
        total,
        limit,
        offset,
    }))
}

/// Get an item by ID
pub async fn get_item(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ItemResponse>, ApiError> {
    require_item(&state, &id).map(|item| Json(ItemResponse::from(item)))
}

/// Full action log of an item, oldest first
pub async fn list_actions(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ActionsResponse>, ApiError> {
    require_item(&state, &id)?;
    let actions = state.registry().actions(&id).map_err(registry_error)?;
    Ok(Json(ActionsResponse {
        item_id: id,
        actions,
    }))
}

/// Conversation history of an item, oldest first
pub async fn list_messages(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<MessagesResponse>, ApiError> {
    require_item(&state, &id)?;
    let messages = state.registry().messages(&id).map_err(registry_error)?;
    Ok(Json(MessagesResponse {
        item_id: id,
        messages,
    }))
}

/// Request cancellation. The item moves to `cancelled` at its next stage
/// boundary; the response shows the flagged item.
pub async fn cancel_item(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<ItemResponse>), ApiError> {
    match state.orchestrator().request_cancel(&id) {
        Ok(item) => Ok((StatusCode::ACCEPTED, Json(ItemResponse::from(item)))),
        Err(OrchestratorError::Registry(e)) => Err(registry_error(e)),
        Err(OrchestratorError::ItemNotFound(id)) => Err(not_found(&id)),
        Err(e) => Err(api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())),
    }
}
