//! Prometheus metrics for observability.
//!
//! This module provides metrics for monitoring the scrivener server:
//! - HTTP request metrics (latency, counts)
//! - Work items by status and orchestrator pool state (collected dynamically)
//! - Pacing state (collected dynamically)
//!
//! Lifecycle, pacing and reasoning counters live in `scrivener_core::metrics`
//! and are registered here as well.

use once_cell::sync::Lazy;
use prometheus::{
    self, Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, IntGaugeVec, Opts,
    Registry, TextEncoder,
};
use scrivener_core::pacing::BreakerState;
use scrivener_core::ItemStatus;

/// Global metrics registry.
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let registry = Registry::new();
    register_metrics(&registry);
    registry
});

// =============================================================================
// HTTP Request Metrics
// =============================================================================

/// HTTP request duration in seconds.
pub static HTTP_REQUEST_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "scrivener_http_request_duration_seconds",
            "HTTP request duration in seconds",
        )
        .buckets(vec![
            0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
        ]),
        &["method", "path", "status"],
    )
    .unwrap()
});

/// HTTP requests total count.
pub static HTTP_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("scrivener_http_requests_total", "Total HTTP requests"),
        &["method", "path", "status"],
    )
    .unwrap()
});

/// HTTP requests currently in flight.
pub static HTTP_REQUESTS_IN_FLIGHT: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "scrivener_http_requests_in_flight",
        "Number of HTTP requests currently being processed",
    )
    .unwrap()
});

// =============================================================================
// Work Item Metrics (collected dynamically)
// =============================================================================

/// Work items by current status.
pub static ITEMS_BY_STATUS: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new("scrivener_items_by_status", "Current work item count by status"),
        &["status"],
    )
    .unwrap()
});

/// Orchestrator running state (1 = running, 0 = stopped).
pub static ORCHESTRATOR_RUNNING: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "scrivener_orchestrator_running",
        "Whether the orchestrator is running (1) or stopped (0)",
    )
    .unwrap()
});

/// Active items (past discovery, not terminal).
pub static ITEMS_ACTIVE: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "scrivener_items_active",
        "Number of work items past discovery and not yet terminal",
    )
    .unwrap()
});

/// Jobs waiting in the orchestrator queue.
pub static QUEUE_DEPTH: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "scrivener_queue_depth",
        "Number of jobs waiting in the orchestrator queue",
    )
    .unwrap()
});

// =============================================================================
// Pacing Metrics (collected dynamically)
// =============================================================================

/// Breaker state (0 = closed, 1 = half open, 2 = open).
pub static BREAKER_STATE: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "scrivener_breaker_state",
        "Circuit breaker state (0 = closed, 1 = half open, 2 = open)",
    )
    .unwrap()
});

/// Actions spent today by kind.
pub static DAILY_ACTIONS: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new("scrivener_daily_actions", "Actions counted against today's quota"),
        &["kind"],
    )
    .unwrap()
});

// =============================================================================
// Registration
// =============================================================================

fn register_metrics(registry: &Registry) {
    // HTTP
    registry
        .register(Box::new(HTTP_REQUEST_DURATION.clone()))
        .unwrap();
    registry
        .register(Box::new(HTTP_REQUESTS_TOTAL.clone()))
        .unwrap();
    registry
        .register(Box::new(HTTP_REQUESTS_IN_FLIGHT.clone()))
        .unwrap();

    // Items and orchestrator
    registry
        .register(Box::new(ITEMS_BY_STATUS.clone()))
        .unwrap();
    registry
        .register(Box::new(ORCHESTRATOR_RUNNING.clone()))
        .unwrap();
    registry.register(Box::new(ITEMS_ACTIVE.clone())).unwrap();
    registry.register(Box::new(QUEUE_DEPTH.clone())).unwrap();

    // Pacing
    registry.register(Box::new(BREAKER_STATE.clone())).unwrap();
    registry.register(Box::new(DAILY_ACTIONS.clone())).unwrap();

    // Core metrics (lifecycle, pacing, reasoning, originality)
    for metric in scrivener_core::metrics::all_metrics() {
        registry.register(metric).unwrap();
    }
}

/// Encode all metrics as Prometheus text format.
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).unwrap();
    String::from_utf8(buffer).unwrap()
}

/// Collect dynamic metrics from current application state.
///
/// Called before encoding so gauges reflect the registry, the worker pool and
/// the pacing governor at scrape time.
pub fn collect_dynamic_metrics(state: &crate::state::AppState) {
    let status = state.orchestrator().status();
    ORCHESTRATOR_RUNNING.set(if status.running { 1 } else { 0 });
    ITEMS_ACTIVE.set(status.active_items);
    QUEUE_DEPTH.set(status.queued as i64);

    for item_status in ItemStatus::ALL {
        let count = status
            .counts
            .get(item_status.as_str())
            .copied()
            .unwrap_or(0);
        ITEMS_BY_STATUS
            .with_label_values(&[item_status.as_str()])
            .set(count);
    }

    let pacing = state.governor().status();
    BREAKER_STATE.set(match pacing.breaker {
        BreakerState::Closed => 0,
        BreakerState::HalfOpen => 1,
        BreakerState::Open => 2,
    });
    for (kind, count) in &pacing.counts {
        DAILY_ACTIONS
            .with_label_values(&[kind.as_str()])
            .set(*count as i64);
    }
}

/// Normalize a path for metric labels (replace IDs with placeholders).
pub fn normalize_path(path: &str) -> String {
    let uuid_regex = regex_lite::Regex::new(
        r"[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}",
    )
    .unwrap();
    let numeric_regex = regex_lite::Regex::new(r"/\d+(/|$)").unwrap();

    let result = uuid_regex.replace_all(path, "{id}");
    let result = numeric_regex.replace_all(&result, "/{id}$1");
    result.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path_uuid() {
        let path = "/api/v1/items/550e8400-e29b-41d4-a716-446655440000";
        assert_eq!(normalize_path(path), "/api/v1/items/{id}");
    }

    #[test]
    fn test_normalize_path_uuid_with_suffix() {
        let path = "/api/v1/items/550e8400-e29b-41d4-a716-446655440000/actions";
        assert_eq!(normalize_path(path), "/api/v1/items/{id}/actions");
    }

    #[test]
    fn test_normalize_path_numeric() {
        let path = "/api/v1/items/12345/messages";
        assert_eq!(normalize_path(path), "/api/v1/items/{id}/messages");
    }

    #[test]
    fn test_normalize_path_no_ids() {
        let path = "/api/v1/health";
        assert_eq!(normalize_path(path), "/api/v1/health");
    }

    #[test]
    fn test_encode_metrics_returns_prometheus_format() {
        HTTP_REQUESTS_TOTAL
            .with_label_values(&["GET", "/test", "200"])
            .inc();

        let output = encode_metrics();
        assert!(output.contains("scrivener_http_requests_total"));
        assert!(output.contains("# HELP"));
        assert!(output.contains("# TYPE"));
    }

    #[test]
    fn test_registry_contains_item_and_pacing_metrics() {
        // Vec metrics only show up once a label set exists
        ITEMS_BY_STATUS.with_label_values(&["discovered"]).set(0);
        DAILY_ACTIONS.with_label_values(&["bid"]).set(0);
        ORCHESTRATOR_RUNNING.set(0);
        BREAKER_STATE.set(0);

        let output = encode_metrics();
        assert!(output.contains("scrivener_items_by_status"));
        assert!(output.contains("scrivener_orchestrator_running"));
        assert!(output.contains("scrivener_breaker_state"));
        assert!(output.contains("scrivener_daily_actions"));
    }
}
