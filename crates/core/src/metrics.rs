//! Prometheus metrics for core components.
//!
//! This module provides metrics for:
//! - Orchestrator (stage transitions, failures, bids)
//! - Pacing governor (delays, quota rejections, breaker trips)
//! - Collaborators (reasoning tokens and cost, originality checks, generation)

use once_cell::sync::Lazy;
use prometheus::{
    CounterVec, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts,
};

// =============================================================================
// Orchestrator
// =============================================================================

/// Stage transitions by target status.
pub static STAGE_TRANSITIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "scrivener_stage_transitions_total",
            "Total work item status transitions",
        ),
        &["status"],
    )
    .unwrap()
});

/// Stage failures by stage and failure class.
pub static STAGE_FAILURES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("scrivener_stage_failures_total", "Total failed stage attempts"),
        &["stage", "class"], // class: "transient", "permanent", "ban_detected"
    )
    .unwrap()
});

/// Retries issued by the retry policy.
pub static RETRY_ATTEMPTS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("scrivener_retry_attempts_total", "Total retried operations"),
        &["operation"],
    )
    .unwrap()
});

pub static BIDS_PLACED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("scrivener_bids_placed_total", "Total bids placed").unwrap()
});

/// Items currently owned by a worker.
pub static ITEMS_IN_FLIGHT: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "scrivener_items_in_flight",
        "Work items with a stage operation in progress",
    )
    .unwrap()
});

// =============================================================================
// Pacing
// =============================================================================

/// Randomized delay applied before each action.
pub static PACING_DELAY: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "scrivener_pacing_delay_seconds",
            "Delay imposed by the pacing governor",
        )
        .buckets(vec![1.0, 5.0, 15.0, 30.0, 60.0, 90.0, 120.0, 300.0]),
        &["kind"],
    )
    .unwrap()
});

pub static QUOTA_REJECTIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "scrivener_quota_rejections_total",
            "Actions refused because the daily quota was exhausted",
        ),
        &["kind"],
    )
    .unwrap()
});

pub static BREAKER_TRIPS: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "scrivener_breaker_trips_total",
        "Times the circuit breaker opened after a ban signal",
    )
    .unwrap()
});

// =============================================================================
// Collaborators
// =============================================================================

/// Reasoning tokens used.
pub static REASONING_TOKENS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("scrivener_reasoning_tokens_total", "Total reasoning tokens used"),
        &["purpose", "direction"], // direction: "input", "output"
    )
    .unwrap()
});

pub static REASONING_COST: Lazy<CounterVec> = Lazy::new(|| {
    CounterVec::new(
        Opts::new(
            "scrivener_reasoning_cost_usd_total",
            "Estimated reasoning spend in USD",
        ),
        &["purpose"],
    )
    .unwrap()
});

/// Originality checks by kind.
pub static ORIGINALITY_CHECKS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "scrivener_originality_checks_total",
            "Total originality checks issued",
        ),
        &["kind"], // "sample", "full"
    )
    .unwrap()
});

pub static GENERATION_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "scrivener_generation_duration_seconds",
            "Duration of document generation",
        )
        .buckets(vec![10.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1200.0]),
        &["result"], // "success", "failed"
    )
    .unwrap()
});

// =============================================================================
// Helper functions
// =============================================================================

/// Get all core metrics for registration in a registry.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        // Orchestrator
        Box::new(STAGE_TRANSITIONS.clone()),
        Box::new(STAGE_FAILURES.clone()),
        Box::new(RETRY_ATTEMPTS.clone()),
        Box::new(BIDS_PLACED.clone()),
        Box::new(ITEMS_IN_FLIGHT.clone()),
        // Pacing
        Box::new(PACING_DELAY.clone()),
        Box::new(QUOTA_REJECTIONS.clone()),
        Box::new(BREAKER_TRIPS.clone()),
        // Collaborators
        Box::new(REASONING_TOKENS.clone()),
        Box::new(REASONING_COST.clone()),
        Box::new(ORIGINALITY_CHECKS.clone()),
        Box::new(GENERATION_DURATION.clone()),
    ]
}
