//! Common test utilities for API testing with mocks.
//!
//! This module provides a test fixture that creates an in-process router with
//! mock collaborators injected, so the API can be exercised end to end
//! without a site bridge, model or checking service.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

use scrivener_core::registry::{Budget, NewWorkItem};
use scrivener_core::testing::{MockChecker, MockReasoningClient, MockSite};
use scrivener_core::{
    Collaborators, Config, ContentEngine, MarkdownAssembler, Orchestrator, OrchestratorConfig,
    OriginalityConfig, OriginalityLoop, PacedSite, PacingConfig, PacingGovernor, PriceCalculator,
    Registry, RetryPolicy, SqliteRegistry, WorkItem,
};
use scrivener_server::state::AppState;

/// Re-export fixtures for test convenience
pub use scrivener_core::testing::fixtures;

/// Test fixture for API testing with mock collaborators.
///
/// The orchestrator's worker pool is never started; tests drive items with
/// `fixture.orchestrator.advance(..)` so every step is deterministic.
///
/// # Example
///
/// ```rust,ignore
/// #[tokio::test]
/// async fn test_item_listing() {
///     let fixture = TestFixture::new();
///     fixture.discover("101", "essay");
///
///     let response = fixture.get("/api/v1/items").await;
///     assert_eq!(response.status, 200);
/// }
/// ```
pub struct TestFixture {
    /// The Axum router for testing
    pub router: Router,
    pub registry: Arc<SqliteRegistry>,
    pub orchestrator: Arc<Orchestrator>,
    pub governor: Arc<PacingGovernor>,
    /// Mock site - configure listings, bid outcomes and messages
    pub site: Arc<MockSite>,
    pub checker: Arc<MockChecker>,
    pub reasoning: Arc<MockReasoningClient>,
    /// Temporary directory for the database and artifacts
    pub temp_dir: TempDir,
}

/// Response from a test request
#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub body: Value,
    pub text: String,
}

impl TestFixture {
    /// Create a new test fixture with default mocks. Reasoning scores 75.
    pub fn new() -> Self {
        Self::with_score(75)
    }

    pub fn with_score(score: u8) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let db_path = temp_dir.path().join("test.db");

        let site = Arc::new(MockSite::new());
        let checker = Arc::new(MockChecker::new());
        let reasoning = fixtures::scripted_reasoning(score);

        let mut config = Config::default();
        config.database.path = db_path.clone();
        config.artifacts.dir = temp_dir.path().join("artifacts");
        config.orchestrator = OrchestratorConfig {
            enabled: false,
            ..Default::default()
        };
        config.pacing = PacingConfig {
            min_delay_ms: 0,
            max_delay_ms: 0,
            ..Default::default()
        };

        let registry =
            Arc::new(SqliteRegistry::new(&db_path).expect("Failed to create registry"));
        let governor = Arc::new(
            PacingGovernor::new(config.pacing.clone()).with_count_store(registry.clone()),
        );

        let originality = OriginalityLoop::new(
            checker.clone(),
            reasoning.clone(),
            OriginalityConfig {
                sampling_enabled: false,
                ..Default::default()
            },
        )
        .with_retry(RetryPolicy::none())
        .with_polling(Duration::ZERO, Duration::from_secs(5));

        let orchestrator = Arc::new(
            Orchestrator::new(
                config.orchestrator.clone(),
                Collaborators {
                    registry: registry.clone(),
                    site: PacedSite::new(Arc::clone(&governor), site.clone()),
                    reasoning: reasoning.clone(),
                    engine: ContentEngine::new(reasoning.clone(), config.generation.clone())
                        .with_retry(RetryPolicy::none()),
                    originality,
                    pricing: PriceCalculator::new(config.pricing.clone()),
                    assembler: Arc::new(MarkdownAssembler::from_config(&config.artifacts)),
                    notifier: None,
                },
            )
            .with_retry(RetryPolicy::none()),
        );

        let state = Arc::new(AppState::new(
            config,
            registry.clone(),
            Arc::clone(&orchestrator),
            Arc::clone(&governor),
        ));
        let router = scrivener_server::api::create_router(state);

        Self {
            router,
            registry,
            orchestrator,
            governor,
            site,
            checker,
            reasoning,
            temp_dir,
        }
    }

    /// Put an item on the mock site and register it as discovered.
    pub fn discover(&self, external_ref: &str, work_type: &str) -> WorkItem {
        self.site.add_item(
            fixtures::summary(external_ref),
            fixtures::item_detail(work_type, Budget::range(2700, 3000)),
        );
        self.registry
            .create_if_absent(NewWorkItem {
                external_ref: external_ref.to_string(),
                title: format!("Item {}", external_ref),
                listed_budget: Budget::range(2700, 3000),
            })
            .expect("Failed to create item")
            .expect("Item already exists")
    }

    /// Send a GET request to the test server.
    pub async fn get(&self, path: &str) -> TestResponse {
        self.request("GET", path).await
    }

    /// Send a POST request without a body.
    pub async fn post(&self, path: &str) -> TestResponse {
        self.request("POST", path).await
    }

    async fn request(&self, method: &str, path: &str) -> TestResponse {
        let request = Request::builder()
            .method(method)
            .uri(path)
            .body(Body::empty())
            .unwrap();

        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request");

        let status = response.status();
        let body_bytes = response
            .into_body()
            .collect()
            .await
            .expect("Failed to collect body")
            .to_bytes();

        let text = String::from_utf8_lossy(&body_bytes).to_string();
        let body: Value = if body_bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body_bytes).unwrap_or(Value::Null)
        };

        TestResponse { status, body, text }
    }
}
