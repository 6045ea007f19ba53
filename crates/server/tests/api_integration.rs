//! In-process API tests against a router wired with mock collaborators.

mod common;

use axum::http::StatusCode;
use scrivener_core::AdvanceOutcome;

use common::TestFixture;

#[tokio::test]
async fn test_health() {
    let fixture = TestFixture::new();
    let response = fixture.get("/api/v1/health").await;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["status"], "ok");
}

#[tokio::test]
async fn test_config_is_sanitized() {
    let fixture = TestFixture::new();
    let response = fixture.get("/api/v1/config").await;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["reasoning"]["api_key_configured"], false);
    assert_eq!(response.body["verification"]["api_key_configured"], false);
    assert!(response.body["reasoning"].get("api_key").is_none());
    assert_eq!(response.body["orchestrator"]["enabled"], false);
}

#[tokio::test]
async fn test_list_items_empty() {
    let fixture = TestFixture::new();
    let response = fixture.get("/api/v1/items").await;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["total"], 0);
    assert_eq!(response.body["limit"], 100);
    assert_eq!(response.body["items"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn test_list_items_with_status_filter_and_pagination() {
    let fixture = TestFixture::new();
    fixture.discover("101", "essay");
    fixture.discover("102", "essay");

    let response = fixture.get("/api/v1/items?status=discovered").await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["total"], 2);

    let response = fixture.get("/api/v1/items?status=bid_placed").await;
    assert_eq!(response.body["total"], 0);

    let response = fixture.get("/api/v1/items?limit=1").await;
    assert_eq!(response.body["total"], 2);
    assert_eq!(response.body["items"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_list_items_rejects_unknown_status() {
    let fixture = TestFixture::new();
    let response = fixture.get("/api/v1/items?status=sleeping").await;

    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert!(response.body["error"]
        .as_str()
        .unwrap()
        .contains("sleeping"));
}

#[tokio::test]
async fn test_get_unknown_item_is_404() {
    let fixture = TestFixture::new();

    for path in [
        "/api/v1/items/missing",
        "/api/v1/items/missing/actions",
        "/api/v1/items/missing/messages",
    ] {
        let response = fixture.get(path).await;
        assert_eq!(response.status, StatusCode::NOT_FOUND, "{}", path);
        assert!(response.body["error"].is_string());
    }
}

#[tokio::test]
async fn test_item_after_bid_shows_score_price_and_actions() {
    let fixture = TestFixture::new();
    let item = fixture.discover("101", "essay");

    fixture.orchestrator.advance(&item.id).await.unwrap();
    let outcome = fixture.orchestrator.advance(&item.id).await.unwrap();
    assert!(outcome.moved());

    let response = fixture.get(&format!("/api/v1/items/{}", item.id)).await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["status"], "bid_placed");
    assert_eq!(response.body["score"], 75);
    assert_eq!(response.body["work_type"], "essay");
    assert!(response.body["bid_price"].as_u64().unwrap() > 0);
    assert_eq!(response.body["history"].as_array().unwrap().len(), 2);
    assert!(response.body.get("document").is_none());

    let response = fixture
        .get(&format!("/api/v1/items/{}/actions", item.id))
        .await;
    assert_eq!(response.status, StatusCode::OK);
    let kinds: Vec<&str> = response.body["actions"]
        .as_array()
        .unwrap()
        .iter()
        .map(|a| a["kind"].as_str().unwrap())
        .collect();
    assert_eq!(kinds, vec!["fetch_detail", "score", "place_bid"]);
}

#[tokio::test]
async fn test_rejected_item_reports_failure_reason() {
    let fixture = TestFixture::with_score(40);
    let item = fixture.discover("101", "essay");

    fixture.orchestrator.advance(&item.id).await.unwrap();

    let response = fixture.get(&format!("/api/v1/items/{}", item.id)).await;
    assert_eq!(response.body["status"], "rejected");
    assert!(response.body["last_failure"].is_string());
}

#[tokio::test]
async fn test_messages_for_new_item_are_empty() {
    let fixture = TestFixture::new();
    let item = fixture.discover("101", "essay");

    let response = fixture
        .get(&format!("/api/v1/items/{}/messages", item.id))
        .await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["item_id"], item.id.as_str());
    assert_eq!(response.body["messages"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn test_cancel_takes_effect_at_next_advance() {
    let fixture = TestFixture::new();
    let item = fixture.discover("101", "essay");

    let response = fixture
        .post(&format!("/api/v1/items/{}/cancel", item.id))
        .await;
    assert_eq!(response.status, StatusCode::ACCEPTED);
    assert_eq!(response.body["cancel_requested"], true);
    assert_eq!(response.body["status"], "discovered");

    let outcome = fixture.orchestrator.advance(&item.id).await.unwrap();
    assert!(matches!(outcome, AdvanceOutcome::Advanced { .. }));

    let response = fixture.get(&format!("/api/v1/items/{}", item.id)).await;
    assert_eq!(response.body["status"], "cancelled");
    assert!(fixture.site.bids().is_empty());

    // Terminal items cannot be cancelled again
    let response = fixture
        .post(&format!("/api/v1/items/{}/cancel", item.id))
        .await;
    assert_eq!(response.status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_cancel_unknown_item_is_404() {
    let fixture = TestFixture::new();
    let response = fixture.post("/api/v1/items/missing/cancel").await;
    assert_eq!(response.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_pacing_status_counts_actions() {
    let fixture = TestFixture::new();
    let item = fixture.discover("101", "essay");

    let response = fixture.get("/api/v1/pacing").await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["breaker"], "closed");
    assert_eq!(response.body["daily_limits"]["bid"], 20);

    fixture.orchestrator.advance(&item.id).await.unwrap();
    fixture.orchestrator.advance(&item.id).await.unwrap();

    let response = fixture.get("/api/v1/pacing").await;
    assert_eq!(response.body["counts"]["bid"], 1);
}

#[tokio::test]
async fn test_orchestrator_status() {
    let fixture = TestFixture::new();
    fixture.discover("101", "essay");
    fixture.discover("102", "essay");

    let response = fixture.get("/api/v1/orchestrator").await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["enabled"], false);
    assert_eq!(response.body["running"], false);
    assert_eq!(response.body["in_flight"], 0);
    assert_eq!(response.body["active_items"], 0);
    assert_eq!(response.body["counts"]["discovered"], 2);
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let fixture = TestFixture::new();
    fixture.discover("101", "essay");
    fixture.get("/api/v1/health").await;

    let response = fixture.get("/metrics").await;
    assert_eq!(response.status, StatusCode::OK);
    assert!(response.text.contains("scrivener_items_by_status"));
    assert!(response.text.contains("scrivener_http_requests_total"));
    assert!(response.text.contains("scrivener_orchestrator_running"));
}
