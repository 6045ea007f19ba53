//! Scheduler triggers run by hand against a populated registry.

mod common;

use std::sync::Arc;

use chrono::Local;
use scrivener_core::registry::{action_kinds, Budget, MessageDirection};
use scrivener_core::testing::fixtures;
use scrivener_core::{
    BidStatus, ItemFilter, ItemStatus, PacedSite, Registry, Scheduler, SchedulerConfig,
};

use common::TestHarness;

fn scheduler(h: &TestHarness, stall_threshold_secs: u64) -> Scheduler {
    Scheduler::new(
        SchedulerConfig {
            stall_threshold_secs,
            ..Default::default()
        },
        Arc::clone(&h.orchestrator),
        h.registry.clone(),
        PacedSite::new(Arc::clone(&h.governor), h.site.clone()),
        None,
    )
}

#[tokio::test]
async fn test_discovery_registers_each_listing_once() {
    let h = TestHarness::new();
    for external_ref in ["801", "802"] {
        h.site.add_item(
            fixtures::summary(external_ref),
            fixtures::item_detail("essay", Budget::range(1000, 1500)),
        );
    }
    let scheduler = scheduler(&h, 120);

    assert_eq!(scheduler.discover_once().await.unwrap(), 2);
    assert_eq!(scheduler.discover_once().await.unwrap(), 0);

    let items = h.registry.list(&ItemFilter::new()).unwrap();
    assert_eq!(items.len(), 2);
    for item in &items {
        assert_eq!(item.status, ItemStatus::Discovered);
        assert_eq!(h.action_kinds(&item.id), vec![action_kinds::DISCOVER]);
    }
    assert_eq!(h.orchestrator.status().queued, 2);
}

#[tokio::test]
async fn test_sweep_skips_parked_and_terminal_items() {
    let h = TestHarness::new();
    let waiting = h.discover("811", "essay");
    let parked = h.discover("812", "essay");
    let cancelled = h.discover("813", "essay");

    // Pending bid parks the item until the next poll
    h.orchestrator.advance_until_blocked(&parked.id, 3).await.unwrap();
    assert!(h.item(&parked.id).parked_until.is_some());

    h.orchestrator.request_cancel(&cancelled.id).unwrap();
    h.orchestrator.advance(&cancelled.id).await.unwrap();
    assert_eq!(h.item(&cancelled.id).status, ItemStatus::Cancelled);

    let queued_before = h.orchestrator.status().queued;
    let queued = scheduler(&h, 0).sweep_once().unwrap();

    assert_eq!(queued, 1);
    assert_eq!(h.orchestrator.status().queued, queued_before + 1);
    assert_eq!(h.item(&waiting.id).status, ItemStatus::Discovered);

    // Nothing is stale yet with the default threshold
    assert_eq!(scheduler(&h, 120).sweep_once().unwrap(), 0);
}

#[tokio::test]
async fn test_conversation_sweep_covers_accepted_items() {
    let h = TestHarness::new();
    let accepted = h.discover("821", "essay");
    h.discover("822", "essay");
    h.site
        .set_bid_status("821", BidStatus::Accepted { final_price: None });

    for _ in 0..3 {
        h.orchestrator.advance(&accepted.id).await.unwrap();
    }
    assert_eq!(h.item(&accepted.id).status, ItemStatus::Accepted);

    assert_eq!(scheduler(&h, 120).converse_once().unwrap(), 1);

    h.site.push_message("821", "q-1", "Can you add a section on parks?");
    assert_eq!(h.orchestrator.converse(&accepted.id).await.unwrap(), 1);
    // Already stored messages are not answered twice
    assert_eq!(h.orchestrator.converse(&accepted.id).await.unwrap(), 0);

    let messages = h.registry.messages(&accepted.id).unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].direction, MessageDirection::Inbound);
    assert_eq!(messages[1].direction, MessageDirection::Outbound);
    assert_eq!(h.site.sent_messages().len(), 1);
    assert_eq!(h.item(&accepted.id).status, ItemStatus::Accepted);
}

#[tokio::test]
async fn test_rollup_counts_todays_activity() {
    let h = TestHarness::new();
    let bid = h.discover("831", "essay");
    h.discover("832", "essay");
    h.orchestrator.advance_until_blocked(&bid.id, 3).await.unwrap();

    let stats = scheduler(&h, 120)
        .rollup(Local::now().date_naive())
        .unwrap();

    assert_eq!(stats.discovered, 2);
    assert_eq!(stats.bids_placed, 1);
    assert_eq!(stats.completed, 0);
    assert_eq!(stats.failed, 0);
    assert!(stats.api_tokens > 0);
}
