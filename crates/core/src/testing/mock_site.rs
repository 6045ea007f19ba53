//! Mock host platform for testing.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use crate::actors::{
    ActionError, BidOutcome, BidStatus, BiddingActor, ConversationActor, DeliveryActor,
    DeliveryKind, DetailSource, DiscoverySource, InboundMessage, ItemSummary,
};
use crate::registry::ItemDetail;

/// A recorded bid for test assertions.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedBid {
    pub external_ref: String,
    pub price: u32,
    pub comment: String,
}

/// A recorded delivery for test assertions.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedDelivery {
    pub external_ref: String,
    pub artifact: PathBuf,
    pub kind: DeliveryKind,
}

/// Mock implementation of every site actor trait.
///
/// - Listed items and their details are configurable
/// - Bids, deliveries and sent messages are recorded
/// - Errors can be injected for the next call(s)
///
/// # Example
///
/// ```rust,ignore
/// let site = MockSite::new();
/// site.add_item(fixtures::summary("101"), fixtures::item_detail("Essay", Budget::range(2700, 3000)));
/// site.set_bid_status("101", BidStatus::Accepted { final_price: None });
/// ```
#[derive(Debug)]
pub struct MockSite {
    items: Arc<RwLock<Vec<ItemSummary>>>,
    details: Arc<RwLock<HashMap<String, ItemDetail>>>,
    bid_outcomes: Arc<RwLock<HashMap<String, BidOutcome>>>,
    bid_statuses: Arc<RwLock<HashMap<String, BidStatus>>>,
    inbox: Arc<RwLock<HashMap<String, Vec<InboundMessage>>>>,
    bids: Arc<RwLock<Vec<RecordedBid>>>,
    deliveries: Arc<RwLock<Vec<RecordedDelivery>>>,
    sent: Arc<RwLock<Vec<(String, String)>>>,
    next_errors: Arc<RwLock<VecDeque<ActionError>>>,
    delivery_errors: Arc<RwLock<VecDeque<ActionError>>>,
    send_errors: Arc<RwLock<VecDeque<ActionError>>>,
    detail_fetches: Arc<RwLock<u32>>,
}

impl Default for MockSite {
    fn default() -> Self {
        Self::new()
    }
}

impl MockSite {
    pub fn new() -> Self {
        Self {
            items: Arc::new(RwLock::new(Vec::new())),
            details: Arc::new(RwLock::new(HashMap::new())),
            bid_outcomes: Arc::new(RwLock::new(HashMap::new())),
            bid_statuses: Arc::new(RwLock::new(HashMap::new())),
            inbox: Arc::new(RwLock::new(HashMap::new())),
            bids: Arc::new(RwLock::new(Vec::new())),
            deliveries: Arc::new(RwLock::new(Vec::new())),
            sent: Arc::new(RwLock::new(Vec::new())),
            next_errors: Arc::new(RwLock::new(VecDeque::new())),
            delivery_errors: Arc::new(RwLock::new(VecDeque::new())),
            send_errors: Arc::new(RwLock::new(VecDeque::new())),
            detail_fetches: Arc::new(RwLock::new(0)),
        }
    }

    /// List an item and make its detail available.
    pub fn add_item(&self, summary: ItemSummary, detail: ItemDetail) {
        self.details
            .write()
            .unwrap()
            .insert(summary.external_ref.clone(), detail);
        self.items.write().unwrap().push(summary);
    }

    /// Stop listing every item (details stay fetchable).
    pub fn clear_listing(&self) {
        self.items.write().unwrap().clear();
    }

    pub fn set_bid_outcome(&self, external_ref: &str, outcome: BidOutcome) {
        self.bid_outcomes
            .write()
            .unwrap()
            .insert(external_ref.to_string(), outcome);
    }

    pub fn set_bid_status(&self, external_ref: &str, status: BidStatus) {
        self.bid_statuses
            .write()
            .unwrap()
            .insert(external_ref.to_string(), status);
    }

    /// Add a customer message to an item's inbox.
    pub fn push_message(&self, external_ref: &str, external_id: &str, body: &str) {
        self.inbox
            .write()
            .unwrap()
            .entry(external_ref.to_string())
            .or_default()
            .push(InboundMessage {
                external_id: external_id.to_string(),
                body: body.to_string(),
                sent_at: None,
            });
    }

    /// Fail the next call (of any kind) with `error`.
    pub fn fail_next_with(&self, error: ActionError) {
        self.next_errors.write().unwrap().push_back(error);
    }

    /// Fail the next upload only; other calls go through.
    pub fn fail_next_delivery_with(&self, error: ActionError) {
        self.delivery_errors.write().unwrap().push_back(error);
    }

    /// Fail the next outgoing message only.
    pub fn fail_next_send_with(&self, error: ActionError) {
        self.send_errors.write().unwrap().push_back(error);
    }

    pub fn bids(&self) -> Vec<RecordedBid> {
        self.bids.read().unwrap().clone()
    }

    pub fn deliveries(&self) -> Vec<RecordedDelivery> {
        self.deliveries.read().unwrap().clone()
    }

    /// Messages sent to customers as (external_ref, body).
    pub fn sent_messages(&self) -> Vec<(String, String)> {
        self.sent.read().unwrap().clone()
    }

    pub fn detail_fetches(&self) -> u32 {
        *self.detail_fetches.read().unwrap()
    }

    fn take_error(&self) -> Result<(), ActionError> {
        Self::pop(&self.next_errors)
    }

    fn pop(queue: &RwLock<VecDeque<ActionError>>) -> Result<(), ActionError> {
        match queue.write().unwrap().pop_front() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl DiscoverySource for MockSite {
    async fn list_new_items(&self) -> Result<Vec<ItemSummary>, ActionError> {
        self.take_error()?;
        Ok(self.items.read().unwrap().clone())
    }
}

#[async_trait]
impl DetailSource for MockSite {
    async fn fetch_detail(&self, external_ref: &str) -> Result<ItemDetail, ActionError> {
        self.take_error()?;
        *self.detail_fetches.write().unwrap() += 1;
        self.details
            .read()
            .unwrap()
            .get(external_ref)
            .cloned()
            .ok_or_else(|| ActionError::Rejected(format!("item {} not found", external_ref)))
    }
}

#[async_trait]
impl BiddingActor for MockSite {
    async fn place_bid(
        &self,
        external_ref: &str,
        price: u32,
        comment: &str,
    ) -> Result<BidOutcome, ActionError> {
        self.take_error()?;
        let outcome = self
            .bid_outcomes
            .read()
            .unwrap()
            .get(external_ref)
            .cloned()
            .unwrap_or(BidOutcome::Placed);
        if outcome == BidOutcome::Placed {
            self.bids.write().unwrap().push(RecordedBid {
                external_ref: external_ref.to_string(),
                price,
                comment: comment.to_string(),
            });
        }
        Ok(outcome)
    }

    async fn bid_status(&self, external_ref: &str) -> Result<BidStatus, ActionError> {
        self.take_error()?;
        Ok(self
            .bid_statuses
            .read()
            .unwrap()
            .get(external_ref)
            .cloned()
            .unwrap_or(BidStatus::Pending))
    }
}

#[async_trait]
impl DeliveryActor for MockSite {
    async fn deliver(
        &self,
        external_ref: &str,
        artifact: &Path,
        kind: DeliveryKind,
    ) -> Result<(), ActionError> {
        self.take_error()?;
        Self::pop(&self.delivery_errors)?;
        if !artifact.exists() {
            return Err(ActionError::Artifact(format!(
                "{} does not exist",
                artifact.display()
            )));
        }
        self.deliveries.write().unwrap().push(RecordedDelivery {
            external_ref: external_ref.to_string(),
            artifact: artifact.to_path_buf(),
            kind,
        });
        Ok(())
    }
}

#[async_trait]
impl ConversationActor for MockSite {
    async fn fetch_messages(&self, external_ref: &str) -> Result<Vec<InboundMessage>, ActionError> {
        self.take_error()?;
        Ok(self
            .inbox
            .read()
            .unwrap()
            .get(external_ref)
            .cloned()
            .unwrap_or_default())
    }

    async fn send_message(&self, external_ref: &str, body: &str) -> Result<(), ActionError> {
        self.take_error()?;
        Self::pop(&self.send_errors)?;
        self.sent
            .write()
            .unwrap()
            .push((external_ref.to_string(), body.to_string()));
        Ok(())
    }
}
