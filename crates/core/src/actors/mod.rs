//! Action actors: one externally visible operation each.
//!
//! Expected site answers ("already taken", "closed") are typed outcomes, not
//! errors. [`PacedSite`] puts every call behind the pacing governor.

mod conversation;
mod http_bridge;

use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::pacing::{ActionKind, PacingError, PacingGovernor};
use crate::registry::{Budget, ItemDetail};
use crate::retry::{Classify, FailureClass};

pub use conversation::{limit_sentences, ConversationResponder, MAX_REPLY_SENTENCES};
pub use http_bridge::{HttpSiteBridge, SiteConfig};

#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("request timed out")]
    Timeout,

    #[error("site unavailable (status {0})")]
    Unavailable(u16),

    /// The site is blocking us (403, 429, captcha).
    #[error("ban signal: {0}")]
    Ban(String),

    #[error("rejected by site: {0}")]
    Rejected(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("artifact error: {0}")]
    Artifact(String),

    #[error("daily quota for {kind} exhausted ({limit} per day)")]
    QuotaExceeded { kind: ActionKind, limit: u32 },
}

impl From<PacingError> for ActionError {
    fn from(e: PacingError) -> Self {
        match e {
            PacingError::QuotaExceeded { kind, limit } => ActionError::QuotaExceeded { kind, limit },
        }
    }
}

impl Classify for ActionError {
    fn failure_class(&self) -> FailureClass {
        match self {
            ActionError::Http(_) | ActionError::Timeout | ActionError::Unavailable(_) => {
                FailureClass::Transient
            }
            ActionError::Ban(_) => FailureClass::BanDetected,
            ActionError::Rejected(_)
            | ActionError::InvalidResponse(_)
            | ActionError::Artifact(_)
            | ActionError::QuotaExceeded { .. } => FailureClass::Permanent,
        }
    }
}

/// An item as listed by the discovery source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemSummary {
    pub external_ref: String,
    pub title: String,
    #[serde(default)]
    pub budget: Budget,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BidOutcome {
    Placed,
    AlreadyTaken,
    Closed,
    Rejected(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BidStatus {
    Pending,
    Accepted { final_price: Option<u32> },
    Declined,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryKind {
    Draft,
    Final,
}

impl DeliveryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryKind::Draft => "draft",
            DeliveryKind::Final => "final",
        }
    }
}

/// A message received from the customer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundMessage {
    pub external_id: String,
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sent_at: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait DiscoverySource: Send + Sync {
    async fn list_new_items(&self) -> Result<Vec<ItemSummary>, ActionError>;
}

#[async_trait]
pub trait DetailSource: Send + Sync {
    async fn fetch_detail(&self, external_ref: &str) -> Result<ItemDetail, ActionError>;
}

#[async_trait]
pub trait BiddingActor: Send + Sync {
    async fn place_bid(
        &self,
        external_ref: &str,
        price: u32,
        comment: &str,
    ) -> Result<BidOutcome, ActionError>;

    async fn bid_status(&self, external_ref: &str) -> Result<BidStatus, ActionError>;
}

#[async_trait]
pub trait DeliveryActor: Send + Sync {
    async fn deliver(
        &self,
        external_ref: &str,
        artifact: &Path,
        kind: DeliveryKind,
    ) -> Result<(), ActionError>;
}

#[async_trait]
pub trait ConversationActor: Send + Sync {
    /// All customer messages for the item, oldest first.
    async fn fetch_messages(&self, external_ref: &str) -> Result<Vec<InboundMessage>, ActionError>;

    async fn send_message(&self, external_ref: &str, body: &str) -> Result<(), ActionError>;
}

/// Everything the orchestrator needs from the host platform.
pub trait SiteBridge:
    DiscoverySource + DetailSource + BiddingActor + DeliveryActor + ConversationActor
{
}

impl<T> SiteBridge for T where
    T: DiscoverySource + DetailSource + BiddingActor + DeliveryActor + ConversationActor
{
}

/// Site actions gated by the pacing governor.
///
/// Each call acquires a permit first and reports its result back, so ban
/// signals trip the breaker and a HalfOpen probe resolves.
#[derive(Clone)]
pub struct PacedSite {
    governor: Arc<PacingGovernor>,
    site: Arc<dyn SiteBridge>,
}

impl PacedSite {
    pub fn new(governor: Arc<PacingGovernor>, site: Arc<dyn SiteBridge>) -> Self {
        Self { governor, site }
    }

    pub fn governor(&self) -> &Arc<PacingGovernor> {
        &self.governor
    }

    async fn paced<T, F, Fut>(&self, kind: ActionKind, op: F) -> Result<T, ActionError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ActionError>>,
    {
        let permit = self.governor.permit(kind).await?;
        let result = op().await;
        permit.record(&result);
        result
    }

    pub async fn list_new_items(&self) -> Result<Vec<ItemSummary>, ActionError> {
        self.paced(ActionKind::Discovery, || self.site.list_new_items())
            .await
    }

    pub async fn fetch_detail(&self, external_ref: &str) -> Result<ItemDetail, ActionError> {
        self.paced(ActionKind::DetailFetch, || self.site.fetch_detail(external_ref))
            .await
    }

    pub async fn place_bid(
        &self,
        external_ref: &str,
        price: u32,
        comment: &str,
    ) -> Result<BidOutcome, ActionError> {
        self.paced(ActionKind::Bid, || {
            self.site.place_bid(external_ref, price, comment)
        })
        .await
    }

    pub async fn bid_status(&self, external_ref: &str) -> Result<BidStatus, ActionError> {
        self.paced(ActionKind::BidStatus, || self.site.bid_status(external_ref))
            .await
    }

    pub async fn deliver(
        &self,
        external_ref: &str,
        artifact: &Path,
        kind: DeliveryKind,
    ) -> Result<(), ActionError> {
        self.paced(ActionKind::Delivery, || {
            self.site.deliver(external_ref, artifact, kind)
        })
        .await
    }

    pub async fn fetch_messages(
        &self,
        external_ref: &str,
    ) -> Result<Vec<InboundMessage>, ActionError> {
        self.paced(ActionKind::ChatFetch, || self.site.fetch_messages(external_ref))
            .await
    }

    pub async fn send_message(&self, external_ref: &str, body: &str) -> Result<(), ActionError> {
        self.paced(ActionKind::ChatSend, || {
            self.site.send_message(external_ref, body)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pacing::PacingConfig;
    use crate::testing::MockSite;
    use std::collections::BTreeMap;

    fn governor(bid_limit: u32) -> Arc<PacingGovernor> {
        Arc::new(PacingGovernor::new(PacingConfig {
            min_delay_ms: 0,
            max_delay_ms: 0,
            ban_cooldown_secs: 60,
            daily_limits: BTreeMap::from([(ActionKind::Bid, bid_limit)]),
        }))
    }

    #[test]
    fn test_error_classes() {
        assert_eq!(ActionError::Timeout.failure_class(), FailureClass::Transient);
        assert_eq!(
            ActionError::Ban("403".to_string()).failure_class(),
            FailureClass::BanDetected
        );
        assert_eq!(
            ActionError::Rejected("closed".to_string()).failure_class(),
            FailureClass::Permanent
        );
        let quota: ActionError = PacingError::QuotaExceeded {
            kind: ActionKind::Bid,
            limit: 2,
        }
        .into();
        assert_eq!(quota.failure_class(), FailureClass::Permanent);
    }

    #[tokio::test(start_paused = true)]
    async fn test_paced_bid_respects_quota() {
        let site = Arc::new(MockSite::new());
        let paced = PacedSite::new(governor(1), site.clone());

        assert_eq!(paced.place_bid("r1", 1000, "hi").await.unwrap(), BidOutcome::Placed);
        let err = paced.place_bid("r2", 1000, "hi").await.unwrap_err();
        assert!(matches!(err, ActionError::QuotaExceeded { limit: 1, .. }));
        assert_eq!(site.bids().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ban_response_trips_breaker() {
        let site = Arc::new(MockSite::new());
        site.fail_next_with(ActionError::Ban("HTTP 403".to_string()));
        let governor = governor(10);
        let paced = PacedSite::new(Arc::clone(&governor), site.clone());

        assert!(paced.list_new_items().await.is_err());
        assert!(governor.is_paused());
    }
}
