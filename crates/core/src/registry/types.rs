//! Work item registry types.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::generation::Document;

/// Lifecycle status of a work item.
///
/// Items only ever move forward along [`ItemStatus::can_transition_to`];
/// `Rejected`, `Error` and `Cancelled` are reachable from any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Discovered,
    Scored,
    BidPlaced,
    Accepted,
    Generating,
    CheckingOriginality,
    Rewriting,
    DraftDelivered,
    AwaitingApproval,
    FinalDelivered,
    Completed,
    Rejected,
    Error,
    Cancelled,
}

impl ItemStatus {
    pub const ALL: [ItemStatus; 14] = [
        ItemStatus::Discovered,
        ItemStatus::Scored,
        ItemStatus::BidPlaced,
        ItemStatus::Accepted,
        ItemStatus::Generating,
        ItemStatus::CheckingOriginality,
        ItemStatus::Rewriting,
        ItemStatus::DraftDelivered,
        ItemStatus::AwaitingApproval,
        ItemStatus::FinalDelivered,
        ItemStatus::Completed,
        ItemStatus::Rejected,
        ItemStatus::Error,
        ItemStatus::Cancelled,
    ];

    /// Status name as stored and exposed over the API.
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Discovered => "discovered",
            ItemStatus::Scored => "scored",
            ItemStatus::BidPlaced => "bid_placed",
            ItemStatus::Accepted => "accepted",
            ItemStatus::Generating => "generating",
            ItemStatus::CheckingOriginality => "checking_originality",
            ItemStatus::Rewriting => "rewriting",
            ItemStatus::DraftDelivered => "draft_delivered",
            ItemStatus::AwaitingApproval => "awaiting_approval",
            ItemStatus::FinalDelivered => "final_delivered",
            ItemStatus::Completed => "completed",
            ItemStatus::Rejected => "rejected",
            ItemStatus::Error => "error",
            ItemStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|status| status.as_str() == s)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ItemStatus::Completed | ItemStatus::Rejected | ItemStatus::Error | ItemStatus::Cancelled
        )
    }

    /// Items past discovery that still hold a pool slot.
    pub fn is_active(&self) -> bool {
        !self.is_terminal() && *self != ItemStatus::Discovered
    }

    /// Position along the lifecycle. The originality check/rewrite pair share
    /// one rank since they alternate; terminal states rank highest.
    pub fn rank(&self) -> u8 {
        match self {
            ItemStatus::Discovered => 0,
            ItemStatus::Scored => 1,
            ItemStatus::BidPlaced => 2,
            ItemStatus::Accepted => 3,
            ItemStatus::Generating => 4,
            ItemStatus::CheckingOriginality | ItemStatus::Rewriting => 5,
            ItemStatus::DraftDelivered => 6,
            ItemStatus::AwaitingApproval => 7,
            ItemStatus::FinalDelivered => 8,
            ItemStatus::Completed
            | ItemStatus::Rejected
            | ItemStatus::Error
            | ItemStatus::Cancelled => 9,
        }
    }

    /// The forward successor(s) along the main path.
    pub fn successors(&self) -> &'static [ItemStatus] {
        use ItemStatus::*;
        match self {
            Discovered => &[Scored],
            Scored => &[BidPlaced],
            BidPlaced => &[Accepted],
            Accepted => &[Generating],
            Generating => &[CheckingOriginality],
            CheckingOriginality => &[Rewriting, DraftDelivered],
            Rewriting => &[CheckingOriginality],
            DraftDelivered => &[AwaitingApproval],
            AwaitingApproval => &[FinalDelivered],
            FinalDelivered => &[Completed],
            Completed | Rejected | Error | Cancelled => &[],
        }
    }

    pub fn can_transition_to(&self, next: ItemStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        matches!(
            next,
            ItemStatus::Rejected | ItemStatus::Error | ItemStatus::Cancelled
        ) || self.successors().contains(&next)
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A listed budget range as shown on the platform.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Budget {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<u32>,
}

impl Budget {
    pub fn range(min: u32, max: u32) -> Self {
        Self {
            min: Some(min),
            max: Some(max),
        }
    }

    /// Midpoint of the range, or whichever bound is present.
    pub fn midpoint(&self) -> Option<u32> {
        match (self.min, self.max) {
            (Some(lo), Some(hi)) => Some((lo + hi) / 2),
            (Some(v), None) | (None, Some(v)) => Some(v),
            (None, None) => None,
        }
        .filter(|v| *v > 0)
    }
}

/// Document formatting requested by the customer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FormattingRequirements {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub font_size: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_spacing: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// Full item specification returned by the detail source.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ItemDetail {
    pub title: String,
    pub work_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pages_min: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pages_max: Option<u32>,
    #[serde(default)]
    pub budget: Budget,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub average_bid: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required_uniqueness: Option<f32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline: Option<String>,
    #[serde(default)]
    pub formatting: FormattingRequirements,
}

impl ItemDetail {
    /// Requested length in pages, preferring the upper bound.
    pub fn pages(&self) -> Option<u32> {
        self.pages_max.or(self.pages_min).filter(|p| *p > 0)
    }
}

/// One recorded status change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    pub from: ItemStatus,
    pub to: ItemStatus,
    pub at: DateTime<Utc>,
}

/// A discovered unit of work tracked through its lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: String,
    /// Platform reference; unique across the registry.
    pub external_ref: String,
    pub title: String,
    pub status: ItemStatus,
    #[serde(default)]
    pub listed_budget: Budget,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<ItemDetail>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bid_price: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_price: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uniqueness: Option<f32>,
    /// Retry attempts spent per stage, keyed by status name.
    #[serde(default)]
    pub attempts: BTreeMap<String, u32>,
    #[serde(default)]
    pub originality_checks: u32,
    #[serde(default)]
    pub rewrite_attempts: u32,
    /// Section indices chosen for the next rewrite round.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pending_repair: Vec<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document: Option<Document>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_path: Option<String>,
    /// The customer approved the draft; survives a failed final upload.
    #[serde(default)]
    pub approval_received: bool,
    #[serde(default)]
    pub history: Vec<Transition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_failure: Option<String>,
    #[serde(default)]
    pub cancel_requested: bool,
    /// Not eligible for processing before this instant (quota parking).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parked_until: Option<DateTime<Utc>>,
    #[serde(default)]
    pub api_cost_usd: f64,
    #[serde(default)]
    pub api_tokens: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkItem {
    pub fn new(request: NewWorkItem) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            external_ref: request.external_ref,
            title: request.title,
            status: ItemStatus::Discovered,
            listed_budget: request.listed_budget,
            detail: None,
            score: None,
            score_reason: None,
            bid_price: None,
            final_price: None,
            uniqueness: None,
            attempts: BTreeMap::new(),
            originality_checks: 0,
            rewrite_attempts: 0,
            pending_repair: Vec::new(),
            document: None,
            artifact_path: None,
            approval_received: false,
            history: Vec::new(),
            last_failure: None,
            cancel_requested: false,
            parked_until: None,
            api_cost_usd: 0.0,
            api_tokens: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Move to `next`, recording the transition. Returns false (and leaves the
    /// item untouched) if the edge does not exist.
    pub fn transition(&mut self, next: ItemStatus) -> bool {
        if !self.status.can_transition_to(next) {
            return false;
        }
        self.history.push(Transition {
            from: self.status,
            to: next,
            at: Utc::now(),
        });
        self.status = next;
        true
    }

    pub fn attempts_for(&self, status: ItemStatus) -> u32 {
        self.attempts.get(status.as_str()).copied().unwrap_or(0)
    }

    pub fn bump_attempts(&mut self, status: ItemStatus) -> u32 {
        let counter = self.attempts.entry(status.as_str().to_string()).or_insert(0);
        *counter += 1;
        *counter
    }

    pub fn is_parked(&self, now: DateTime<Utc>) -> bool {
        self.parked_until.is_some_and(|until| until > now)
    }

    pub fn entered_at(&self, status: ItemStatus) -> Option<DateTime<Utc>> {
        self.history
            .iter()
            .rev()
            .find(|t| t.to == status)
            .map(|t| t.at)
    }
}

/// Request to register a newly discovered item.
#[derive(Debug, Clone)]
pub struct NewWorkItem {
    pub external_ref: String,
    pub title: String,
    pub listed_budget: Budget,
}

/// Action log kinds written by the orchestrator.
pub mod action_kinds {
    pub const DISCOVER: &str = "discover";
    pub const FETCH_DETAIL: &str = "fetch_detail";
    pub const SCORE: &str = "score";
    pub const PLACE_BID: &str = "place_bid";
    pub const BID_STATUS: &str = "bid_status";
    pub const BID_ACCEPTED: &str = "bid_accepted";
    pub const GENERATE: &str = "generate";
    pub const ORIGINALITY_CHECK: &str = "originality_check";
    pub const REWRITE: &str = "rewrite";
    pub const DELIVER_DRAFT: &str = "deliver_draft";
    pub const DELIVER_FINAL: &str = "deliver_final";
    pub const SEND_MESSAGE: &str = "send_message";
    pub const COMPLETE: &str = "complete";
    pub const PARK: &str = "park";
    pub const BAN_PAUSE: &str = "ban_pause";
    pub const CANCEL: &str = "cancel";
    pub const ITEM_FAILED: &str = "item_failed";
    pub const ITEM_REJECTED: &str = "item_rejected";
}

/// Outcome recorded for an attempted action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionOutcome {
    Succeeded,
    Failed,
    Rejected,
    Deferred,
}

impl ActionOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionOutcome::Succeeded => "succeeded",
            ActionOutcome::Failed => "failed",
            ActionOutcome::Rejected => "rejected",
            ActionOutcome::Deferred => "deferred",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "succeeded" => ActionOutcome::Succeeded,
            "rejected" => ActionOutcome::Rejected,
            "deferred" => ActionOutcome::Deferred,
            _ => ActionOutcome::Failed,
        }
    }
}

/// Append-only audit record of an attempted action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionLogEntry {
    pub id: i64,
    pub item_id: String,
    pub kind: String,
    pub outcome: ActionOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// An action log entry that has not been written yet.
#[derive(Debug, Clone)]
pub struct NewActionLogEntry {
    pub item_id: String,
    pub kind: String,
    pub outcome: ActionOutcome,
    pub detail: Option<String>,
}

impl NewActionLogEntry {
    pub fn new(item_id: impl Into<String>, kind: impl Into<String>, outcome: ActionOutcome) -> Self {
        Self {
            item_id: item_id.into(),
            kind: kind.into(),
            outcome,
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageDirection {
    Inbound,
    Outbound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageOrigin {
    Human,
    Auto,
}

/// What the customer meant by an inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageIntent {
    Approval,
    Question,
    Other,
}

impl MessageIntent {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageIntent::Approval => "approval",
            MessageIntent::Question => "question",
            MessageIntent::Other => "other",
        }
    }
}

/// A message exchanged with the customer of one item, ordered by arrival.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub id: i64,
    pub item_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    pub direction: MessageDirection,
    pub origin: MessageOrigin,
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent: Option<MessageIntent>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewMessage {
    pub item_id: String,
    pub external_id: Option<String>,
    pub direction: MessageDirection,
    pub origin: MessageOrigin,
    pub body: String,
    pub intent: Option<MessageIntent>,
}

/// Cost attribution for one reasoning call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiUsageRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_id: Option<String>,
    pub purpose: String,
    pub provider: String,
    pub model: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub cost_usd: f64,
}

/// Aggregates for one calendar day.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DailyStats {
    pub day: String,
    pub discovered: i64,
    pub bids_placed: i64,
    pub accepted: i64,
    pub delivered: i64,
    pub completed: i64,
    pub failed: i64,
    pub api_cost_usd: f64,
    pub api_tokens: i64,
}
