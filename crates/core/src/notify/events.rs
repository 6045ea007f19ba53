use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::registry::DailyStats;

/// Operator-facing notification events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    // System events
    ServiceStarted {
        version: String,
    },
    ServiceStopped {
        reason: String,
    },

    // Item lifecycle
    ItemStateChanged {
        item_id: String,
        from_status: String,
        to_status: String,
    },
    ItemFailed {
        item_id: String,
        stage: String,
        /// "error" or "rejected".
        outcome: String,
        reason: String,
    },
    OriginalityBestEffort {
        item_id: String,
        uniqueness: f32,
        threshold: f32,
    },

    // Pacing
    BanDetected {
        cooldown_secs: u64,
    },
    QuotaExhausted {
        kind: String,
        limit: u32,
    },

    DailySummary {
        stats: DailyStats,
    },
}

/// How urgently a notification should reach the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Normal,
    High,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Normal => "normal",
            Priority::High => "high",
        }
    }
}

impl Notification {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::ServiceStarted { .. } => "service_started",
            Self::ServiceStopped { .. } => "service_stopped",
            Self::ItemStateChanged { .. } => "item_state_changed",
            Self::ItemFailed { .. } => "item_failed",
            Self::OriginalityBestEffort { .. } => "originality_best_effort",
            Self::BanDetected { .. } => "ban_detected",
            Self::QuotaExhausted { .. } => "quota_exhausted",
            Self::DailySummary { .. } => "daily_summary",
        }
    }

    pub fn item_id(&self) -> Option<&str> {
        match self {
            Self::ItemStateChanged { item_id, .. }
            | Self::ItemFailed { item_id, .. }
            | Self::OriginalityBestEffort { item_id, .. } => Some(item_id),
            _ => None,
        }
    }

    pub fn priority(&self) -> Priority {
        match self {
            Self::BanDetected { .. } => Priority::High,
            Self::ItemFailed { .. }
            | Self::OriginalityBestEffort { .. }
            | Self::QuotaExhausted { .. }
            | Self::DailySummary { .. } => Priority::Normal,
            Self::ServiceStarted { .. }
            | Self::ServiceStopped { .. }
            | Self::ItemStateChanged { .. } => Priority::Low,
        }
    }
}

/// A stored notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub item_id: Option<String>,
    pub priority: Priority,
    pub data: Notification,
}

impl NotificationRecord {
    /// Build an unsaved record; the id is assigned by the store.
    pub fn new(timestamp: DateTime<Utc>, data: Notification) -> Self {
        Self {
            id: 0,
            timestamp,
            event_type: data.event_type().to_string(),
            item_id: data.item_id().map(String::from),
            priority: data.priority(),
            data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ban_is_high_priority() {
        let event = Notification::BanDetected { cooldown_secs: 1800 };
        assert_eq!(event.event_type(), "ban_detected");
        assert_eq!(event.priority(), Priority::High);
        assert_eq!(event.item_id(), None);
    }

    #[test]
    fn test_item_events_carry_item_id() {
        let event = Notification::ItemFailed {
            item_id: "item-1".to_string(),
            stage: "generating".to_string(),
            outcome: "error".to_string(),
            reason: "outline call failed".to_string(),
        };
        let record = NotificationRecord::new(Utc::now(), event);
        assert_eq!(record.event_type, "item_failed");
        assert_eq!(record.item_id.as_deref(), Some("item-1"));
        assert_eq!(record.id, 0);
    }

    #[test]
    fn test_serialization_is_tagged() {
        let event = Notification::QuotaExhausted {
            kind: "bid".to_string(),
            limit: 20,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "quota_exhausted");
        assert_eq!(json["limit"], 20);

        let parsed: Notification = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, event);
    }
}
