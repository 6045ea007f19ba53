use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use super::Notification;

/// Notification with the time it was raised.
#[derive(Debug, Clone)]
pub struct NotificationEnvelope {
    pub timestamp: DateTime<Utc>,
    pub notification: Notification,
}

/// Handle for pushing notifications.
///
/// Cheap to clone and shared by every component that raises events.
#[derive(Clone)]
pub struct NotificationHandle {
    tx: mpsc::Sender<NotificationEnvelope>,
}

impl NotificationHandle {
    pub fn new(tx: mpsc::Sender<NotificationEnvelope>) -> Self {
        Self { tx }
    }

    fn envelope(notification: Notification) -> NotificationEnvelope {
        NotificationEnvelope {
            timestamp: Utc::now(),
            notification,
        }
    }

    /// Push a notification, waiting for buffer space.
    ///
    /// Only for shutdown paths; stage code uses [`NotificationHandle::try_emit`].
    pub async fn emit(&self, notification: Notification) {
        if let Err(e) = self.tx.send(Self::envelope(notification)).await {
            tracing::error!("Failed to emit notification: {}", e);
        }
    }

    /// Push a notification without blocking.
    ///
    /// A full or closed channel drops the event with a log line.
    pub fn try_emit(&self, notification: Notification) -> bool {
        match self.tx.try_send(Self::envelope(notification)) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("Dropped notification: {}", e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_try_emit() {
        let (tx, mut rx) = mpsc::channel(10);
        let handle = NotificationHandle::new(tx);

        assert!(handle.try_emit(Notification::BanDetected { cooldown_secs: 10 }));

        let envelope = rx.try_recv().expect("Should receive event");
        assert!(matches!(
            envelope.notification,
            Notification::BanDetected { .. }
        ));
    }

    #[test]
    fn test_try_emit_full_channel_does_not_block() {
        let (tx, _rx) = mpsc::channel(1);
        let handle = NotificationHandle::new(tx);

        assert!(handle.try_emit(Notification::ServiceStarted {
            version: "0.1.0".to_string(),
        }));
        assert!(!handle.try_emit(Notification::ServiceStopped {
            reason: "test".to_string(),
        }));
    }

    #[tokio::test]
    async fn test_emit_closed_channel() {
        let (tx, rx) = mpsc::channel::<NotificationEnvelope>(10);
        let handle = NotificationHandle::new(tx);
        drop(rx);

        // Must not panic.
        handle
            .emit(Notification::ServiceStopped {
                reason: "test".to_string(),
            })
            .await;
        assert!(!handle.try_emit(Notification::BanDetected { cooldown_secs: 1 }));
    }
}
