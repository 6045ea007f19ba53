use std::sync::Arc;

use tokio::sync::mpsc;

use super::{NotificationEnvelope, NotificationHandle, NotificationRecord, NotificationStore};

/// Background task that persists pushed notifications.
pub struct NotificationWriter {
    rx: mpsc::Receiver<NotificationEnvelope>,
    store: Arc<dyn NotificationStore>,
}

impl NotificationWriter {
    pub fn new(rx: mpsc::Receiver<NotificationEnvelope>, store: Arc<dyn NotificationStore>) -> Self {
        Self { rx, store }
    }

    /// Consume notifications until every handle is dropped.
    pub async fn run(mut self) {
        tracing::info!("Notification writer started");

        while let Some(envelope) = self.rx.recv().await {
            let record = NotificationRecord::new(envelope.timestamp, envelope.notification);
            tracing::info!(
                event_type = %record.event_type,
                priority = record.priority.as_str(),
                item_id = record.item_id.as_deref().unwrap_or("-"),
                "Notification"
            );

            if let Err(e) = self.store.insert(&record) {
                tracing::error!("Failed to store notification: {}", e);
            }
        }

        tracing::info!("Notification writer shutting down");
    }
}

/// Create a notification channel and its writer.
///
/// Spawn the writer with `tokio::spawn(writer.run())`; it exits once all
/// handles are dropped.
pub fn create_notification_system(
    store: Arc<dyn NotificationStore>,
    buffer_size: usize,
) -> (NotificationHandle, NotificationWriter) {
    let (tx, rx) = mpsc::channel(buffer_size);
    (NotificationHandle::new(tx), NotificationWriter::new(rx, store))
}
