//! Downstream notification sinks

use libgitrow_wire::Notification;
use tokio::sync::broadcast;
use tracing::info;

/// Receives a notification for every persisted change
pub trait NotificationSink: Send + Sync {
    fn notify(&self, notification: &Notification);
}

/// Logs notifications; the default when no mirror is configured
#[derive(Debug, Default)]
pub struct LogSink;

impl NotificationSink for LogSink {
    fn notify(&self, notification: &Notification) {
        let (org, repo) = notification.repository();
        info!(
            kind = notification.notification_type(),
            org,
            repo,
            detail = %serde_json::to_string(notification).unwrap_or_default(),
            "notification"
        );
    }
}

/// Fans notifications out to in-process subscribers
pub struct BroadcastSink {
    tx: broadcast::Sender<Notification>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.tx.subscribe()
    }
}

impl NotificationSink for BroadcastSink {
    fn notify(&self, notification: &Notification) {
        // No subscribers is fine
        let _ = self.tx.send(notification.clone());
    }
}
