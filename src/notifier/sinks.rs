//! Notification sinks.

use parking_lot::RwLock;
use std::collections::VecDeque;
use stowage_common::Result;
use tokio::sync::broadcast;

use super::{Notification, NotificationSink, Priority};

/// Discards every notification.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl NotificationSink for NoopSink {
    fn send(&self, _notification: &Notification) -> Result<()> {
        Ok(())
    }
}

/// Renders notifications as tracing events under the `notification` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl NotificationSink for LogSink {
    fn send(&self, n: &Notification) -> Result<()> {
        match n.priority {
            Priority::Info => tracing::info!(
                target: "notification",
                message_id = %n.message_id,
                publisher_id = %n.publisher_id,
                event_type = %n.event_type,
                payload = %n.payload,
                "Notification"
            ),
            Priority::Warn => tracing::warn!(
                target: "notification",
                message_id = %n.message_id,
                publisher_id = %n.publisher_id,
                event_type = %n.event_type,
                payload = %n.payload,
                "Notification"
            ),
            Priority::Error => tracing::error!(
                target: "notification",
                message_id = %n.message_id,
                publisher_id = %n.publisher_id,
                event_type = %n.event_type,
                payload = %n.payload,
                "Notification"
            ),
        }
        Ok(())
    }
}

/// In-process broadcast channel with a bounded history of recent
/// notifications, so late subscribers can catch up.
pub struct BusSink {
    tx: broadcast::Sender<Notification>,
    recent: RwLock<VecDeque<Notification>>,
    history: usize,
}

impl BusSink {
    /// `capacity` sizes both the channel buffer and the history.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            recent: RwLock::new(VecDeque::with_capacity(capacity)),
            history: capacity,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.tx.subscribe()
    }

    /// The `n` most recent notifications, oldest first.
    pub fn recent(&self, n: usize) -> Vec<Notification> {
        let recent = self.recent.read();
        let skip = recent.len().saturating_sub(n);
        recent.iter().skip(skip).cloned().collect()
    }

    /// Event types of everything in the history, oldest first.
    pub fn event_types(&self) -> Vec<String> {
        self.recent
            .read()
            .iter()
            .map(|n| n.event_type.clone())
            .collect()
    }

    pub fn clear(&self) {
        self.recent.write().clear();
    }
}

impl Default for BusSink {
    fn default() -> Self {
        Self::new(256)
    }
}

impl NotificationSink for BusSink {
    fn send(&self, notification: &Notification) -> Result<()> {
        {
            let mut recent = self.recent.write();
            if recent.len() >= self.history {
                recent.pop_front();
            }
            recent.push_back(notification.clone());
        }

        // No subscribers is fine.
        let _ = self.tx.send(notification.clone());
        Ok(())
    }
}
