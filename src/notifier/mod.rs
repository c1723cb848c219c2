//! Notification emitter.
//!
//! [`Notifier`] wraps each payload in a [`Notification`] envelope and hands
//! it to a [`NotificationSink`]. Emission is fire-and-forget: a failing sink
//! is logged and never surfaces to the operation being observed.

pub mod format;
mod proxy;
mod sinks;

pub use proxy::{
    NotifyImage, NotifyImageFactory, NotifyImageRepo, NotifyTask, NotifyTaskFactory,
    NotifyTaskRepo,
};
pub use sinks::{BusSink, LogSink, NoopSink};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use stowage_common::Result;
use uuid::Uuid;

use crate::config::{NotifierConfig, NotifierStrategy};

/// Severity of a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Priority {
    Info,
    Warn,
    Error,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => write!(f, "INFO"),
            Self::Warn => write!(f, "WARN"),
            Self::Error => write!(f, "ERROR"),
        }
    }
}

/// Envelope delivered to a sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub message_id: Uuid,
    pub publisher_id: String,
    pub event_type: String,
    pub priority: Priority,
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
}

/// Transport for notifications. Delivery is best-effort.
pub trait NotificationSink: Send + Sync {
    fn send(&self, notification: &Notification) -> Result<()>;
}

/// Emits notifications on behalf of one publisher.
#[derive(Clone)]
pub struct Notifier {
    sink: Arc<dyn NotificationSink>,
    publisher_id: String,
}

impl Notifier {
    pub fn new(sink: Arc<dyn NotificationSink>, publisher_id: impl Into<String>) -> Self {
        Self {
            sink,
            publisher_id: publisher_id.into(),
        }
    }

    /// A notifier that discards everything.
    pub fn noop() -> Self {
        Self::new(Arc::new(NoopSink), "image.localhost")
    }

    /// Build the sink selected by `config.strategy`.
    ///
    /// The bus sink is returned alongside so callers can subscribe to it.
    pub fn from_config(config: &NotifierConfig) -> (Self, Option<Arc<BusSink>>) {
        match config.strategy {
            NotifierStrategy::Noop => (Self::new(Arc::new(NoopSink), &config.publisher_id), None),
            NotifierStrategy::Log => (Self::new(Arc::new(LogSink), &config.publisher_id), None),
            NotifierStrategy::Bus => {
                let bus = Arc::new(BusSink::new(config.bus_capacity));
                let sink: Arc<dyn NotificationSink> = bus.clone();
                (Self::new(sink, &config.publisher_id), Some(bus))
            }
        }
    }

    pub fn publisher_id(&self) -> &str {
        &self.publisher_id
    }

    pub fn info(&self, event_type: &str, payload: Value) {
        self.notify(Priority::Info, event_type, payload);
    }

    pub fn warn(&self, event_type: &str, payload: Value) {
        self.notify(Priority::Warn, event_type, payload);
    }

    pub fn error(&self, event_type: &str, payload: Value) {
        self.notify(Priority::Error, event_type, payload);
    }

    fn notify(&self, priority: Priority, event_type: &str, payload: Value) {
        let notification = Notification {
            message_id: Uuid::new_v4(),
            publisher_id: self.publisher_id.clone(),
            event_type: event_type.to_string(),
            priority,
            payload,
            timestamp: Utc::now(),
        };

        if let Err(e) = self.sink.send(&notification) {
            tracing::error!(
                event_type,
                %priority,
                "Failed to send notification: {}",
                e
            );
        }
    }
}

impl fmt::Debug for Notifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Notifier")
            .field("publisher_id", &self.publisher_id)
            .finish_non_exhaustive()
    }
}
