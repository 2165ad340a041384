//! Notification lifecycle events.
//!
//! Every dispatch that reaches a delivery strategy ends with exactly one
//! terminal event (`SENT` or `FAILED`) handed to the registered listeners. The
//! serialised form of [`NotificationEvent`] is the audit trail downstream
//! consumers read, so its field names are fixed.

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::warn;

/// Lifecycle status carried by an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationStatus {
    Sent,
    Failed,
    /// Reserved for intermediate retry reporting; the dispatcher only emits
    /// terminal statuses.
    Retrying,
}

impl NotificationStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Sent | Self::Failed)
    }
}

impl fmt::Display for NotificationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sent => write!(f, "SENT"),
            Self::Failed => write!(f, "FAILED"),
            Self::Retrying => write!(f, "RETRYING"),
        }
    }
}

/// Immutable record of a notification's lifecycle change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationEvent {
    notification_id: String,
    status: NotificationStatus,
    provider_name: String,
    timestamp: DateTime<Utc>,
    detail: String,
}

impl NotificationEvent {
    pub fn new(
        notification_id: impl Into<String>,
        status: NotificationStatus,
        provider_name: impl Into<String>,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            notification_id: notification_id.into(),
            status,
            provider_name: provider_name.into(),
            timestamp: Utc::now(),
            detail: detail.into(),
        }
    }

    /// A `SENT` event.
    pub fn sent(
        notification_id: impl Into<String>,
        provider_name: impl Into<String>,
        detail: impl Into<String>,
    ) -> Self {
        Self::new(
            notification_id,
            NotificationStatus::Sent,
            provider_name,
            detail,
        )
    }

    /// A `FAILED` event.
    pub fn failed(
        notification_id: impl Into<String>,
        provider_name: impl Into<String>,
        detail: impl Into<String>,
    ) -> Self {
        Self::new(
            notification_id,
            NotificationStatus::Failed,
            provider_name,
            detail,
        )
    }

    /// Id of the notification the event belongs to.
    pub fn notification_id(&self) -> &str {
        &self.notification_id
    }

    /// Lifecycle status.
    pub fn status(&self) -> NotificationStatus {
        self.status
    }

    /// Name of the strategy that handled the delivery.
    pub fn provider_name(&self) -> &str {
        &self.provider_name
    }

    /// When the event was created.
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Human-readable outcome, or the failure cause.
    pub fn detail(&self) -> &str {
        &self.detail
    }
}

/// Observer of notification lifecycle events.
///
/// Listeners run on the dispatch worker, after delivery has settled. A listener
/// that returns an error or panics is logged and skipped; it never affects
/// other listeners or the dispatch outcome.
pub trait NotificationListener: Send + Sync {
    fn on_event(&self, event: &NotificationEvent) -> anyhow::Result<()>;
}

impl<F> NotificationListener for F
where
    F: Fn(&NotificationEvent) -> anyhow::Result<()> + Send + Sync,
{
    fn on_event(&self, event: &NotificationEvent) -> anyhow::Result<()> {
        self(event)
    }
}

/// Listener that republishes events on a broadcast channel, for async
/// consumers that prefer a stream over a callback.
pub struct BroadcastListener {
    tx: broadcast::Sender<NotificationEvent>,
}

impl BroadcastListener {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Subscribe to events emitted after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<NotificationEvent> {
        self.tx.subscribe()
    }
}

impl Default for BroadcastListener {
    fn default() -> Self {
        Self::new(256)
    }
}

impl NotificationListener for BroadcastListener {
    fn on_event(&self, event: &NotificationEvent) -> anyhow::Result<()> {
        // No subscribers is not an error.
        let _ = self.tx.send(event.clone());
        Ok(())
    }
}

/// Hand `event` to every listener in registration order, isolating failures.
pub(crate) fn publish(listeners: &[Arc<dyn NotificationListener>], event: &NotificationEvent) {
    for (index, listener) in listeners.iter().enumerate() {
        match catch_unwind(AssertUnwindSafe(|| listener.on_event(event))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(
                    notification_id = %event.notification_id(),
                    listener = index,
                    "Event listener failed: {:#}",
                    e
                );
            }
            Err(payload) => {
                warn!(
                    notification_id = %event.notification_id(),
                    listener = index,
                    "Event listener panicked: {}",
                    panic_message(payload.as_ref())
                );
            }
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}
