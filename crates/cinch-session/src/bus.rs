//! In-process event bus for session changes.
//!
//! Every persisted mutation is announced as a [`BusEvent`]. Delivery is best
//! effort: publishing with no subscribers, or to a lagging subscriber, is
//! not an error.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;

use crate::error::NamedError;
use crate::session::info::SessionInfo;
use crate::session::message::{AssistantMessage, Part};
use crate::session::status::SessionStatus;

/// A change announced on the bus.
///
/// Serialized as `{"type": "<topic>", "properties": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "properties")]
pub enum BusEvent {
    #[serde(rename = "session.updated")]
    SessionUpdated { info: SessionInfo },
    #[serde(rename = "session.deleted")]
    SessionDeleted { info: SessionInfo },
    #[serde(rename = "message.updated")]
    MessageUpdated { info: AssistantMessage },
    #[serde(rename = "message.removed", rename_all = "camelCase")]
    MessageRemoved {
        session_id: String,
        message_id: String,
    },
    #[serde(rename = "message.part.updated")]
    PartUpdated { part: Part },
    #[serde(rename = "session.status", rename_all = "camelCase")]
    Status {
        session_id: String,
        status: SessionStatus,
    },
    #[serde(rename = "session.error", rename_all = "camelCase")]
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
        error: NamedError,
    },
}

impl BusEvent {
    pub fn topic(&self) -> &'static str {
        match self {
            BusEvent::SessionUpdated { .. } => "session.updated",
            BusEvent::SessionDeleted { .. } => "session.deleted",
            BusEvent::MessageUpdated { .. } => "message.updated",
            BusEvent::MessageRemoved { .. } => "message.removed",
            BusEvent::PartUpdated { .. } => "message.part.updated",
            BusEvent::Status { .. } => "session.status",
            BusEvent::Error { .. } => "session.error",
        }
    }
}

/// Publish side of the bus.
pub trait EventBus: Send + Sync {
    fn publish(&self, event: BusEvent);
}

/// Fan-out over a `tokio::sync::broadcast` channel.
#[derive(Debug, Clone)]
pub struct BroadcastBus {
    sender: broadcast::Sender<BusEvent>,
}

impl BroadcastBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BusEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for BroadcastBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl EventBus for BroadcastBus {
    /// Silently ignores send errors (no subscribers is fine).
    fn publish(&self, event: BusEvent) {
        trace!(topic = event.topic(), "publish");
        let _ = self.sender.send(event);
    }
}

/// Drops every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopBus;

impl EventBus for NoopBus {
    fn publish(&self, _event: BusEvent) {}
}
