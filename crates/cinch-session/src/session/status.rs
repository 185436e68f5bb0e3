//! Per-session activity status: idle, busy, or waiting to retry.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use crate::bus::{BusEvent, EventBus};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SessionStatus {
    Idle,
    Busy,
    /// Waiting before the next attempt. `next` is epoch milliseconds.
    Retry {
        attempt: u32,
        message: String,
        next: i64,
    },
}

/// Best-effort status notifications.
pub trait StatusSink: Send + Sync {
    fn set(&self, session_id: &str, status: SessionStatus);
}

/// Tracks the latest status of every session and announces changes on the
/// bus. Idle sessions are dropped from the table.
pub struct StatusBoard {
    statuses: DashMap<String, SessionStatus>,
    bus: Arc<dyn EventBus>,
}

impl StatusBoard {
    pub fn new(bus: Arc<dyn EventBus>) -> Self {
        Self {
            statuses: DashMap::new(),
            bus,
        }
    }

    pub fn get(&self, session_id: &str) -> SessionStatus {
        self.statuses
            .get(session_id)
            .map_or(SessionStatus::Idle, |s| s.clone())
    }

    /// Sessions that are not idle.
    pub fn active(&self) -> Vec<(String, SessionStatus)> {
        self.statuses
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }
}

impl StatusSink for StatusBoard {
    fn set(&self, session_id: &str, status: SessionStatus) {
        debug!(session_id, ?status, "status");
        if status == SessionStatus::Idle {
            self.statuses.remove(session_id);
        } else {
            self.statuses.insert(session_id.to_string(), status.clone());
        }
        self.bus.publish(BusEvent::Status {
            session_id: session_id.to_string(),
            status,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::BroadcastBus;

    #[tokio::test]
    async fn set_publishes_and_tracks() {
        let bus = Arc::new(BroadcastBus::new(8));
        let mut rx = bus.subscribe();
        let board = StatusBoard::new(bus);

        board.set("ses_1", SessionStatus::Busy);
        assert_eq!(board.get("ses_1"), SessionStatus::Busy);
        assert_eq!(board.active().len(), 1);
        assert!(matches!(
            rx.recv().await.unwrap(),
            BusEvent::Status { status: SessionStatus::Busy, .. }
        ));

        board.set("ses_1", SessionStatus::Idle);
        assert_eq!(board.get("ses_1"), SessionStatus::Idle);
        assert!(board.active().is_empty());
    }

    #[test]
    fn retry_status_wire_shape() {
        let json = serde_json::to_value(SessionStatus::Retry {
            attempt: 2,
            message: "rate limited".into(),
            next: 1000,
        })
        .unwrap();
        assert_eq!(json["type"], "retry");
        assert_eq!(json["attempt"], 2);
    }
}
