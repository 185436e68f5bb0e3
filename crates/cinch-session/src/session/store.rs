//! Persistence for sessions, messages, and parts.
//!
//! Key layout:
//!
//! | Record  | Key                                   |
//! |---------|---------------------------------------|
//! | session | `["session", session_id]`             |
//! | message | `["message", session_id, message_id]` |
//! | part    | `["part", message_id, part_id]`       |
//!
//! Every message or part write touches the owning session's `updated`
//! timestamp and is announced on the bus.

use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::{debug, trace};

use crate::bus::{BusEvent, EventBus};
use crate::error::{SessionError, StorageError};
use crate::session::info::{SessionInfo, now_ms};
use crate::session::message::{AssistantMessage, Part};
use crate::storage::{Storage, key_string, read_json, write_json};

/// Session, message, and part records over a [`Storage`] backend.
#[derive(Clone)]
pub struct SessionStore {
    storage: Arc<dyn Storage>,
    bus: Arc<dyn EventBus>,
}

impl SessionStore {
    pub fn new(storage: Arc<dyn Storage>, bus: Arc<dyn EventBus>) -> Self {
        Self { storage, bus }
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    pub fn bus(&self) -> &Arc<dyn EventBus> {
        &self.bus
    }

    async fn read_all<T: DeserializeOwned>(&self, prefix: &[&str]) -> Result<Vec<T>, StorageError> {
        let keys = self.storage.list(prefix).await?;
        let mut records = Vec::with_capacity(keys.len());
        for key in keys {
            let key: Vec<&str> = key.iter().map(String::as_str).collect();
            if let Some(record) = read_json(self.storage.as_ref(), &key).await? {
                records.push(record);
            }
        }
        Ok(records)
    }

    // ── Sessions ───────────────────────────────────────────────────

    pub async fn create_session(&self, info: SessionInfo) -> Result<SessionInfo, SessionError> {
        write_json(self.storage.as_ref(), &["session", info.id.as_str()], &info).await?;
        debug!(session_id = %info.id, parent = ?info.parent_id, "session created");
        self.bus.publish(BusEvent::SessionUpdated { info: info.clone() });
        Ok(info)
    }

    pub async fn get_session(&self, session_id: &str) -> Result<Option<SessionInfo>, SessionError> {
        Ok(read_json(self.storage.as_ref(), &["session", session_id]).await?)
    }

    /// Apply `edit`, bump `time.updated`, persist, and publish.
    ///
    /// Runs as one read-modify-write through [`Storage::update`], so
    /// concurrent edits of the same session never overwrite each other.
    pub async fn update_session(
        &self,
        session_id: &str,
        edit: impl FnOnce(&mut SessionInfo) + Send + 'static,
    ) -> Result<SessionInfo, SessionError> {
        let key = ["session", session_id];
        let now = now_ms();
        let value = self
            .storage
            .update(
                &key,
                Box::new(move |value| {
                    // An undecodable record is left untouched and reported below.
                    if let Ok(mut info) = serde_json::from_value::<SessionInfo>(value.clone()) {
                        edit(&mut info);
                        info.time.updated = now;
                        if let Ok(updated) = serde_json::to_value(&info) {
                            *value = updated;
                        }
                    }
                }),
            )
            .await?;
        let info: SessionInfo =
            serde_json::from_value(value).map_err(|source| StorageError::Json {
                key: key_string(&key),
                source,
            })?;
        self.bus.publish(BusEvent::SessionUpdated { info: info.clone() });
        Ok(info)
    }

    /// Bump the session's `updated` timestamp. A missing session is skipped.
    pub async fn touch(&self, session_id: &str) -> Result<(), SessionError> {
        match self.update_session(session_id, |_| {}).await {
            Ok(_) => Ok(()),
            Err(SessionError::Storage(StorageError::NotFound(_))) => {
                trace!(session_id, "touch skipped, no session record");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    pub async fn list_sessions(&self) -> Result<Vec<SessionInfo>, SessionError> {
        Ok(self.read_all(&["session"]).await?)
    }

    /// Direct sub-sessions of `parent_id`.
    pub async fn children(&self, parent_id: &str) -> Result<Vec<SessionInfo>, SessionError> {
        Ok(self
            .list_sessions()
            .await?
            .into_iter()
            .filter(|s| s.parent_id.as_deref() == Some(parent_id))
            .collect())
    }

    /// Delete a session, its descendants, and all of their messages and parts.
    pub async fn remove_session(&self, session_id: &str) -> Result<(), SessionError> {
        let all = self.list_sessions().await?;
        let mut doomed = Vec::new();
        let mut frontier = vec![session_id.to_string()];
        while let Some(id) = frontier.pop() {
            frontier.extend(
                all.iter()
                    .filter(|s| s.parent_id.as_deref() == Some(id.as_str()))
                    .map(|s| s.id.clone()),
            );
            doomed.push(id);
        }

        // Children first so a partial failure never orphans a subtree.
        for id in doomed.iter().rev() {
            for message in self.messages(id).await? {
                self.delete_message_records(id, &message.id).await?;
            }
            let info = self.get_session(id).await?;
            self.storage.remove(&["session", id.as_str()]).await?;
            if let Some(info) = info {
                debug!(session_id = %id, "session removed");
                self.bus.publish(BusEvent::SessionDeleted { info });
            }
        }
        Ok(())
    }

    // ── Messages ───────────────────────────────────────────────────

    pub async fn update_message(&self, message: &AssistantMessage) -> Result<(), SessionError> {
        write_json(
            self.storage.as_ref(),
            &["message", message.session_id.as_str(), message.id.as_str()],
            message,
        )
        .await?;
        self.touch(&message.session_id).await?;
        self.bus.publish(BusEvent::MessageUpdated {
            info: message.clone(),
        });
        Ok(())
    }

    pub async fn get_message(
        &self,
        session_id: &str,
        message_id: &str,
    ) -> Result<Option<AssistantMessage>, SessionError> {
        Ok(read_json(self.storage.as_ref(), &["message", session_id, message_id]).await?)
    }

    /// Messages of a session in creation order.
    pub async fn messages(&self, session_id: &str) -> Result<Vec<AssistantMessage>, SessionError> {
        Ok(self.read_all(&["message", session_id]).await?)
    }

    pub async fn remove_message(&self, session_id: &str, message_id: &str) -> Result<(), SessionError> {
        self.delete_message_records(session_id, message_id).await?;
        self.touch(session_id).await?;
        self.bus.publish(BusEvent::MessageRemoved {
            session_id: session_id.to_string(),
            message_id: message_id.to_string(),
        });
        Ok(())
    }

    async fn delete_message_records(&self, session_id: &str, message_id: &str) -> Result<(), SessionError> {
        for key in self.storage.list(&["part", message_id]).await? {
            let key: Vec<&str> = key.iter().map(String::as_str).collect();
            self.storage.remove(&key).await?;
        }
        self.storage.remove(&["message", session_id, message_id]).await?;
        Ok(())
    }

    // ── Parts ──────────────────────────────────────────────────────

    pub async fn update_part(&self, part: &Part) -> Result<(), SessionError> {
        write_json(self.storage.as_ref(), &["part", part.message_id.as_str(), part.id.as_str()], part).await?;
        self.touch(&part.session_id).await?;
        self.bus.publish(BusEvent::PartUpdated { part: part.clone() });
        Ok(())
    }

    /// Parts of a message in emission order.
    pub async fn parts(&self, message_id: &str) -> Result<Vec<Part>, SessionError> {
        Ok(self.read_all(&["part", message_id]).await?)
    }
}
