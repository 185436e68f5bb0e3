//! Session summary refresh, triggered after each finished step.

use futures::future::BoxFuture;
use std::collections::BTreeSet;
use tracing::{debug, warn};

use crate::error::SessionError;
use crate::session::info::SessionSummary;
use crate::session::message::PartKind;
use crate::session::store::SessionStore;

/// Recomputes derived session stats. Called fire-and-forget, so the
/// returned future must own everything it needs.
pub trait SummaryRefresher: Send + Sync {
    fn refresh(&self, session_id: String, message_id: String) -> BoxFuture<'static, ()>;
}

/// Rebuilds [`SessionSummary`] from the session's patch parts.
#[derive(Clone)]
pub struct PatchSummary {
    store: SessionStore,
}

impl PatchSummary {
    pub fn new(store: SessionStore) -> Self {
        Self { store }
    }

    /// Compute the summary and store it on the session.
    pub async fn recompute(&self, session_id: &str) -> Result<SessionSummary, SessionError> {
        let mut files = BTreeSet::new();
        let mut patches = 0u64;
        for message in self.store.messages(session_id).await? {
            for part in self.store.parts(&message.id).await? {
                if let PartKind::Patch { files: changed, .. } = part.kind {
                    patches += 1;
                    files.extend(changed);
                }
            }
        }
        let summary = SessionSummary {
            files: files.len() as u64,
            patches,
        };
        if self.store.get_session(session_id).await?.is_some() {
            let stored = summary.clone();
            self.store
                .update_session(session_id, move |info| info.summary = Some(stored))
                .await?;
        }
        Ok(summary)
    }
}

impl SummaryRefresher for PatchSummary {
    fn refresh(&self, session_id: String, message_id: String) -> BoxFuture<'static, ()> {
        let this = self.clone();
        Box::pin(async move {
            match this.recompute(&session_id).await {
                Ok(summary) => debug!(%session_id, %message_id, ?summary, "summary refreshed"),
                Err(e) => warn!(%session_id, "summary refresh failed: {e}"),
            }
        })
    }
}

/// Skips summary refresh.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSummary;

impl SummaryRefresher for NoopSummary {
    fn refresh(&self, _session_id: String, _message_id: String) -> BoxFuture<'static, ()> {
        Box::pin(async {})
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::usage::ModelInfo;
    use crate::bus::NoopBus;
    use crate::session::info::SessionInfo;
    use crate::session::message::{AssistantMessage, Part};
    use crate::storage::MemoryStorage;
    use std::sync::Arc;

    #[tokio::test]
    async fn counts_distinct_files_across_patches() {
        let store = SessionStore::new(Arc::new(MemoryStorage::new()), Arc::new(NoopBus));
        let session = store.create_session(SessionInfo::new("p", "/w")).await.unwrap();
        let message = AssistantMessage::new(&session.id, &ModelInfo::new("openai", "gpt-4o"));
        store.update_message(&message).await.unwrap();
        for files in [vec!["a.rs", "b.rs"], vec!["b.rs", "c.rs"]] {
            let part = Part::new(
                &message,
                PartKind::Patch {
                    hash: "h".into(),
                    files: files.into_iter().map(String::from).collect(),
                },
            );
            store.update_part(&part).await.unwrap();
        }

        let summary = PatchSummary::new(store.clone());
        summary.refresh(session.id.clone(), message.id.clone()).await;

        let info = store.get_session(&session.id).await.unwrap().unwrap();
        assert_eq!(
            info.summary,
            Some(SessionSummary {
                files: 3,
                patches: 2
            })
        );
    }
}
