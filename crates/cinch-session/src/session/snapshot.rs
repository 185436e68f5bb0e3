//! Filesystem snapshots taken around each generation step.

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

/// Files changed since a snapshot, identified by content hash.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Patch {
    pub hash: String,
    pub files: Vec<String>,
}

impl Patch {
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// Snapshot service. Failures are the implementation's to log: `track`
/// returns `None` and `patch` an empty [`Patch`] when nothing is available.
pub trait Snapshot: Send + Sync {
    /// Record the current working tree and return a reference to it.
    fn track(&self) -> BoxFuture<'_, Option<String>>;

    /// Changes since the snapshot `reference`.
    fn patch<'a>(&'a self, reference: &'a str) -> BoxFuture<'a, Patch>;
}

/// Snapshotting disabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSnapshot;

impl Snapshot for NoopSnapshot {
    fn track(&self) -> BoxFuture<'_, Option<String>> {
        Box::pin(async { None })
    }

    fn patch<'a>(&'a self, reference: &'a str) -> BoxFuture<'a, Patch> {
        Box::pin(async move {
            Patch {
                hash: reference.to_string(),
                files: Vec::new(),
            }
        })
    }
}
