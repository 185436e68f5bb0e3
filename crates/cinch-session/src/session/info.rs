use serde::{Deserialize, Serialize};

use crate::id::{self, Prefix};

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionTime {
    pub created: i64,
    pub updated: i64,
}

/// File-change stats derived from a session's patch parts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSummary {
    /// Distinct files touched.
    pub files: u64,
    /// Patch parts recorded.
    pub patches: u64,
}

/// A top-level conversation or a sub-session spawned from one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub id: String,
    pub project_id: String,
    pub directory: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    pub title: String,
    pub time: SessionTime,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<SessionSummary>,
}

impl SessionInfo {
    pub fn new(project_id: impl Into<String>, directory: impl Into<String>) -> Self {
        let now = now_ms();
        let id = id::descending(Prefix::Session);
        Self {
            title: format!("New session - {}", chrono::Utc::now().to_rfc3339()),
            id,
            project_id: project_id.into(),
            directory: directory.into(),
            parent_id: None,
            time: SessionTime {
                created: now,
                updated: now,
            },
            summary: None,
        }
    }

    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn is_child(&self) -> bool {
        self.parent_id.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_session_defaults() {
        let info = SessionInfo::new("proj", "/tmp/work");
        assert!(id::has_prefix(&info.id, Prefix::Session));
        assert_eq!(info.time.created, info.time.updated);
        assert!(!info.is_child());
        assert!(info.title.starts_with("New session"));
    }

    #[test]
    fn serializes_camel_case_and_skips_empty() {
        let info = SessionInfo::new("proj", "/w").with_parent("ses_parent");
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["projectId"], "proj");
        assert_eq!(json["parentId"], "ses_parent");
        assert!(json.get("summary").is_none());
    }
}
