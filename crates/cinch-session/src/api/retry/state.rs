//! Per-session retry budget accounting.
//!
//! One [`RetryState`] per session, keyed by session id. The window starts at
//! the first error of a classification and restarts whenever the
//! classification changes. Only one retry loop per session mutates its
//! entry; the map itself is shared across sessions.

use dashmap::DashMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::RetryClass;

/// Retry accounting for one session.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryState {
    pub error_class: RetryClass,
    pub started_at: Instant,
    /// Time actually spent sleeping between attempts.
    pub total_retry_time: Duration,
    /// Retries taken for this classification.
    pub attempts: u32,
}

impl RetryState {
    fn new(error_class: RetryClass) -> Self {
        Self {
            error_class,
            started_at: Instant::now(),
            total_retry_time: Duration::ZERO,
            attempts: 0,
        }
    }

    /// Budget consumed so far: wall-clock time since the window opened, or
    /// the accumulated sleep time if that is larger.
    pub fn consumed(&self) -> Duration {
        self.started_at.elapsed().max(self.total_retry_time)
    }
}

/// Concurrency-safe table of [`RetryState`], keyed by session id.
#[derive(Debug)]
pub struct RetryTracker {
    states: DashMap<String, RetryState>,
    ceiling: Duration,
}

impl RetryTracker {
    pub fn new(ceiling: Duration) -> Self {
        Self {
            states: DashMap::new(),
            ceiling,
        }
    }

    pub fn ceiling(&self) -> Duration {
        self.ceiling
    }

    /// Whether the session may retry an error of `class`.
    ///
    /// Opens the window on the first error of a classification and resets
    /// it when the classification changes. Returns `false` once the window
    /// has consumed the ceiling.
    pub fn should_retry(&self, session_id: &str, class: RetryClass) -> bool {
        let mut entry = self
            .states
            .entry(session_id.to_string())
            .or_insert_with(|| RetryState::new(class));

        if entry.error_class != class {
            debug!(
                session_id,
                from = %entry.error_class,
                to = %class,
                "error classification changed, resetting retry window"
            );
            *entry = RetryState::new(class);
            return true;
        }

        let consumed = entry.consumed();
        if consumed >= self.ceiling {
            warn!(
                session_id,
                class = %class,
                consumed_secs = consumed.as_secs(),
                ceiling_secs = self.ceiling.as_secs(),
                "retry budget exhausted"
            );
            return false;
        }
        true
    }

    /// Record one retry of `class` that slept for `slept`.
    pub fn update_retry_state(&self, session_id: &str, class: RetryClass, slept: Duration) {
        let mut entry = self
            .states
            .entry(session_id.to_string())
            .or_insert_with(|| RetryState::new(class));
        if entry.error_class != class {
            *entry = RetryState::new(class);
        }
        entry.total_retry_time = entry.total_retry_time.saturating_add(slept);
        entry.attempts += 1;
    }

    /// Forget the session's retry window. Call on every terminal outcome.
    pub fn clear_retry_state(&self, session_id: &str) {
        self.states.remove(session_id);
    }

    /// Retries already taken for `class` in the current window.
    pub fn attempts(&self, session_id: &str, class: RetryClass) -> u32 {
        self.states
            .get(session_id)
            .filter(|s| s.error_class == class)
            .map_or(0, |s| s.attempts)
    }

    pub fn state(&self, session_id: &str) -> Option<RetryState> {
        self.states.get(session_id).map(|s| s.clone())
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}
