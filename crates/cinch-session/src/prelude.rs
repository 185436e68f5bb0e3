//! Convenience re-exports for driving a session.
//!
//! ```ignore
//! use cinch_session::prelude::*;
//! ```

// ── Provider layer ──────────────────────────────────────────────────
pub use crate::api::retry::{RetryConfig, RetryPolicy, RetryTracker};
pub use crate::api::stream::{StepEvent, StepStream, ToolOutput};
pub use crate::api::usage::{ModelCost, ModelInfo, Tokens};

// ── Session runtime ─────────────────────────────────────────────────
pub use crate::session::{
    AssistantMessage, DoomLoopGuard, Part, PartKind, ProcessOutcome, ProcessorConfig,
    SessionInfo, SessionProcessor, SessionStatus, SessionStore, Snapshot, StatusBoard,
    StatusSink, ToolState,
};

// ── Infrastructure ──────────────────────────────────────────────────
pub use crate::bus::{BroadcastBus, BusEvent, EventBus};
pub use crate::error::{NamedError, ProviderError, SessionError};
pub use crate::storage::{FileStorage, MemoryStorage, Storage};

pub use tokio_util::sync::CancellationToken;
