//! Session runtime: records, persistence, collaborators, and the stream
//! processor.
//!
//! - [`processor::SessionProcessor`]: drains a provider stream into one
//!   assistant message. Start here.
//! - [`store::SessionStore`]: sessions, messages, and parts over a
//!   [`Storage`](crate::storage::Storage) backend.
//! - [`message`]: [`AssistantMessage`](message::AssistantMessage), the
//!   [`Part`](message::Part) sum type, and the tool state machine.
//! - [`status`], [`snapshot`], [`guard`], [`summary`]: collaborators the
//!   processor notifies or consults.

pub mod config;
pub mod guard;
pub mod info;
pub mod message;
pub mod processor;
pub mod snapshot;
pub mod status;
pub mod store;
pub mod summary;

pub use config::ProcessorConfig;
pub use guard::{DoomLoop, DoomLoopGuard, HaltOnDoomLoop, Verdict, WarnOnDoomLoop};
pub use info::SessionInfo;
pub use message::{AssistantMessage, Part, PartKind, ToolState};
pub use processor::{ProcessOutcome, SessionProcessor};
pub use snapshot::{NoopSnapshot, Patch, Snapshot};
pub use status::{SessionStatus, StatusBoard, StatusSink};
pub use store::SessionStore;
pub use summary::{NoopSummary, PatchSummary, SummaryRefresher};
