//! Session stream processing for tool-using LLM agents.
//!
//! `cinch-session` turns a model provider's incremental event stream into a
//! persisted conversation: text, reasoning, and tool-call parts written as
//! they arrive, with per-step token and cost accounting. Provider failures
//! (rate limits, dropped sockets, malformed chunks, slow responses) are
//! retried under a per-session time budget instead of losing partial work.
//!
//! # Getting started
//!
//! ```ignore
//! use cinch_session::prelude::*;
//! use std::sync::Arc;
//!
//! let bus = Arc::new(BroadcastBus::default());
//! let store = SessionStore::new(Arc::new(MemoryStorage::new()), bus.clone());
//! let session = store.create_session(SessionInfo::new("project", "/work")).await?;
//!
//! let model = ModelInfo::new("anthropic", "claude-sonnet-4").with_estimated_cost();
//! let message = AssistantMessage::new(&session.id, &model);
//! store.update_message(&message).await?;
//!
//! let mut processor = SessionProcessor::new(store, message, model, CancellationToken::new())
//!     .with_config(ProcessorConfig::from_env());
//! let outcome = processor.process(|cancel| provider.open_stream(cancel)).await?;
//! ```
//!
//! # Where to find things
//!
//! - **The processing loop:** [`SessionProcessor`](session::processor::SessionProcessor).
//! - **Retry waits and budgets:** [`api::retry`].
//! - **Token and cost normalization:** [`api::usage`].
//! - **Event shapes:** [`StepEvent`](api::stream::StepEvent).
//! - **Persistence:** [`storage`] backends and [`SessionStore`](session::store::SessionStore).
//! - **Change notifications:** [`bus`].

pub mod api;
pub mod bus;
pub mod error;
pub mod id;
pub mod prelude;
pub mod session;
pub mod storage;

pub use error::{NamedError, ProviderError, RetryClass, SessionError, StorageError};
