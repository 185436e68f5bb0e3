//! Provider-facing layer: stream events, retry policy, and usage accounting.
//!
//! - [`stream`]: the [`StepEvent`](stream::StepEvent) tagged union and the
//!   [`StepStream`](stream::StepStream) the processor drains.
//! - [`retry`]: [`RetryPolicy`] waits (server-directed `retry-after`,
//!   jittered exponential backoff, per-class schedules), the per-session
//!   [`RetryTracker`] budget, and a cancellable sleep.
//! - [`usage`]: total normalization of provider usage payloads into
//!   [`Tokens`](usage::Tokens) and an exact decimal cost.

pub mod retry;
pub mod stream;
pub mod usage;

pub use retry::{RetryConfig, RetryPolicy, RetryTracker};
pub use usage::{ModelCost, ModelInfo, get_usage};
