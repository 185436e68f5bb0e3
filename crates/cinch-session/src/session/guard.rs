//! Doom-loop detection: the same tool called with the same input over and
//! over.

use futures::future::BoxFuture;
use serde_json::Value;
use tracing::warn;

use crate::session::message::{Part, PartKind};

/// Consecutive identical calls that count as a doom loop.
pub const DOOM_LOOP_THRESHOLD: usize = 3;

/// A detected repetition.
#[derive(Debug, Clone, PartialEq)]
pub struct DoomLoop {
    pub session_id: String,
    pub message_id: String,
    pub tool: String,
    pub input: Value,
}

/// What the processor should do after a doom loop is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Continue,
    /// Stop draining the stream and end the run.
    Halt,
}

/// Permission collaborator consulted when a doom loop is detected.
pub trait DoomLoopGuard: Send + Sync {
    fn on_doom_loop<'a>(&'a self, event: &'a DoomLoop) -> BoxFuture<'a, Verdict>;
}

/// Logs the loop and lets the run continue.
#[derive(Debug, Clone, Copy, Default)]
pub struct WarnOnDoomLoop;

impl DoomLoopGuard for WarnOnDoomLoop {
    fn on_doom_loop<'a>(&'a self, event: &'a DoomLoop) -> BoxFuture<'a, Verdict> {
        Box::pin(async move {
            warn!(
                session_id = %event.session_id,
                tool = %event.tool,
                "tool called {DOOM_LOOP_THRESHOLD} times in a row with identical input"
            );
            Verdict::Continue
        })
    }
}

/// Stops the run on any doom loop.
#[derive(Debug, Clone, Copy, Default)]
pub struct HaltOnDoomLoop;

impl DoomLoopGuard for HaltOnDoomLoop {
    fn on_doom_loop<'a>(&'a self, event: &'a DoomLoop) -> BoxFuture<'a, Verdict> {
        Box::pin(async move {
            warn!(session_id = %event.session_id, tool = %event.tool, "halting on doom loop");
            Verdict::Halt
        })
    }
}

/// Check the tail of a message's tool parts for a doom loop.
///
/// `parts` is the message's part log in order. The last
/// [`DOOM_LOOP_THRESHOLD`] tool parts must share a tool name and serialized
/// input, and none may still be pending.
pub fn detect(parts: &[Part]) -> Option<DoomLoop> {
    let tail: Vec<&Part> = parts
        .iter()
        .rev()
        .filter(|p| matches!(p.kind, PartKind::Tool { .. }))
        .take(DOOM_LOOP_THRESHOLD)
        .collect();
    if tail.len() < DOOM_LOOP_THRESHOLD {
        return None;
    }

    let PartKind::Tool { tool, state, .. } = &tail[0].kind else {
        return None;
    };
    let input = state.input().to_string();
    let repeated = tail.iter().all(|p| match &p.kind {
        PartKind::Tool {
            tool: t, state: s, ..
        } => t == tool && !s.is_pending() && s.input().to_string() == input,
        _ => false,
    });

    repeated.then(|| DoomLoop {
        session_id: tail[0].session_id.clone(),
        message_id: tail[0].message_id.clone(),
        tool: tool.clone(),
        input: state.input().clone(),
    })
}
