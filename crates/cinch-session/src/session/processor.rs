//! The stream processor: drains provider step events into persisted parts
//! and retries failed attempts.
//!
//! One [`SessionProcessor`] handles one assistant message. [`process`]
//! repeatedly opens the provider stream through the caller's factory until
//! an attempt drains cleanly, the error is terminal, or the retry budget is
//! spent.
//!
//! Cancellation uses two sources. The session's abort token governs
//! everything, including the retry sleep. Each attempt additionally gets a
//! child token that is cancelled when the attempt ends or its
//! `request_timeout` expires. A short request deadline therefore never cuts
//! a long rate-limit wait short.
//!
//! [`process`]: SessionProcessor::process

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::api::retry::{self, RetryPolicy, RetryTracker};
use crate::api::stream::{StepEvent, StepStream, ToolOutput, coerce_text, provider_error_from_value};
use crate::api::usage::{ModelInfo, canonical_finish_reason, get_usage};
use crate::bus::BusEvent;
use crate::error::{NamedError, ProviderError, SessionError};
use crate::session::config::ProcessorConfig;
use crate::session::guard::{self, DoomLoopGuard, Verdict, WarnOnDoomLoop};
use crate::session::info::now_ms;
use crate::session::message::{AssistantMessage, Part, PartKind, PartTime, ToolState, ToolTime};
use crate::session::snapshot::{NoopSnapshot, Snapshot};
use crate::session::status::{SessionStatus, StatusBoard, StatusSink};
use crate::session::store::SessionStore;
use crate::session::summary::{PatchSummary, SummaryRefresher};

const TOOL_ABORTED: &str = "Tool execution aborted";

/// What the caller's outer loop should do after [`SessionProcessor::process`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessOutcome {
    /// Run another round (e.g. after tool calls).
    Continue,
    /// The message ended with an error or was halted.
    Stop,
}

impl fmt::Display for ProcessOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessOutcome::Continue => write!(f, "continue"),
            ProcessOutcome::Stop => write!(f, "stop"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Halt,
}

/// Why an attempt ended early.
#[derive(Debug)]
enum AttemptError {
    Provider(ProviderError),
    Session(SessionError),
}

impl From<ProviderError> for AttemptError {
    fn from(e: ProviderError) -> Self {
        AttemptError::Provider(e)
    }
}

impl From<SessionError> for AttemptError {
    fn from(e: SessionError) -> Self {
        AttemptError::Session(e)
    }
}

/// Drives one assistant message through the provider stream.
pub struct SessionProcessor {
    store: SessionStore,
    message: AssistantMessage,
    model: ModelInfo,
    abort: CancellationToken,
    config: ProcessorConfig,
    policy: RetryPolicy,
    tracker: Arc<RetryTracker>,
    status: Arc<dyn StatusSink>,
    snapshot: Arc<dyn Snapshot>,
    guard: Arc<dyn DoomLoopGuard>,
    summary: Arc<dyn SummaryRefresher>,

    // ── In-flight state, scoped to one `process` call ──
    tool_calls: HashMap<String, Part>,
    reasoning: HashMap<String, Part>,
    text: HashMap<String, Part>,
    step_snapshot: Option<String>,
    blocked: bool,
    retries: u32,
}

impl SessionProcessor {
    /// A processor for `message` with default collaborators: a status board
    /// on the store's bus, no snapshots, a warn-only doom-loop guard, patch
    /// summaries, and a private retry tracker.
    pub fn new(
        store: SessionStore,
        message: AssistantMessage,
        model: ModelInfo,
        abort: CancellationToken,
    ) -> Self {
        let config = ProcessorConfig::default();
        Self {
            status: Arc::new(StatusBoard::new(store.bus().clone())),
            summary: Arc::new(PatchSummary::new(store.clone())),
            tracker: Arc::new(RetryTracker::new(config.retry.retry_timeout)),
            policy: RetryPolicy::new(config.retry.clone()),
            snapshot: Arc::new(NoopSnapshot),
            guard: Arc::new(WarnOnDoomLoop),
            store,
            message,
            model,
            abort,
            config,
            tool_calls: HashMap::new(),
            reasoning: HashMap::new(),
            text: HashMap::new(),
            step_snapshot: None,
            blocked: false,
            retries: 0,
        }
    }

    /// Replace the configuration. Also resets the retry tracker to one with
    /// the new ceiling, so call [`with_retry_tracker`](Self::with_retry_tracker)
    /// afterwards to share a tracker.
    pub fn with_config(mut self, config: ProcessorConfig) -> Self {
        self.policy = RetryPolicy::new(config.retry.clone());
        self.tracker = Arc::new(RetryTracker::new(config.retry.retry_timeout));
        self.config = config;
        self
    }

    /// Share a process-wide retry tracker across processors.
    pub fn with_retry_tracker(mut self, tracker: Arc<RetryTracker>) -> Self {
        self.tracker = tracker;
        self
    }

    pub fn with_status(mut self, status: Arc<dyn StatusSink>) -> Self {
        self.status = status;
        self
    }

    pub fn with_snapshot(mut self, snapshot: Arc<dyn Snapshot>) -> Self {
        self.snapshot = snapshot;
        self
    }

    pub fn with_guard(mut self, guard: Arc<dyn DoomLoopGuard>) -> Self {
        self.guard = guard;
        self
    }

    pub fn with_summary(mut self, summary: Arc<dyn SummaryRefresher>) -> Self {
        self.summary = summary;
        self
    }

    pub fn message(&self) -> &AssistantMessage {
        &self.message
    }

    pub fn into_message(self) -> AssistantMessage {
        self.message
    }

    fn session_id(&self) -> &str {
        &self.message.session_id
    }

    /// Drain the provider stream into the message, retrying as the policy
    /// allows.
    ///
    /// `open` is called once per attempt with that attempt's cancellation
    /// token and must return a fresh stream for the same request. Provider
    /// failures never escape: retryable ones are retried, the rest are
    /// attached to the message and yield [`ProcessOutcome::Stop`]. An abort
    /// finalizes the message and then returns [`SessionError::Aborted`].
    pub async fn process<F, Fut>(&mut self, mut open: F) -> Result<ProcessOutcome, SessionError>
    where
        F: FnMut(CancellationToken) -> Fut + Send,
        Fut: Future<Output = Result<StepStream, ProviderError>> + Send,
    {
        info!(
            session_id = %self.message.session_id,
            message_id = %self.message.id,
            model = %self.model.model_id,
            "processing"
        );
        self.blocked = false;
        self.retries = 0;

        loop {
            let error = match self.attempt(&mut open).await {
                Ok(flow) => {
                    if flow == Flow::Halt {
                        self.blocked = true;
                    }
                    return self.complete().await;
                }
                Err(AttemptError::Session(e)) => {
                    warn!(session_id = %self.message.session_id, "storage failure while processing: {e}");
                    return Err(e);
                }
                Err(AttemptError::Provider(e)) => e,
            };

            if error.is_aborted() || self.abort.is_cancelled() {
                return self.abort_run().await;
            }

            // Anything after `finish` cannot change the reply.
            if self.message.is_completed() {
                debug!(message_id = %self.message.id, "ignoring stream error after finish: {error}");
                return self.complete().await;
            }

            let Some(class) = error.retry_class() else {
                return self.fail(error.to_named()).await;
            };

            if !self.tracker.should_retry(self.session_id(), class) {
                let named = NamedError::new(
                    "RetryTimeoutExceededError",
                    serde_json::json!({
                        "message": format!("retry budget for {class} errors exhausted: {error}"),
                        "cause": error.to_named(),
                    }),
                );
                return self.fail(named).await;
            }

            let class_attempt = self.tracker.attempts(self.session_id(), class) + 1;
            let delay = match self.policy.next_delay(&error, class_attempt) {
                Ok(Some(delay)) => delay,
                Ok(None) => {
                    debug!(%class, class_attempt, "no retries left for error class");
                    return self.fail(error.to_named()).await;
                }
                Err(budget) => return self.fail(budget.to_named(&error)).await,
            };

            self.retries += 1;
            let delay_ms = i64::try_from(delay.as_millis()).unwrap_or(i64::MAX);
            info!(
                session_id = %self.message.session_id,
                attempt = self.retries,
                %class,
                delay_ms,
                "retrying after provider error: {error}"
            );
            self.status.set(
                &self.message.session_id,
                SessionStatus::Retry {
                    attempt: self.retries,
                    message: error.to_string(),
                    next: now_ms().saturating_add(delay_ms),
                },
            );
            self.tracker
                .update_retry_state(&self.message.session_id, class, delay);
            self.reset_attempt_state().await?;

            if retry::sleep(delay, &self.abort).await.is_err() {
                return self.abort_run().await;
            }
        }
    }

    /// One provider attempt, bounded by the request timeout if configured.
    async fn attempt<F, Fut>(&mut self, open: &mut F) -> Result<Flow, AttemptError>
    where
        F: FnMut(CancellationToken) -> Fut + Send,
        Fut: Future<Output = Result<StepStream, ProviderError>> + Send,
    {
        let request = self.abort.child_token();
        let result = match self.config.request_timeout {
            Some(limit) => {
                match tokio::time::timeout(limit, self.drain(open, request.clone())).await {
                    Ok(result) => result,
                    Err(_) => Err(AttemptError::Provider(ProviderError::Timeout {
                        message: format!("provider request exceeded {}", fmt_duration(limit)),
                    })),
                }
            }
            None => self.drain(open, request.clone()).await,
        };
        request.cancel();
        result
    }

    async fn drain<F, Fut>(&mut self, open: &mut F, request: CancellationToken) -> Result<Flow, AttemptError>
    where
        F: FnMut(CancellationToken) -> Fut + Send,
        Fut: Future<Output = Result<StepStream, ProviderError>> + Send,
    {
        let abort = self.abort.clone();
        let mut stream = tokio::select! {
            biased;
            _ = abort.cancelled() => return Err(ProviderError::Aborted.into()),
            opened = open(request) => opened?,
        };

        loop {
            let next = tokio::select! {
                biased;
                _ = abort.cancelled() => return Err(ProviderError::Aborted.into()),
                next = stream.next() => next,
            };
            let Some(item) = next else {
                return Ok(Flow::Continue);
            };
            if self.handle(item?).await? == Flow::Halt {
                return Ok(Flow::Halt);
            }
        }
    }

    // ── Event handling ─────────────────────────────────────────────

    async fn handle(&mut self, event: StepEvent) -> Result<Flow, AttemptError> {
        trace!(kind = event.kind(), "event");
        match event {
            StepEvent::Start => {
                self.status.set(&self.message.session_id, SessionStatus::Busy);
            }

            StepEvent::ReasoningStart {
                id,
                provider_metadata,
            } => {
                if self.reasoning.contains_key(&id) {
                    debug!(%id, "ignoring duplicate reasoning-start");
                } else {
                    let part = Part::new(
                        &self.message,
                        PartKind::Reasoning {
                            text: String::new(),
                            metadata: provider_metadata,
                            time: PartTime::started_now(),
                        },
                    );
                    self.store.update_part(&part).await?;
                    self.reasoning.insert(id, part);
                }
            }
            StepEvent::ReasoningDelta { id, text } => {
                self.append_delta(Buffer::Reasoning, &id, &coerce_text(&text)).await?;
            }
            StepEvent::ReasoningEnd { id } => {
                self.close_buffer(Buffer::Reasoning, &id).await?;
            }

            StepEvent::TextStart { id } => {
                if self.text.contains_key(&id) {
                    debug!(%id, "ignoring duplicate text-start");
                } else {
                    let part = Part::new(
                        &self.message,
                        PartKind::Text {
                            text: String::new(),
                            time: PartTime::started_now(),
                        },
                    );
                    self.store.update_part(&part).await?;
                    self.text.insert(id, part);
                }
            }
            StepEvent::TextDelta { id, text } => {
                self.append_delta(Buffer::Text, &id, &coerce_text(&text)).await?;
            }
            StepEvent::TextEnd { id } => {
                self.close_buffer(Buffer::Text, &id).await?;
            }

            StepEvent::ToolInputStart { id, tool_name } => {
                self.pending_tool(&id, &tool_name).await?;
            }
            StepEvent::ToolInputDelta { id, delta } => {
                if let Some(part) = self.tool_calls.get_mut(&id)
                    && let PartKind::Tool {
                        state: ToolState::Pending { raw, .. },
                        ..
                    } = &mut part.kind
                {
                    raw.push_str(&delta);
                    self.store.update_part(part).await?;
                }
            }
            StepEvent::ToolInputEnd { id } => {
                trace!(%id, "tool input complete");
            }
            StepEvent::ToolCall {
                tool_call_id,
                tool_name,
                input,
            } => {
                self.pending_tool(&tool_call_id, &tool_name).await?;
                if let Some(part) = self.tool_calls.get_mut(&tool_call_id) {
                    let running = ToolState::Running {
                        input,
                        title: None,
                        metadata: None,
                        time: ToolTime {
                            start: now_ms(),
                            end: None,
                        },
                    };
                    set_tool_state(&self.store, part, running).await?;
                }
                if self.check_doom_loop().await? == Verdict::Halt {
                    return Ok(Flow::Halt);
                }
            }
            StepEvent::ToolResult {
                tool_call_id,
                input,
                output,
            } => {
                if let Some(mut part) = self.tool_calls.remove(&tool_call_id) {
                    let next = completed_state(&part, input, output);
                    set_tool_state(&self.store, &mut part, next).await?;
                } else {
                    debug!(%tool_call_id, "tool-result for unknown call");
                }
            }
            StepEvent::ToolError {
                tool_call_id,
                input,
                error,
            } => {
                if let Some(mut part) = self.tool_calls.remove(&tool_call_id) {
                    let next = error_state(&part, Some(input), tool_error_text(&error));
                    set_tool_state(&self.store, &mut part, next).await?;
                } else {
                    debug!(%tool_call_id, "tool-error for unknown call");
                }
            }

            StepEvent::Error { error } => {
                return Err(provider_error_from_value(&error).into());
            }

            StepEvent::StartStep => {
                self.step_snapshot = self.snapshot.track().await;
                let part = Part::new(
                    &self.message,
                    PartKind::StepStart {
                        snapshot: self.step_snapshot.clone(),
                    },
                );
                self.store.update_part(&part).await?;
            }
            StepEvent::FinishStep {
                finish_reason,
                usage,
                provider_metadata,
            } => {
                self.finish_step(finish_reason, usage, provider_metadata).await?;
            }

            StepEvent::Finish => {
                if !self.message.is_completed() {
                    self.message.time.completed = Some(now_ms());
                    self.store.update_message(&self.message).await?;
                }
                self.tracker.clear_retry_state(&self.message.session_id);
            }

            StepEvent::Unknown => {
                warn!("skipping unrecognized stream event");
            }
        }
        Ok(Flow::Continue)
    }

    async fn append_delta(&mut self, buffer: Buffer, id: &str, delta: &str) -> Result<(), SessionError> {
        let map = match buffer {
            Buffer::Text => &mut self.text,
            Buffer::Reasoning => &mut self.reasoning,
        };
        let Some(part) = map.get_mut(id) else {
            debug!(%id, "delta for unknown {buffer} part");
            return Ok(());
        };
        if let PartKind::Text { text, .. } | PartKind::Reasoning { text, .. } = &mut part.kind {
            text.push_str(delta);
        }
        self.store.update_part(part).await
    }

    async fn close_buffer(&mut self, buffer: Buffer, id: &str) -> Result<(), SessionError> {
        let map = match buffer {
            Buffer::Text => &mut self.text,
            Buffer::Reasoning => &mut self.reasoning,
        };
        let Some(mut part) = map.remove(id) else {
            debug!(%id, "end for unknown {buffer} part");
            return Ok(());
        };
        if let PartKind::Text { text, time } | PartKind::Reasoning { text, time, .. } = &mut part.kind {
            let trimmed = text.trim_end().len();
            text.truncate(trimmed);
            if time.end.is_none() {
                time.end = Some(now_ms());
            }
        }
        self.store.update_part(&part).await
    }

    /// The in-flight tool part for `call_id`, created as pending if new.
    async fn pending_tool(&mut self, call_id: &str, tool_name: &str) -> Result<(), SessionError> {
        if self.tool_calls.contains_key(call_id) {
            return Ok(());
        }
        let part = Part::new(
            &self.message,
            PartKind::Tool {
                call_id: call_id.to_string(),
                tool: tool_name.to_string(),
                state: ToolState::pending(),
            },
        );
        self.store.update_part(&part).await?;
        self.tool_calls.insert(call_id.to_string(), part);
        Ok(())
    }

    async fn check_doom_loop(&mut self) -> Result<Verdict, SessionError> {
        let parts = self.store.parts(&self.message.id).await?;
        let Some(doom) = guard::detect(&parts) else {
            return Ok(Verdict::Continue);
        };
        Ok(self.guard.on_doom_loop(&doom).await)
    }

    async fn finish_step(
        &mut self,
        finish_reason: Option<Value>,
        usage: Option<Value>,
        provider_metadata: Option<Value>,
    ) -> Result<(), SessionError> {
        if self.message.is_completed() {
            warn!(message_id = %self.message.id, "ignoring finish-step after finish");
            return Ok(());
        }
        let usage = get_usage(&self.model, usage.as_ref(), provider_metadata.as_ref());
        let reason = canonical_finish_reason(finish_reason.as_ref());

        self.message.finish = Some(reason.clone());
        self.message.cost = self
            .message
            .cost
            .checked_add(usage.cost)
            .unwrap_or(self.message.cost);
        self.message.tokens.accumulate(&usage.tokens);

        let part = Part::new(
            &self.message,
            PartKind::StepFinish {
                reason,
                snapshot: self.step_snapshot.clone(),
                cost: usage.cost,
                tokens: usage.tokens,
            },
        );
        self.store.update_part(&part).await?;
        self.store.update_message(&self.message).await?;
        debug!(
            message_id = %self.message.id,
            input = usage.tokens.input,
            output = usage.tokens.output,
            cost = %usage.cost,
            "step finished"
        );

        if let Some(reference) = self.step_snapshot.take() {
            let patch = self.snapshot.patch(&reference).await;
            if !patch.is_empty() {
                let part = Part::new(
                    &self.message,
                    PartKind::Patch {
                        hash: patch.hash,
                        files: patch.files,
                    },
                );
                self.store.update_part(&part).await?;
            }
        }

        self.tracker.clear_retry_state(&self.message.session_id);
        tokio::spawn(
            self.summary
                .refresh(self.message.session_id.clone(), self.message.id.clone()),
        );
        Ok(())
    }

    // ── Finalization ───────────────────────────────────────────────

    /// Drop buffers from a failed attempt and abort its open tool calls.
    /// Persisted parts stay as they are.
    async fn reset_attempt_state(&mut self) -> Result<(), SessionError> {
        self.text.clear();
        self.reasoning.clear();
        self.step_snapshot = None;
        self.abort_open_tools().await
    }

    async fn abort_open_tools(&mut self) -> Result<(), SessionError> {
        let mut open: Vec<Part> = self.tool_calls.drain().map(|(_, p)| p).collect();
        open.sort_by(|a, b| a.id.cmp(&b.id));
        for mut part in open {
            if part.tool_state().is_some_and(ToolState::is_terminal) {
                continue;
            }
            let next = error_state(&part, None, TOOL_ABORTED.to_string());
            set_tool_state(&self.store, &mut part, next).await?;
        }
        Ok(())
    }

    /// Abort open tools and stamp completion if not already done.
    async fn finalize(&mut self) -> Result<(), SessionError> {
        self.abort_open_tools().await?;
        self.text.clear();
        self.reasoning.clear();
        if !self.message.is_completed() {
            self.message.time.completed = Some(now_ms());
        }
        self.store.update_message(&self.message).await?;
        self.status.set(&self.message.session_id, SessionStatus::Idle);
        Ok(())
    }

    async fn complete(&mut self) -> Result<ProcessOutcome, SessionError> {
        self.tracker.clear_retry_state(&self.message.session_id);
        self.finalize().await?;
        let outcome = if self.blocked || self.message.error.is_some() {
            ProcessOutcome::Stop
        } else {
            ProcessOutcome::Continue
        };
        info!(
            message_id = %self.message.id,
            %outcome,
            cost = %self.message.cost,
            retries = self.retries,
            "processing finished"
        );
        Ok(outcome)
    }

    /// Terminal failure: record the error, announce it, and stop.
    async fn fail(&mut self, error: NamedError) -> Result<ProcessOutcome, SessionError> {
        warn!(
            session_id = %self.message.session_id,
            error = %error.name,
            "giving up: {}",
            error.message().unwrap_or("no message")
        );
        self.tracker.clear_retry_state(&self.message.session_id);
        self.record_error(error);
        self.finalize().await?;
        Ok(ProcessOutcome::Stop)
    }

    async fn abort_run(&mut self) -> Result<ProcessOutcome, SessionError> {
        info!(session_id = %self.message.session_id, "aborted");
        self.tracker.clear_retry_state(&self.message.session_id);
        self.record_error(ProviderError::Aborted.to_named());
        self.finalize().await?;
        Err(SessionError::Aborted)
    }

    fn record_error(&mut self, error: NamedError) {
        if !self.message.is_completed() {
            self.message.error = Some(error.clone());
        }
        self.store.bus().publish(BusEvent::Error {
            session_id: Some(self.message.session_id.clone()),
            error,
        });
    }
}

#[derive(Debug, Clone, Copy)]
enum Buffer {
    Text,
    Reasoning,
}

impl fmt::Display for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Buffer::Text => write!(f, "text"),
            Buffer::Reasoning => write!(f, "reasoning"),
        }
    }
}

// ── Tool transitions ───────────────────────────────────────────────

fn replace_tool_state(part: &mut Part, next: ToolState) {
    if let PartKind::Tool { state, .. } = &mut part.kind {
        *state = next;
    }
}

/// Move a tool part to `next` and persist it. Regressions are ignored. A
/// pending call that jumps straight to a terminal state first persists the
/// implied running state.
async fn set_tool_state(store: &SessionStore, part: &mut Part, next: ToolState) -> Result<(), SessionError> {
    let Some(current) = part.tool_state() else {
        return Ok(());
    };
    if !current.can_transition_to(&next) {
        debug!(
            part_id = %part.id,
            from = current.status(),
            to = next.status(),
            "ignoring tool state regression"
        );
        return Ok(());
    }
    if current.is_pending() && next.is_terminal() {
        let implied = ToolState::Running {
            input: next.input().clone(),
            title: None,
            metadata: None,
            time: ToolTime {
                start: next.started_at().unwrap_or_else(now_ms),
                end: None,
            },
        };
        replace_tool_state(part, implied);
        store.update_part(part).await?;
    }
    replace_tool_state(part, next);
    store.update_part(part).await
}

fn tool_start(part: &Part) -> i64 {
    part.tool_state()
        .and_then(ToolState::started_at)
        .unwrap_or_else(now_ms)
}

/// Input for a terminal state: the event's input if it carried one, else
/// what the part already holds.
fn resolved_input(part: &Part, input: Option<Value>) -> Value {
    match input {
        Some(v) if !v.is_null() => v,
        _ => part
            .tool_state()
            .map(|s| s.input().clone())
            .unwrap_or(Value::Null),
    }
}

fn completed_state(part: &Part, input: Value, output: ToolOutput) -> ToolState {
    ToolState::Completed {
        input: resolved_input(part, Some(input)),
        output: output.output,
        title: output.title.unwrap_or_default(),
        metadata: output.metadata,
        attachments: output.attachments,
        time: ToolTime {
            start: tool_start(part),
            end: Some(now_ms()),
        },
    }
}

fn error_state(part: &Part, input: Option<Value>, error: String) -> ToolState {
    ToolState::Error {
        input: resolved_input(part, input),
        error,
        metadata: None,
        time: ToolTime {
            start: tool_start(part),
            end: Some(now_ms()),
        },
    }
}

fn tool_error_text(error: &Value) -> String {
    error
        .get("message")
        .map(coerce_text)
        .unwrap_or_else(|| coerce_text(error))
}

fn fmt_duration(d: Duration) -> String {
    if d.subsec_millis() == 0 {
        format!("{}s", d.as_secs())
    } else {
        format!("{}ms", d.as_millis())
    }
}
