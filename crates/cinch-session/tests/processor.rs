//! End-to-end runs of the session processor against scripted provider
//! streams. Time is paused so retry waits and request deadlines resolve
//! instantly and deterministically.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use cinch_session::api::stream;
use cinch_session::prelude::*;
use cinch_session::session::{HaltOnDoomLoop, Patch};
use futures::StreamExt;
use futures::future::{BoxFuture, Ready, ready};
use rust_decimal::Decimal;
use serde_json::{Value, json};
use tokio::sync::broadcast;
use tokio::time::Instant;

// ── Harness ────────────────────────────────────────────────────────

struct Harness {
    store: SessionStore,
    rx: broadcast::Receiver<BusEvent>,
    message: AssistantMessage,
    model: ModelInfo,
    abort: CancellationToken,
}

async fn harness_with(storage: Arc<dyn Storage>, model: ModelInfo) -> Harness {
    let bus = Arc::new(BroadcastBus::default());
    let rx = bus.subscribe();
    let store = SessionStore::new(storage, bus);
    let session = store
        .create_session(SessionInfo::new("proj", "/work"))
        .await
        .unwrap();
    let message = AssistantMessage::new(&session.id, &model);
    store.update_message(&message).await.unwrap();
    Harness {
        store,
        rx,
        message,
        model,
        abort: CancellationToken::new(),
    }
}

async fn harness() -> Harness {
    harness_with(
        Arc::new(MemoryStorage::new()),
        ModelInfo::new("openai", "gpt-4o"),
    )
    .await
}

impl Harness {
    fn processor(&self) -> SessionProcessor {
        SessionProcessor::new(
            self.store.clone(),
            self.message.clone(),
            self.model.clone(),
            self.abort.clone(),
        )
    }

    fn events(&mut self) -> Vec<BusEvent> {
        let mut out = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            out.push(event);
        }
        out
    }

    async fn parts(&self) -> Vec<Part> {
        self.store.parts(&self.message.id).await.unwrap()
    }
}

fn ev(value: Value) -> StepEvent {
    serde_json::from_value(value).unwrap()
}

fn ok(events: Vec<StepEvent>) -> Result<StepStream, ProviderError> {
    Ok(stream::from_events(events.into_iter().map(Ok).collect()))
}

/// A provider factory that replays `attempts` in order and counts opens.
fn scripted(
    attempts: Vec<Result<StepStream, ProviderError>>,
    opens: Arc<AtomicUsize>,
) -> impl FnMut(CancellationToken) -> Ready<Result<StepStream, ProviderError>> + Send {
    let mut attempts = attempts.into_iter();
    move |_request| {
        opens.fetch_add(1, Ordering::SeqCst);
        ready(attempts.next().unwrap_or_else(|| {
            Err(ProviderError::terminal("ScriptExhausted", "no attempts left"))
        }))
    }
}

fn hello_stream() -> Vec<StepEvent> {
    vec![
        ev(json!({"type": "start"})),
        ev(json!({"type": "start-step"})),
        ev(json!({"type": "text-start", "id": "t1"})),
        StepEvent::text_delta("t1", "H"),
        StepEvent::text_delta("t1", "i  \n"),
        ev(json!({"type": "text-end", "id": "t1"})),
        ev(json!({
            "type": "finish-step",
            "finishReason": "stop",
            "usage": {"inputTokens": 10, "outputTokens": 2},
        })),
        ev(json!({"type": "finish"})),
    ]
}

fn retry_statuses(events: &[BusEvent]) -> Vec<u32> {
    events
        .iter()
        .filter_map(|e| match e {
            BusEvent::Status {
                status: SessionStatus::Retry { attempt, .. },
                ..
            } => Some(*attempt),
            _ => None,
        })
        .collect()
}

fn tool_part<'a>(parts: &'a [Part], call: &str) -> &'a Part {
    parts
        .iter()
        .find(|p| matches!(&p.kind, PartKind::Tool { call_id, .. } if call_id == call))
        .unwrap()
}

// ── Happy path ─────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn text_stream_produces_parts_and_usage() {
    let mut h = harness().await;
    let opens = Arc::new(AtomicUsize::new(0));
    let mut processor = h.processor();

    let outcome = processor
        .process(scripted(vec![ok(hello_stream())], opens.clone()))
        .await
        .unwrap();
    assert_eq!(outcome, ProcessOutcome::Continue);
    assert_eq!(opens.load(Ordering::SeqCst), 1);

    let message = processor.into_message();
    assert!(message.is_completed());
    assert_eq!(message.finish.as_deref(), Some("stop"));
    assert_eq!(message.error, None);
    assert_eq!(message.tokens.input, 10);
    assert_eq!(message.tokens.output, 2);

    let parts = h.parts().await;
    let kinds: Vec<&str> = parts.iter().map(|p| p.kind.type_name()).collect();
    assert_eq!(kinds, ["step-start", "text", "step-finish"]);
    match &parts[1].kind {
        PartKind::Text { text, time } => {
            assert_eq!(text, "Hi");
            assert!(time.end.is_some());
        }
        other => panic!("expected text part, got {other:?}"),
    }
    match &parts[2].kind {
        PartKind::StepFinish { reason, tokens, .. } => {
            assert_eq!(reason, "stop");
            assert_eq!((tokens.input, tokens.output), (10, 2));
        }
        other => panic!("expected step-finish part, got {other:?}"),
    }

    let stored = h
        .store
        .get_message(&message.session_id, &message.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored, message);

    let events = h.events();
    let statuses: Vec<&SessionStatus> = events
        .iter()
        .filter_map(|e| match e {
            BusEvent::Status { status, .. } => Some(status),
            _ => None,
        })
        .collect();
    assert_eq!(statuses, [&SessionStatus::Busy, &SessionStatus::Idle]);
}

#[tokio::test(start_paused = true)]
async fn cost_accumulates_across_steps() {
    let model = ModelInfo::new("openai", "gpt-4o")
        .with_cost(ModelCost::from_f64(3.0, 15.0, 0.0, 0.0).unwrap());
    let h = harness_with(Arc::new(MemoryStorage::new()), model).await;
    let step = |input: u64, output: u64| {
        vec![
            ev(json!({"type": "start-step"})),
            ev(json!({
                "type": "finish-step",
                "finishReason": "tool-calls",
                "usage": {"inputTokens": input, "outputTokens": output},
            })),
        ]
    };
    let mut events = step(1_000_000, 0);
    events.extend(step(0, 1_000));
    events.push(ev(json!({"type": "finish"})));

    let mut processor = h.processor();
    processor
        .process(scripted(vec![ok(events)], Arc::default()))
        .await
        .unwrap();

    let message = processor.into_message();
    assert_eq!(message.cost, Decimal::new(3015, 3));
    assert_eq!(message.tokens.input, 1_000_000);
    assert_eq!(message.tokens.output, 1_000);
    assert_eq!(message.finish.as_deref(), Some("tool-calls"));
}

#[tokio::test(start_paused = true)]
async fn reasoning_is_trimmed_and_closed_once() {
    let mut h = harness().await;
    let events = vec![
        ev(json!({"type": "start"})),
        ev(json!({
            "type": "reasoning-start",
            "id": "r1",
            "providerMetadata": {"anthropic": {"signature": "sig"}},
        })),
        StepEvent::reasoning_delta("r1", "think"),
        StepEvent::reasoning_delta("r1", " hard  \n"),
        ev(json!({"type": "reasoning-end", "id": "r1"})),
        ev(json!({"type": "reasoning-end", "id": "r1"})),
        ev(json!({"type": "finish"})),
    ];
    let mut processor = h.processor();
    processor
        .process(scripted(vec![ok(events)], Arc::default()))
        .await
        .unwrap();

    let parts = h.parts().await;
    let reasoning: Vec<&Part> = parts
        .iter()
        .filter(|p| matches!(p.kind, PartKind::Reasoning { .. }))
        .collect();
    assert_eq!(reasoning.len(), 1);
    match &reasoning[0].kind {
        PartKind::Reasoning {
            text,
            metadata,
            time,
        } => {
            assert_eq!(text, "think hard");
            assert_eq!(metadata.as_ref().unwrap()["anthropic"]["signature"], "sig");
            assert!(time.end.is_some());
        }
        other => panic!("expected reasoning part, got {other:?}"),
    }

    // start, two deltas, one end
    let id = reasoning[0].id.clone();
    let writes = h
        .events()
        .into_iter()
        .filter(|e| matches!(e, BusEvent::PartUpdated { part } if part.id == id))
        .count();
    assert_eq!(writes, 4);
}

#[tokio::test(start_paused = true)]
async fn duplicate_text_start_keeps_buffer() {
    let h = harness().await;
    let events = vec![
        ev(json!({"type": "start"})),
        ev(json!({"type": "text-start", "id": "t1"})),
        StepEvent::text_delta("t1", "a"),
        ev(json!({"type": "text-start", "id": "t1"})),
        StepEvent::text_delta("t1", "b"),
        ev(json!({"type": "text-end", "id": "t1"})),
        ev(json!({"type": "finish"})),
    ];
    let mut processor = h.processor();
    processor
        .process(scripted(vec![ok(events)], Arc::default()))
        .await
        .unwrap();

    let parts = h.parts().await;
    let texts: Vec<&str> = parts
        .iter()
        .filter_map(|p| match &p.kind {
            PartKind::Text { text, .. } => Some(text.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(texts, ["ab"]);
}

#[tokio::test(start_paused = true)]
async fn numeric_text_delta_is_stored_as_text() {
    let h = harness().await;
    let events = vec![
        ev(json!({"type": "start"})),
        ev(json!({"type": "text-start", "id": "t1"})),
        ev(json!({"type": "text-delta", "id": "t1", "text": 42})),
        ev(json!({"type": "text-end", "id": "t1"})),
        ev(json!({"type": "finish"})),
    ];
    let mut processor = h.processor();
    processor
        .process(scripted(vec![ok(events)], Arc::default()))
        .await
        .unwrap();

    let parts = h.parts().await;
    assert!(
        parts
            .iter()
            .any(|p| matches!(&p.kind, PartKind::Text { text, .. } if text == "42"))
    );
}

// ── Retries ────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn rate_limit_honors_retry_after_then_succeeds() {
    let mut h = harness().await;
    let opens = Arc::new(AtomicUsize::new(0));
    let tracker = Arc::new(RetryTracker::new(RetryConfig::default().retry_timeout));
    let mut processor = h.processor().with_retry_tracker(tracker.clone());

    let throttled = ProviderError::rate_limit("slow down").with_headers([("Retry-After", "1")]);
    let started = Instant::now();
    let outcome = processor
        .process(scripted(vec![Err(throttled), ok(hello_stream())], opens.clone()))
        .await
        .unwrap();

    assert_eq!(outcome, ProcessOutcome::Continue);
    assert_eq!(opens.load(Ordering::SeqCst), 2);
    let waited = started.elapsed();
    assert!(waited >= Duration::from_secs(1), "waited {waited:?}");
    assert!(waited <= Duration::from_millis(1100), "waited {waited:?}");
    assert_eq!(retry_statuses(&h.events()), [1]);
    assert!(tracker.is_empty());
    assert_eq!(processor.message().error, None);
}

#[tokio::test(start_paused = true)]
async fn request_timeout_does_not_cut_retry_wait_short() {
    let h = harness().await;
    let opens = Arc::new(AtomicUsize::new(0));
    let config = ProcessorConfig::default().with_request_timeout(Duration::from_secs(5));
    let mut processor = h.processor().with_config(config);

    let throttled = ProviderError::rate_limit("busy").with_headers([("retry-after", "30")]);
    let started = Instant::now();
    let outcome = processor
        .process(scripted(vec![Err(throttled), ok(hello_stream())], opens.clone()))
        .await
        .unwrap();

    assert_eq!(outcome, ProcessOutcome::Continue);
    assert_eq!(opens.load(Ordering::SeqCst), 2);
    assert!(started.elapsed() >= Duration::from_secs(30));
    assert_eq!(processor.message().error, None);
}

#[tokio::test(start_paused = true)]
async fn hung_stream_times_out_and_retries() {
    let mut h = harness().await;
    let opens = Arc::new(AtomicUsize::new(0));
    let config = ProcessorConfig::default().with_request_timeout(Duration::from_secs(10));
    let mut processor = h.processor().with_config(config);

    let hung: StepStream = futures::stream::iter(vec![Ok(ev(json!({"type": "start"})))])
        .chain(futures::stream::pending())
        .boxed();
    let started = Instant::now();
    let outcome = processor
        .process(scripted(vec![Ok(hung), ok(hello_stream())], opens.clone()))
        .await
        .unwrap();

    assert_eq!(outcome, ProcessOutcome::Continue);
    assert_eq!(opens.load(Ordering::SeqCst), 2);
    // 10s deadline, then the first timeout step of 30s.
    assert!(started.elapsed() >= Duration::from_secs(40));
    let events = h.events();
    let retry_message = events.iter().find_map(|e| match e {
        BusEvent::Status {
            status: SessionStatus::Retry { message, .. },
            ..
        } => Some(message.clone()),
        _ => None,
    });
    assert!(retry_message.unwrap().contains("timed out"));
}

#[tokio::test(start_paused = true)]
async fn malformed_stream_line_is_retried() {
    let h = harness().await;
    let opens = Arc::new(AtomicUsize::new(0));
    let broken = stream::from_jsonl("{\"type\":\"start\"}\n{\"type\":\"text-delta\",\"id\":");
    let mut processor = h.processor();

    let outcome = processor
        .process(scripted(vec![Ok(broken), ok(hello_stream())], opens.clone()))
        .await
        .unwrap();

    assert_eq!(outcome, ProcessOutcome::Continue);
    assert_eq!(opens.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn socket_errors_give_up_after_three_retries() {
    let mut h = harness().await;
    let opens = Arc::new(AtomicUsize::new(0));
    let reset = || Err(ProviderError::classify_message("ECONNRESET: socket hang up"));
    let mut processor = h.processor();

    let started = Instant::now();
    let outcome = processor
        .process(scripted(
            vec![reset(), reset(), reset(), reset(), ok(hello_stream())],
            opens.clone(),
        ))
        .await
        .unwrap();

    assert_eq!(outcome, ProcessOutcome::Stop);
    assert_eq!(opens.load(Ordering::SeqCst), 4);
    // 1s + 2s + 4s
    assert!(started.elapsed() >= Duration::from_secs(7));
    assert_eq!(retry_statuses(&h.events()), [1, 2, 3]);

    let error = processor.message().error.clone().unwrap();
    assert_eq!(error.name, "SocketConnectionError");
}

#[tokio::test(start_paused = true)]
async fn retry_after_beyond_ceiling_fails_without_waiting() {
    let mut h = harness().await;
    let opens = Arc::new(AtomicUsize::new(0));
    let config = ProcessorConfig::default()
        .with_retry(RetryConfig::default().with_retry_timeout(Duration::from_secs(3600)));
    let mut processor = h.processor().with_config(config);

    let throttled = ProviderError::rate_limit("quota").with_headers([("retry-after", "7200")]);
    let started = Instant::now();
    let outcome = processor
        .process(scripted(vec![Err(throttled)], opens.clone()))
        .await
        .unwrap();

    assert_eq!(outcome, ProcessOutcome::Stop);
    assert_eq!(opens.load(Ordering::SeqCst), 1);
    assert!(started.elapsed() < Duration::from_secs(1));

    let error = processor.message().error.clone().unwrap();
    assert_eq!(error.name, "RetryTimeoutExceededError");
    assert!(retry_statuses(&h.events()).is_empty());
}

#[tokio::test(start_paused = true)]
async fn retry_window_closes_after_ceiling() {
    let h = harness().await;
    let opens = Arc::new(AtomicUsize::new(0));
    let config = ProcessorConfig::default().with_retry(
        RetryConfig::default()
            .with_retry_timeout(Duration::from_secs(60))
            .with_jitter(false),
    );
    let mut processor = h.processor().with_config(config);

    let throttled = || Err(ProviderError::rate_limit("busy").with_headers([("retry-after", "40")]));
    let outcome = processor
        .process(scripted(
            vec![throttled(), throttled(), throttled(), ok(hello_stream())],
            opens.clone(),
        ))
        .await
        .unwrap();

    // Two 40s waits consume the 60s window; the third error is not retried.
    assert_eq!(outcome, ProcessOutcome::Stop);
    assert_eq!(opens.load(Ordering::SeqCst), 3);
    let error = processor.message().error.clone().unwrap();
    assert_eq!(error.name, "RetryTimeoutExceededError");
}

// ── Terminal errors ────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn terminal_error_stops_and_is_announced() {
    let mut h = harness().await;
    let opens = Arc::new(AtomicUsize::new(0));
    let events = vec![
        ev(json!({"type": "start"})),
        ev(json!({"type": "error", "error": {"message": "invalid api key", "statusCode": 401}})),
        ev(json!({"type": "finish"})),
    ];
    let mut processor = h.processor();

    let outcome = processor
        .process(scripted(vec![ok(events)], opens.clone()))
        .await
        .unwrap();

    assert_eq!(outcome, ProcessOutcome::Stop);
    assert_eq!(opens.load(Ordering::SeqCst), 1);
    let message = processor.into_message();
    assert!(message.is_completed());
    let error = message.error.unwrap();
    assert_eq!(error.name, "APIError");
    assert!(error.message().unwrap().contains("invalid api key"));

    let announced = h.events().into_iter().find_map(|e| match e {
        BusEvent::Error { session_id, error } => Some((session_id, error)),
        _ => None,
    });
    let (session_id, error) = announced.unwrap();
    assert_eq!(session_id.as_deref(), Some(message.session_id.as_str()));
    assert_eq!(error.name, "APIError");
}

#[tokio::test(start_paused = true)]
async fn error_after_finish_is_a_clean_end() {
    let h = harness().await;
    let opens = Arc::new(AtomicUsize::new(0));
    let mut events = hello_stream();
    events.push(ev(json!({
        "type": "error",
        "error": {"message": "overloaded", "statusCode": 429},
    })));
    let mut processor = h.processor();

    let outcome = processor
        .process(scripted(vec![ok(events)], opens.clone()))
        .await
        .unwrap();

    assert_eq!(outcome, ProcessOutcome::Continue);
    assert_eq!(opens.load(Ordering::SeqCst), 1);
    let message = processor.into_message();
    assert_eq!(message.error, None);
    assert_eq!((message.tokens.input, message.tokens.output), (10, 2));
}

#[tokio::test(start_paused = true)]
async fn finish_step_after_finish_is_ignored() {
    let h = harness().await;
    let mut events = hello_stream();
    events.push(ev(json!({
        "type": "finish-step",
        "finishReason": "length",
        "usage": {"inputTokens": 500, "outputTokens": 500},
    })));
    let mut processor = h.processor();
    processor
        .process(scripted(vec![ok(events)], Arc::default()))
        .await
        .unwrap();

    let message = processor.into_message();
    assert_eq!(message.finish.as_deref(), Some("stop"));
    assert_eq!((message.tokens.input, message.tokens.output), (10, 2));
    let step_finishes = h
        .parts()
        .await
        .iter()
        .filter(|p| matches!(p.kind, PartKind::StepFinish { .. }))
        .count();
    assert_eq!(step_finishes, 1);
}

// ── Tools ──────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn tool_states_only_move_forward() {
    let mut h = harness().await;
    let events = vec![
        ev(json!({"type": "start"})),
        ev(json!({"type": "start-step"})),
        ev(json!({"type": "tool-input-start", "id": "c1", "toolName": "read"})),
        ev(json!({"type": "tool-input-delta", "id": "c1", "delta": "{\"path\":"})),
        ev(json!({"type": "tool-call", "toolCallId": "c1", "toolName": "read", "input": {"path": "a"}})),
        ev(json!({
            "type": "tool-result",
            "toolCallId": "c1",
            "input": {"path": "a"},
            "output": {"title": "a", "output": "contents"},
        })),
        // Late duplicates after a terminal state are ignored.
        ev(json!({"type": "tool-error", "toolCallId": "c1", "error": "late"})),
        ev(json!({"type": "tool-input-start", "id": "c2", "toolName": "write"})),
        ev(json!({"type": "tool-error", "toolCallId": "c2", "input": {"path": "b"}, "error": {"message": "denied"}})),
        ev(json!({"type": "finish-step", "finishReason": "tool-calls"})),
        ev(json!({"type": "finish"})),
    ];
    let mut processor = h.processor();
    let outcome = processor
        .process(scripted(vec![ok(events)], Arc::default()))
        .await
        .unwrap();
    assert_eq!(outcome, ProcessOutcome::Continue);

    let parts = h.parts().await;
    match tool_part(&parts, "c1").tool_state().unwrap() {
        ToolState::Completed {
            input,
            output,
            title,
            time,
            ..
        } => {
            assert_eq!(input, &json!({"path": "a"}));
            assert_eq!(output, "contents");
            assert_eq!(title, "a");
            assert!(time.end.is_some());
        }
        other => panic!("expected completed, got {other:?}"),
    }
    match tool_part(&parts, "c2").tool_state().unwrap() {
        ToolState::Error { input, error, .. } => {
            assert_eq!(input, &json!({"path": "b"}));
            assert_eq!(error, "denied");
        }
        other => panic!("expected error, got {other:?}"),
    }

    // Every persisted sequence is a prefix of pending → running → terminal,
    // and a pending call that errors still passes through running.
    let c2_id = tool_part(&parts, "c2").id.clone();
    let mut seen: Vec<(String, &'static str)> = Vec::new();
    for event in h.events() {
        if let BusEvent::PartUpdated { part } = event
            && let Some(state) = part.tool_state()
        {
            seen.push((part.id.clone(), state.status()));
        }
    }
    let c2: Vec<&str> = seen
        .iter()
        .filter(|(id, _)| *id == c2_id)
        .map(|(_, s)| *s)
        .collect();
    assert_eq!(c2, ["pending", "running", "error"]);

    let rank = |s: &str| match s {
        "pending" => 0,
        "running" => 1,
        _ => 2,
    };
    for id in [tool_part(&parts, "c1").id.clone(), c2_id] {
        let ranks: Vec<u8> = seen
            .iter()
            .filter(|(pid, _)| *pid == id)
            .map(|(_, s)| rank(s))
            .collect();
        assert!(ranks.windows(2).all(|w| w[0] <= w[1]), "{ranks:?}");
        assert_eq!(ranks.iter().filter(|r| **r == 2).count(), 1);
    }
}

#[tokio::test(start_paused = true)]
async fn doom_loop_halts_with_strict_guard() {
    let h = harness().await;
    let call = |id: &str| {
        ev(json!({"type": "tool-call", "toolCallId": id, "toolName": "read", "input": {"path": "same"}}))
    };
    let result = |id: &str| {
        ev(json!({"type": "tool-result", "toolCallId": id, "output": {"output": "x"}}))
    };
    let events = vec![
        ev(json!({"type": "start"})),
        call("c1"),
        result("c1"),
        call("c2"),
        result("c2"),
        call("c3"),
        ev(json!({"type": "text-start", "id": "never"})),
        ev(json!({"type": "finish"})),
    ];
    let mut processor = h.processor().with_guard(Arc::new(HaltOnDoomLoop));

    let outcome = processor
        .process(scripted(vec![ok(events)], Arc::default()))
        .await
        .unwrap();

    assert_eq!(outcome, ProcessOutcome::Stop);
    let parts = h.parts().await;
    assert!(parts.iter().all(|p| p.kind.type_name() == "tool"));
    match tool_part(&parts, "c3").tool_state().unwrap() {
        ToolState::Error { error, .. } => assert_eq!(error, "Tool execution aborted"),
        other => panic!("expected aborted tool, got {other:?}"),
    }
    assert!(processor.message().is_completed());
}

#[tokio::test(start_paused = true)]
async fn doom_loop_only_warns_by_default() {
    let h = harness().await;
    let mut events = vec![ev(json!({"type": "start"}))];
    for id in ["c1", "c2", "c3"] {
        events.push(ev(
            json!({"type": "tool-call", "toolCallId": id, "toolName": "ls", "input": {}}),
        ));
        events.push(ev(
            json!({"type": "tool-result", "toolCallId": id, "output": {"output": "."}}),
        ));
    }
    events.push(ev(json!({"type": "finish"})));

    let mut processor = h.processor();
    let outcome = processor
        .process(scripted(vec![ok(events)], Arc::default()))
        .await
        .unwrap();
    assert_eq!(outcome, ProcessOutcome::Continue);
}

// ── Abort ──────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn abort_mid_stream_finalizes_message() {
    let h = harness().await;
    let head = vec![
        Ok(ev(json!({"type": "start"}))),
        Ok(ev(json!({"type": "text-start", "id": "t1"}))),
        Ok(StepEvent::text_delta("t1", "partial")),
        Ok(ev(json!({"type": "tool-call", "toolCallId": "c1", "toolName": "bash", "input": {"cmd": "sleep 100"}}))),
    ];
    let stalled: StepStream = futures::stream::iter(head)
        .chain(futures::stream::pending())
        .boxed();

    let abort = h.abort.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        abort.cancel();
    });

    let mut processor = h.processor();
    let result = processor
        .process(scripted(vec![Ok(stalled)], Arc::default()))
        .await;
    assert!(matches!(result, Err(SessionError::Aborted)));

    let message = processor.into_message();
    assert!(message.is_completed());
    assert_eq!(message.error.unwrap().name, "MessageAbortedError");

    let parts = h.parts().await;
    match tool_part(&parts, "c1").tool_state().unwrap() {
        ToolState::Error { error, input, .. } => {
            assert_eq!(error, "Tool execution aborted");
            assert_eq!(input, &json!({"cmd": "sleep 100"}));
        }
        other => panic!("expected aborted tool, got {other:?}"),
    }
    let text = parts
        .iter()
        .find_map(|p| match &p.kind {
            PartKind::Text { text, .. } => Some(text.clone()),
            _ => None,
        })
        .unwrap();
    assert_eq!(text, "partial");
}

#[tokio::test(start_paused = true)]
async fn abort_during_retry_wait_returns_promptly() {
    let h = harness().await;
    let opens = Arc::new(AtomicUsize::new(0));
    let abort = h.abort.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(5)).await;
        abort.cancel();
    });

    let throttled = ProviderError::rate_limit("busy").with_headers([("retry-after", "60")]);
    let mut processor = h.processor();
    let started = Instant::now();
    let result = processor
        .process(scripted(vec![Err(throttled), ok(hello_stream())], opens.clone()))
        .await;

    assert!(matches!(result, Err(SessionError::Aborted)));
    assert!(started.elapsed() < Duration::from_secs(60));
    assert_eq!(opens.load(Ordering::SeqCst), 1);
}

// ── Snapshots ──────────────────────────────────────────────────────

struct FixedSnapshot;

impl Snapshot for FixedSnapshot {
    fn track(&self) -> BoxFuture<'_, Option<String>> {
        Box::pin(async { Some("snap-1".to_string()) })
    }

    fn patch<'a>(&'a self, reference: &'a str) -> BoxFuture<'a, Patch> {
        Box::pin(async move {
            Patch {
                hash: reference.to_string(),
                files: vec!["src/lib.rs".to_string()],
            }
        })
    }
}

#[tokio::test(start_paused = true)]
async fn step_records_snapshot_and_patch() {
    let h = harness().await;
    let mut processor = h.processor().with_snapshot(Arc::new(FixedSnapshot));
    processor
        .process(scripted(vec![ok(hello_stream())], Arc::default()))
        .await
        .unwrap();

    let parts = h.parts().await;
    let kinds: Vec<&str> = parts.iter().map(|p| p.kind.type_name()).collect();
    assert_eq!(kinds, ["step-start", "text", "step-finish", "patch"]);
    assert_eq!(
        parts[0].kind,
        PartKind::StepStart {
            snapshot: Some("snap-1".into())
        }
    );
    assert_eq!(
        parts[3].kind,
        PartKind::Patch {
            hash: "snap-1".into(),
            files: vec!["src/lib.rs".into()],
        }
    );
}

// ── Persistence ────────────────────────────────────────────────────

#[tokio::test]
async fn file_storage_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let storage = Arc::new(FileStorage::new(dir.path()).await.unwrap());
    let h = harness_with(storage, ModelInfo::new("anthropic", "claude-sonnet-4")).await;

    let mut processor = h.processor();
    processor
        .process(scripted(vec![ok(hello_stream())], Arc::default()))
        .await
        .unwrap();
    let message = processor.into_message();

    let reopened = SessionStore::new(
        Arc::new(FileStorage::new(dir.path()).await.unwrap()),
        Arc::new(BroadcastBus::default()),
    );
    let stored = reopened
        .get_message(&message.session_id, &message.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored, message);
    let parts = reopened.parts(&message.id).await.unwrap();
    assert_eq!(parts.len(), 3);
    assert_eq!(parts, h.parts().await);
}
