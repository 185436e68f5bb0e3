//! Replay a recorded provider event log through the session processor.
//!
//! The log is newline-delimited JSON step events. Attempts are separated by
//! `{"type":"attempt-break"}` lines; an attempt that fails to open is a
//! single `{"type":"open-error","error":{...}}` line.
//!
//! # Examples
//!
//! ```sh
//! # Replay into memory and print the resulting message and parts
//! cinch-session replay run.jsonl
//!
//! # Persist to disk, with a 60 s per-attempt deadline
//! cinch-session replay run.jsonl --storage-dir .cinch/sessions --request-timeout 60
//!
//! # Verbose retry/bus logging
//! RUST_LOG=cinch_session=debug cinch-session replay run.jsonl
//! ```

use cinch_session::api::stream::{self, StepStream, provider_error_from_value};
use cinch_session::prelude::*;
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

const ATTEMPT_BREAK: &str = "attempt-break";
const OPEN_ERROR: &str = "open-error";

#[derive(Parser)]
#[command(name = "cinch-session", about = "Session stream processor tools")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Feed a recorded JSONL event log through the processor
    Replay {
        /// Path to the event log
        events: PathBuf,

        /// Persist records under this directory instead of in memory
        #[arg(long)]
        storage_dir: Option<PathBuf>,

        /// Provider id used for cache accounting
        #[arg(long, default_value = "anthropic")]
        provider: String,

        /// Model id used for pricing
        #[arg(long, default_value = "claude-sonnet-4")]
        model: String,

        /// Per-attempt deadline in seconds (overrides CINCH_REQUEST_TIMEOUT)
        #[arg(long)]
        request_timeout: Option<u64>,
    },
}

/// One recorded attempt: either a stream body or an open failure.
enum Attempt {
    Stream(String),
    OpenError(ProviderError),
}

fn split_attempts(log: &str) -> Vec<Attempt> {
    let mut attempts = Vec::new();
    let mut current = String::new();
    let flush = |current: &mut String, attempts: &mut Vec<Attempt>| {
        let body = std::mem::take(current);
        if !body.trim().is_empty() {
            attempts.push(Attempt::Stream(body));
        }
    };

    for line in log.lines() {
        let marker = serde_json::from_str::<Value>(line).ok().and_then(|v| {
            let kind = v.get("type")?.as_str()?.to_string();
            Some((kind, v))
        });
        match marker {
            Some((kind, _)) if kind == ATTEMPT_BREAK => flush(&mut current, &mut attempts),
            Some((kind, v)) if kind == OPEN_ERROR => {
                flush(&mut current, &mut attempts);
                let error = v.get("error").cloned().unwrap_or(Value::Null);
                attempts.push(Attempt::OpenError(provider_error_from_value(&error)));
            }
            _ => {
                current.push_str(line);
                current.push('\n');
            }
        }
    }
    flush(&mut current, &mut attempts);
    attempts
}

async fn replay(
    events: PathBuf,
    storage_dir: Option<PathBuf>,
    provider: String,
    model: String,
    request_timeout: Option<u64>,
) -> Result<(), String> {
    let log = tokio::fs::read_to_string(&events)
        .await
        .map_err(|e| format!("failed to read {}: {e}", events.display()))?;
    let attempts = split_attempts(&log);
    info!(attempts = attempts.len(), "loaded {}", events.display());

    let storage: Arc<dyn Storage> = match storage_dir {
        Some(dir) => Arc::new(
            FileStorage::new(dir)
                .await
                .map_err(|e| format!("failed to open storage: {e}"))?,
        ),
        None => Arc::new(MemoryStorage::new()),
    };
    let bus = Arc::new(BroadcastBus::default());
    let mut rx = bus.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = rx.recv().await {
            debug!(topic = event.topic(), "bus");
        }
    });

    let store = SessionStore::new(storage, bus);
    let session = store
        .create_session(SessionInfo::new("replay", ".").with_title(events.display().to_string()))
        .await
        .map_err(|e| e.to_string())?;
    let model = ModelInfo::new(provider, model).with_estimated_cost();
    let message = AssistantMessage::new(&session.id, &model);
    store.update_message(&message).await.map_err(|e| e.to_string())?;

    let mut config = ProcessorConfig::from_env();
    if let Some(secs) = request_timeout {
        config.request_timeout = (secs > 0).then(|| Duration::from_secs(secs));
    }

    let abort = CancellationToken::new();
    let on_signal = abort.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_signal.cancel();
        }
    });

    let mut processor =
        SessionProcessor::new(store.clone(), message, model, abort).with_config(config);
    let mut attempts = attempts.into_iter();
    let outcome = processor
        .process(move |_cancel| {
            let next: Result<StepStream, ProviderError> = match attempts.next() {
                Some(Attempt::Stream(body)) => Ok(stream::from_jsonl(&body)),
                Some(Attempt::OpenError(error)) => Err(error),
                None => Err(ProviderError::terminal(
                    "ReplayExhaustedError",
                    "no recorded attempts left",
                )),
            };
            futures::future::ready(next)
        })
        .await;

    let message = processor.into_message();
    let parts = store.parts(&message.id).await.map_err(|e| e.to_string())?;
    let report = serde_json::json!({
        "outcome": outcome.as_ref().map(ToString::to_string).unwrap_or_else(|e| e.to_string()),
        "message": message,
        "parts": parts,
    });
    let rendered = serde_json::to_string_pretty(&report).map_err(|e| e.to_string())?;
    println!("{rendered}");

    outcome.map(|_| ()).map_err(|e| e.to_string())
}

#[tokio::main]
async fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Command::Replay {
            events,
            storage_dir,
            provider,
            model,
            request_timeout,
        } => replay(events, storage_dir, provider, model, request_timeout).await,
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}
