//! Provider step events and the stream type the processor drains.
//!
//! Events are tagged by `type` in kebab-case (`text-delta`, `finish-step`,
//! ...) with camelCase fields, matching what provider adapters emit. Any
//! unrecognized `type` decodes to [`StepEvent::Unknown`] so newer providers
//! don't break older processors.

use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::ProviderError;

/// Asynchronous sequence of step events for one provider attempt.
pub type StepStream = BoxStream<'static, Result<StepEvent, ProviderError>>;

/// Output of a completed tool call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolOutput {
    pub title: Option<String>,
    pub output: String,
    pub metadata: Value,
    pub attachments: Vec<Value>,
}

/// One incremental event from a provider stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum StepEvent {
    Start,
    ReasoningStart {
        id: String,
        #[serde(default)]
        provider_metadata: Option<Value>,
    },
    ReasoningDelta {
        id: String,
        #[serde(default)]
        text: Value,
    },
    ReasoningEnd {
        id: String,
    },
    ToolInputStart {
        id: String,
        tool_name: String,
    },
    ToolInputDelta {
        id: String,
        #[serde(default)]
        delta: String,
    },
    ToolInputEnd {
        id: String,
    },
    ToolCall {
        tool_call_id: String,
        tool_name: String,
        #[serde(default)]
        input: Value,
    },
    ToolResult {
        tool_call_id: String,
        #[serde(default)]
        input: Value,
        #[serde(default)]
        output: ToolOutput,
    },
    ToolError {
        tool_call_id: String,
        #[serde(default)]
        input: Value,
        #[serde(default)]
        error: Value,
    },
    /// A provider failure delivered in-band.
    Error {
        #[serde(default)]
        error: Value,
    },
    StartStep,
    FinishStep {
        #[serde(default)]
        finish_reason: Option<Value>,
        #[serde(default)]
        usage: Option<Value>,
        #[serde(default)]
        provider_metadata: Option<Value>,
    },
    TextStart {
        id: String,
    },
    TextDelta {
        id: String,
        #[serde(default)]
        text: Value,
    },
    TextEnd {
        id: String,
    },
    Finish,
    #[serde(other)]
    Unknown,
}

impl StepEvent {
    /// An in-band error event carrying `error`.
    pub fn error(error: &ProviderError) -> Self {
        StepEvent::Error {
            error: serde_json::to_value(error).unwrap_or_else(|_| Value::String(error.to_string())),
        }
    }

    pub fn text_delta(id: impl Into<String>, text: impl Into<String>) -> Self {
        StepEvent::TextDelta {
            id: id.into(),
            text: Value::String(text.into()),
        }
    }

    pub fn reasoning_delta(id: impl Into<String>, text: impl Into<String>) -> Self {
        StepEvent::ReasoningDelta {
            id: id.into(),
            text: Value::String(text.into()),
        }
    }

    /// The kebab-case event type, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            StepEvent::Start => "start",
            StepEvent::ReasoningStart { .. } => "reasoning-start",
            StepEvent::ReasoningDelta { .. } => "reasoning-delta",
            StepEvent::ReasoningEnd { .. } => "reasoning-end",
            StepEvent::ToolInputStart { .. } => "tool-input-start",
            StepEvent::ToolInputDelta { .. } => "tool-input-delta",
            StepEvent::ToolInputEnd { .. } => "tool-input-end",
            StepEvent::ToolCall { .. } => "tool-call",
            StepEvent::ToolResult { .. } => "tool-result",
            StepEvent::ToolError { .. } => "tool-error",
            StepEvent::Error { .. } => "error",
            StepEvent::StartStep => "start-step",
            StepEvent::FinishStep { .. } => "finish-step",
            StepEvent::TextStart { .. } => "text-start",
            StepEvent::TextDelta { .. } => "text-delta",
            StepEvent::TextEnd { .. } => "text-end",
            StepEvent::Finish => "finish",
            StepEvent::Unknown => "unknown",
        }
    }
}

/// Coerce a delta payload to text. Strings pass through, `null` is empty,
/// anything else is its JSON rendering.
pub fn coerce_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Convert an in-band error payload into the provider error taxonomy.
///
/// Accepts a serialized [`ProviderError`], a bare message string, or an
/// object with `message` (and optionally `statusCode`/`responseHeaders`).
pub fn provider_error_from_value(value: &Value) -> ProviderError {
    if let Ok(err) = serde_json::from_value::<ProviderError>(value.clone()) {
        // Header lookups are by lowercase name.
        return match err.headers().cloned() {
            Some(headers) => err.with_headers(headers),
            None => err,
        };
    }
    match value {
        Value::String(message) => ProviderError::classify_message(message.clone()),
        Value::Object(obj) => {
            let message = obj
                .get("message")
                .map(coerce_text)
                .unwrap_or_else(|| value.to_string());
            let status = obj
                .get("statusCode")
                .or_else(|| obj.get("status"))
                .and_then(Value::as_u64)
                .and_then(|s| u16::try_from(s).ok());
            let headers = obj
                .get("responseHeaders")
                .and_then(Value::as_object)
                .map(|h| {
                    h.iter()
                        .map(|(k, v)| (k.clone(), coerce_text(v)))
                        .collect()
                });
            match status {
                Some(status) => ProviderError::from_status(status, message, headers),
                None => ProviderError::classify_message(message),
            }
        }
        other => ProviderError::classify_message(other.to_string()),
    }
}

/// Parse one JSON line into an event. Blank lines yield `None`; malformed
/// JSON is a [`ProviderError::StreamParse`].
pub fn parse_event_line(line: &str) -> Result<Option<StepEvent>, ProviderError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let value: Value = serde_json::from_str(line).map_err(|e| ProviderError::StreamParse {
        message: format!("{e}: {line}"),
    })?;
    let event: StepEvent =
        serde_json::from_value(value.clone()).map_err(|e| ProviderError::StreamParse {
            message: format!("{e}: {line}"),
        })?;
    if event == StepEvent::Unknown {
        let kind = value
            .get("type")
            .and_then(serde_json::Value::as_str)
            .unwrap_or("<missing>");
        debug!("decoded unrecognized event type {kind:?}");
    }
    Ok(Some(event))
}

/// A stream that yields the given items in order.
pub fn from_events(events: Vec<Result<StepEvent, ProviderError>>) -> StepStream {
    stream::iter(events).boxed()
}

/// A stream over newline-delimited JSON events.
///
/// A malformed line yields a `StreamParse` error at its position, after
/// which the stream ends.
pub fn from_jsonl(text: &str) -> StepStream {
    let mut items = Vec::new();
    for line in text.lines() {
        match parse_event_line(line) {
            Ok(Some(event)) => items.push(Ok(event)),
            Ok(None) => {}
            Err(err) => {
                warn!("stopping stream at malformed line: {err}");
                items.push(Err(err));
                break;
            }
        }
    }
    from_events(items)
}
