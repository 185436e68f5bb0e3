//! Assistant messages and the parts they are built from.
//!
//! A [`Part`] is one entry in a message's append-mostly log. Its variant
//! lives in [`PartKind`], which serializes inline with the part's identity
//! fields under a `type` tag:
//!
//! ```json
//! {"id": "prt_...", "sessionId": "ses_...", "messageId": "msg_...",
//!  "type": "text", "text": "Hi", "time": {"start": 1, "end": 2}}
//! ```

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::api::usage::{ModelInfo, Tokens};
use crate::error::NamedError;
use crate::id::{self, Prefix};
use crate::session::info::now_ms;

// ── Messages ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageTime {
    pub created: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed: Option<i64>,
}

/// The assistant side of one exchange.
///
/// `cost` and `tokens` only grow, one completed step at a time. Once
/// `time.completed` is set the processor no longer touches the message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssistantMessage {
    pub id: String,
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    pub provider_id: String,
    pub model_id: String,
    /// Accumulated cost in USD, persisted as an exact decimal string.
    pub cost: Decimal,
    pub tokens: Tokens,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<NamedError>,
    pub time: MessageTime,
}

impl AssistantMessage {
    /// A fresh, empty message shell for `session_id`.
    pub fn new(session_id: impl Into<String>, model: &ModelInfo) -> Self {
        Self {
            id: id::ascending(Prefix::Message),
            session_id: session_id.into(),
            parent_id: None,
            provider_id: model.provider_id.clone(),
            model_id: model.model_id.clone(),
            cost: Decimal::ZERO,
            tokens: Tokens::default(),
            finish: None,
            error: None,
            time: MessageTime {
                created: now_ms(),
                completed: None,
            },
        }
    }

    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    pub fn is_completed(&self) -> bool {
        self.time.completed.is_some()
    }
}

// ── Parts ──────────────────────────────────────────────────────────

/// Start/end pair for text and reasoning parts. `end` is set once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartTime {
    pub start: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<i64>,
}

impl PartTime {
    pub fn started_now() -> Self {
        Self {
            start: now_ms(),
            end: None,
        }
    }
}

/// One entry in a message's part log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    pub id: String,
    pub session_id: String,
    pub message_id: String,
    #[serde(flatten)]
    pub kind: PartKind,
}

impl Part {
    /// A part with a fresh ascending id.
    pub fn new(message: &AssistantMessage, kind: PartKind) -> Self {
        Self {
            id: id::ascending(Prefix::Part),
            session_id: message.session_id.clone(),
            message_id: message.id.clone(),
            kind,
        }
    }

    pub fn tool_state(&self) -> Option<&ToolState> {
        match &self.kind {
            PartKind::Tool { state, .. } => Some(state),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum PartKind {
    Text {
        text: String,
        time: PartTime,
    },
    Reasoning {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        metadata: Option<Value>,
        time: PartTime,
    },
    Tool {
        call_id: String,
        tool: String,
        state: ToolState,
    },
    StepStart {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        snapshot: Option<String>,
    },
    StepFinish {
        reason: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        snapshot: Option<String>,
        cost: Decimal,
        tokens: Tokens,
    },
    Patch {
        hash: String,
        files: Vec<String>,
    },
}

impl PartKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            PartKind::Text { .. } => "text",
            PartKind::Reasoning { .. } => "reasoning",
            PartKind::Tool { .. } => "tool",
            PartKind::StepStart { .. } => "step-start",
            PartKind::StepFinish { .. } => "step-finish",
            PartKind::Patch { .. } => "patch",
        }
    }
}

// ── Tool state machine ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolTime {
    pub start: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<i64>,
}

/// `pending → running → completed | error`. States never move backwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ToolState {
    /// Input is still streaming in; `raw` holds the partial buffer.
    Pending {
        #[serde(default)]
        input: Value,
        #[serde(default)]
        raw: String,
    },
    Running {
        input: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        title: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        metadata: Option<Value>,
        time: ToolTime,
    },
    Completed {
        input: Value,
        output: String,
        #[serde(default)]
        title: String,
        #[serde(default)]
        metadata: Value,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        attachments: Vec<Value>,
        time: ToolTime,
    },
    Error {
        input: Value,
        error: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        metadata: Option<Value>,
        time: ToolTime,
    },
}

impl ToolState {
    pub fn pending() -> Self {
        ToolState::Pending {
            input: Value::Object(Default::default()),
            raw: String::new(),
        }
    }

    /// Position in the state machine.
    pub fn rank(&self) -> u8 {
        match self {
            ToolState::Pending { .. } => 0,
            ToolState::Running { .. } => 1,
            ToolState::Completed { .. } | ToolState::Error { .. } => 2,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, ToolState::Pending { .. })
    }

    pub fn is_terminal(&self) -> bool {
        self.rank() == 2
    }

    /// Whether moving to `next` keeps the persisted sequence a prefix of
    /// `pending → running → completed | error`. Updates within `pending`
    /// or `running` are allowed; anything after a terminal state is not.
    pub fn can_transition_to(&self, next: &ToolState) -> bool {
        !self.is_terminal() && next.rank() >= self.rank()
    }

    pub fn input(&self) -> &Value {
        match self {
            ToolState::Pending { input, .. }
            | ToolState::Running { input, .. }
            | ToolState::Completed { input, .. }
            | ToolState::Error { input, .. } => input,
        }
    }

    /// Start time, once the call has left `pending`.
    pub fn started_at(&self) -> Option<i64> {
        match self {
            ToolState::Pending { .. } => None,
            ToolState::Running { time, .. }
            | ToolState::Completed { time, .. }
            | ToolState::Error { time, .. } => Some(time.start),
        }
    }

    pub fn status(&self) -> &'static str {
        match self {
            ToolState::Pending { .. } => "pending",
            ToolState::Running { .. } => "running",
            ToolState::Completed { .. } => "completed",
            ToolState::Error { .. } => "error",
        }
    }
}
