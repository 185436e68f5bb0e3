//! Error taxonomy for provider streams, retry budgets, and persistence.
//!
//! Provider failures are classified into a small set of [`ProviderError`]
//! variants. Four of them are retryable and map to a [`RetryClass`]; the rest
//! are terminal. Whatever ends a message is persisted on it as a
//! [`NamedError`] (`{"name": ..., "data": {"message": ...}}`).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

/// Lowercased HTTP response headers attached to a provider error.
pub type ResponseHeaders = HashMap<String, String>;

// ── Provider errors ────────────────────────────────────────────────

/// A failure raised while opening or draining a provider stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProviderError {
    /// The provider is throttling or temporarily overloaded.
    #[error("{message}")]
    RateLimit {
        message: String,
        #[serde(default)]
        status: Option<u16>,
        /// Response headers, when the provider returned any.
        #[serde(default)]
        headers: Option<ResponseHeaders>,
    },
    /// Transport-level reset, refusal, or close.
    #[error("socket connection error: {message}")]
    SocketConnection { message: String },
    /// The request exceeded its deadline.
    #[error("request timed out: {message}")]
    Timeout { message: String },
    /// The provider sent a malformed incremental payload.
    #[error("failed to parse provider stream: {message}")]
    StreamParse { message: String },
    /// Anything else: validation errors, auth errors, non-retryable API errors.
    #[error("{message}")]
    Terminal { name: String, message: String },
    /// The governing cancellation signal fired.
    #[error("aborted")]
    Aborted,
}

impl ProviderError {
    pub fn rate_limit(message: impl Into<String>) -> Self {
        ProviderError::RateLimit {
            message: message.into(),
            status: Some(429),
            headers: None,
        }
    }

    pub fn terminal(name: impl Into<String>, message: impl Into<String>) -> Self {
        ProviderError::Terminal {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Attach response headers (keys are lowercased).
    pub fn with_headers<K, V>(self, headers: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        match self {
            ProviderError::RateLimit {
                message, status, ..
            } => ProviderError::RateLimit {
                message,
                status,
                headers: Some(
                    headers
                        .into_iter()
                        .map(|(k, v)| (k.into().to_ascii_lowercase(), v.into()))
                        .collect(),
                ),
            },
            other => other,
        }
    }

    /// Classify an HTTP error response.
    ///
    /// 429 and 5xx are throttling / overload and retryable, 408 is a
    /// timeout, every other status is terminal.
    pub fn from_status(
        status: u16,
        message: impl Into<String>,
        headers: Option<ResponseHeaders>,
    ) -> Self {
        let message = message.into();
        match status {
            408 => ProviderError::Timeout { message },
            429 | 500..=599 => ProviderError::RateLimit {
                message,
                status: Some(status),
                headers: headers.map(|h| {
                    h.into_iter()
                        .map(|(k, v)| (k.to_ascii_lowercase(), v))
                        .collect()
                }),
            },
            _ => ProviderError::Terminal {
                name: "APIError".into(),
                message: format!("HTTP {status}: {message}"),
            },
        }
    }

    /// Classify a transport error from its message.
    pub fn classify_message(message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_lowercase();
        let any = |needles: &[&str]| needles.iter().any(|n| lower.contains(n));

        if any(&[
            "econnreset",
            "econnrefused",
            "connection reset",
            "connection refused",
            "connection closed",
            "socket connection was closed",
            "broken pipe",
        ]) {
            ProviderError::SocketConnection { message }
        } else if any(&["timed out", "timeout", "etimedout"]) {
            ProviderError::Timeout { message }
        } else if any(&["jsonparseerror", "json parse", "failed to parse", "unexpected end of json"])
        {
            ProviderError::StreamParse { message }
        } else {
            ProviderError::Terminal {
                name: "UnknownError".into(),
                message,
            }
        }
    }

    /// Retry class, or `None` for terminal errors and aborts.
    pub fn retry_class(&self) -> Option<RetryClass> {
        match self {
            ProviderError::RateLimit { .. } => Some(RetryClass::RateLimit),
            ProviderError::SocketConnection { .. } => Some(RetryClass::SocketConnection),
            ProviderError::Timeout { .. } => Some(RetryClass::Timeout),
            ProviderError::StreamParse { .. } => Some(RetryClass::StreamParse),
            ProviderError::Terminal { .. } | ProviderError::Aborted => None,
        }
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self, ProviderError::Aborted)
    }

    /// Response headers, for rate-limit errors that carried any.
    pub fn headers(&self) -> Option<&ResponseHeaders> {
        match self {
            ProviderError::RateLimit { headers, .. } => headers.as_ref(),
            _ => None,
        }
    }

    /// The persisted error shape.
    pub fn to_named(&self) -> NamedError {
        match self {
            ProviderError::RateLimit {
                message, status, ..
            } => NamedError::new(
                "APIError",
                serde_json::json!({
                    "message": message,
                    "statusCode": status,
                    "isRetryable": true,
                }),
            ),
            ProviderError::SocketConnection { message } => NamedError::new(
                "SocketConnectionError",
                serde_json::json!({ "message": message, "isRetryable": true }),
            ),
            ProviderError::Timeout { message } => NamedError::new(
                "TimeoutError",
                serde_json::json!({ "message": message, "isRetryable": true }),
            ),
            ProviderError::StreamParse { message } => NamedError::new(
                "StreamParseError",
                serde_json::json!({ "message": message, "isRetryable": true }),
            ),
            ProviderError::Terminal { name, message } => {
                NamedError::new(name.clone(), serde_json::json!({ "message": message }))
            }
            ProviderError::Aborted => NamedError::new(
                "MessageAbortedError",
                serde_json::json!({ "message": "aborted" }),
            ),
        }
    }
}

// ── Retry classes ──────────────────────────────────────────────────

/// Classification used as the key of a session's retry budget window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryClass {
    RateLimit,
    SocketConnection,
    Timeout,
    StreamParse,
}

impl fmt::Display for RetryClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryClass::RateLimit => write!(f, "rate_limit"),
            RetryClass::SocketConnection => write!(f, "socket_connection"),
            RetryClass::Timeout => write!(f, "timeout"),
            RetryClass::StreamParse => write!(f, "stream_parse"),
        }
    }
}

/// Raised by the retry policy instead of returning a delay.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RetryError {
    /// The server asked for a wait longer than the global retry ceiling.
    #[error("retry-after of {requested:?} exceeds the retry timeout of {ceiling:?}")]
    BudgetExceeded {
        requested: Duration,
        ceiling: Duration,
    },
}

impl RetryError {
    pub fn to_named(&self, cause: &ProviderError) -> NamedError {
        match self {
            RetryError::BudgetExceeded { requested, ceiling } => NamedError::new(
                "RetryTimeoutExceededError",
                serde_json::json!({
                    "message": self.to_string(),
                    "requestedMs": requested.as_millis() as u64,
                    "ceilingMs": ceiling.as_millis() as u64,
                    "cause": cause.to_string(),
                }),
            ),
        }
    }
}

// ── Storage and session errors ─────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("storage io error at {key}: {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },
    #[error("storage json error at {key}: {source}")]
    Json {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("no record at {0}")]
    NotFound(String),
}

/// Failure returned from [`SessionProcessor::process`](crate::session::processor::SessionProcessor::process).
///
/// Provider failures never surface here: they are retried or attached to the
/// message. Only aborts and persistence failures escape.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session aborted")]
    Aborted,
    #[error(transparent)]
    Storage(#[from] StorageError),
}

// ── Persisted error shape ──────────────────────────────────────────

/// Error record attached to a message: `{"name": "...", "data": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedError {
    pub name: String,
    pub data: serde_json::Value,
}

impl NamedError {
    pub fn new(name: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            data,
        }
    }

    /// The human-readable message, if the data carries one.
    pub fn message(&self) -> Option<&str> {
        self.data.get("message").and_then(|m| m.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert_eq!(
            ProviderError::from_status(429, "slow down", None).retry_class(),
            Some(RetryClass::RateLimit)
        );
        assert_eq!(
            ProviderError::from_status(503, "overloaded", None).retry_class(),
            Some(RetryClass::RateLimit)
        );
        assert_eq!(
            ProviderError::from_status(408, "late", None).retry_class(),
            Some(RetryClass::Timeout)
        );
        assert_eq!(
            ProviderError::from_status(401, "unauthorized", None).retry_class(),
            None
        );
    }

    #[test]
    fn from_status_lowercases_headers() {
        let headers = HashMap::from([("Retry-After".to_string(), "3".to_string())]);
        let err = ProviderError::from_status(429, "busy", Some(headers));
        assert_eq!(
            err.headers().and_then(|h| h.get("retry-after")).map(String::as_str),
            Some("3")
        );
    }

    #[test]
    fn message_classification() {
        assert_eq!(
            ProviderError::classify_message("The socket connection was closed unexpectedly")
                .retry_class(),
            Some(RetryClass::SocketConnection)
        );
        assert_eq!(
            ProviderError::classify_message("request failed: operation timed out").retry_class(),
            Some(RetryClass::Timeout)
        );
        assert_eq!(
            ProviderError::classify_message("AI_JSONParseError: bad chunk").retry_class(),
            Some(RetryClass::StreamParse)
        );
        assert_eq!(
            ProviderError::classify_message("model not found").retry_class(),
            None
        );
    }

    #[test]
    fn named_error_shape() {
        let named = ProviderError::terminal("ProviderInitError", "no key").to_named();
        assert_eq!(named.name, "ProviderInitError");
        assert_eq!(named.message(), Some("no key"));

        let json = serde_json::to_value(&named).unwrap();
        assert_eq!(json["data"]["message"], "no key");
    }

    #[test]
    fn aborted_is_not_retryable() {
        assert!(ProviderError::Aborted.retry_class().is_none());
        assert_eq!(ProviderError::Aborted.to_named().name, "MessageAbortedError");
    }

    #[test]
    fn provider_error_serde_tagged() {
        let err = ProviderError::rate_limit("busy").with_headers([("retry-after", "1")]);
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["kind"], "rate_limit");
        let back: ProviderError = serde_json::from_value(json).unwrap();
        assert_eq!(back, err);
    }
}
