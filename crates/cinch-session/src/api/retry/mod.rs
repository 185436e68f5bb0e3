//! Retry policy: how long to wait after a retryable provider failure.
//!
//! Rate-limit errors honor server-directed `retry-after` values up to the
//! global retry ceiling and otherwise fall back to jittered exponential
//! backoff. Socket, timeout, and stream-parse failures have their own short
//! schedules bounded by a per-class attempt count.

mod headers;
mod state;

pub use headers::retry_after;
pub use state::{RetryState, RetryTracker};

use chrono::Utc;
use rand::Rng;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{ProviderError, RetryClass, RetryError};

/// Fixed waits for successive timeout retries.
const TIMEOUT_SCHEDULE: [Duration; 3] = [
    Duration::from_secs(30),
    Duration::from_secs(60),
    Duration::from_secs(120),
];

/// Base wait for socket and stream-parse retries (doubles each attempt).
const SHORT_BACKOFF_BASE: Duration = Duration::from_secs(1);

// ── Configuration ──────────────────────────────────────────────────

/// Configuration for retry behavior.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Global ceiling on time spent retrying one error classification.
    /// Server-directed waits above this fail immediately.
    pub retry_timeout: Duration,
    /// Maximum computed backoff when the provider sent headers.
    pub max_retry_delay: Duration,
    /// Maximum computed backoff when the provider sent no headers.
    pub max_delay_no_headers: Duration,
    /// Floor for computed backoff. Never applied to server-directed waits.
    pub min_retry_interval: Duration,
    /// Delay before the first backoff retry.
    pub initial_delay: Duration,
    /// Backoff multiplier.
    pub backoff_factor: f64,
    pub socket_max_retries: u32,
    pub timeout_max_retries: u32,
    pub stream_parse_max_retries: u32,
    /// Add 0-10% random jitter to rate-limit waits.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            retry_timeout: Duration::from_secs(7 * 24 * 60 * 60),
            max_retry_delay: Duration::from_secs(20 * 60),
            max_delay_no_headers: Duration::from_secs(30),
            min_retry_interval: Duration::from_secs(2),
            initial_delay: Duration::from_secs(2),
            backoff_factor: 2.0,
            socket_max_retries: 3,
            timeout_max_retries: 3,
            stream_parse_max_retries: 3,
            jitter: true,
        }
    }
}

impl RetryConfig {
    pub fn with_retry_timeout(mut self, ceiling: Duration) -> Self {
        self.retry_timeout = ceiling;
        self
    }

    pub fn with_max_retry_delay(mut self, max: Duration) -> Self {
        self.max_retry_delay = max;
        self
    }

    pub fn with_min_retry_interval(mut self, min: Duration) -> Self {
        self.min_retry_interval = min;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Load from `CINCH_*` environment variables over the defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load from an arbitrary variable lookup. Unparseable values are
    /// logged and ignored.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        let number = |name: &str| -> Option<u64> {
            let raw = lookup(name)?;
            match raw.trim().parse::<u64>() {
                Ok(v) => Some(v),
                Err(_) => {
                    warn!("ignoring {name}={raw:?}: expected a non-negative integer");
                    None
                }
            }
        };

        if let Some(secs) = number("CINCH_RETRY_TIMEOUT") {
            config.retry_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = number("CINCH_MAX_RETRY_DELAY") {
            config.max_retry_delay = Duration::from_secs(secs);
        }
        if let Some(secs) = number("CINCH_MIN_RETRY_INTERVAL") {
            config.min_retry_interval = Duration::from_secs(secs);
        }
        let count = |name: &str| number(name).map(|n| u32::try_from(n).unwrap_or(u32::MAX));
        if let Some(n) = count("CINCH_SOCKET_MAX_RETRIES") {
            config.socket_max_retries = n;
        }
        if let Some(n) = count("CINCH_TIMEOUT_MAX_RETRIES") {
            config.timeout_max_retries = n;
        }
        if let Some(n) = count("CINCH_STREAM_PARSE_MAX_RETRIES") {
            config.stream_parse_max_retries = n;
        }
        config
    }

    /// Exponential backoff for a 1-indexed attempt, floored at
    /// `min_retry_interval` and capped at `cap`.
    pub fn backoff_for_attempt(&self, attempt: u32, cap: Duration) -> Duration {
        let exponent = attempt.saturating_sub(1).min(64) as i32;
        let base = self.initial_delay.as_secs_f64() * self.backoff_factor.powi(exponent);
        let capped = if base.is_finite() {
            base.min(cap.as_secs_f64())
        } else {
            cap.as_secs_f64()
        };
        Duration::from_secs_f64(capped.max(0.0))
            .max(self.min_retry_interval)
            .min(cap.max(self.min_retry_interval))
    }
}

// ── Policy ─────────────────────────────────────────────────────────

/// Computes waits for retryable provider errors.
#[derive(Debug, Clone, Default)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Wait before retrying a rate-limit error on the given 1-indexed attempt.
    ///
    /// Errors with [`RetryError::BudgetExceeded`] when the server asks for a
    /// wait longer than the retry ceiling.
    pub fn delay(&self, error: &ProviderError, attempt: u32) -> Result<Duration, RetryError> {
        let Some(headers) = error.headers() else {
            let backoff = self
                .config
                .backoff_for_attempt(attempt, self.config.max_delay_no_headers);
            return Ok(self.jittered(backoff));
        };

        if let Some(requested) = retry_after(headers, Utc::now()) {
            if requested > self.config.retry_timeout {
                return Err(RetryError::BudgetExceeded {
                    requested,
                    ceiling: self.config.retry_timeout,
                });
            }
            debug!(requested_ms = requested.as_millis() as u64, "honoring retry-after");
            return Ok(self.jittered(requested));
        }

        let backoff = self
            .config
            .backoff_for_attempt(attempt, self.config.max_retry_delay);
        Ok(self.jittered(backoff))
    }

    /// Socket retry wait: 1s, 2s, 4s, ... `None` once attempts are spent.
    pub fn socket_error_delay(&self, attempt: u32) -> Option<Duration> {
        short_backoff(attempt, self.config.socket_max_retries)
    }

    /// Timeout retry wait: 30s, 60s, 120s. `None` once attempts are spent.
    pub fn timeout_delay(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.config.timeout_max_retries {
            return None;
        }
        let idx = (attempt as usize - 1).min(TIMEOUT_SCHEDULE.len() - 1);
        Some(TIMEOUT_SCHEDULE[idx])
    }

    /// Stream-parse retry wait: 1s, 2s, 4s, ... `None` once attempts are spent.
    pub fn stream_parse_error_delay(&self, attempt: u32) -> Option<Duration> {
        short_backoff(attempt, self.config.stream_parse_max_retries)
    }

    /// Dispatch on the error's class.
    ///
    /// `Ok(None)` means the error is not retryable, or its class has used
    /// up its attempts.
    pub fn next_delay(
        &self,
        error: &ProviderError,
        attempt: u32,
    ) -> Result<Option<Duration>, RetryError> {
        match error.retry_class() {
            Some(RetryClass::RateLimit) => self.delay(error, attempt).map(Some),
            Some(RetryClass::SocketConnection) => Ok(self.socket_error_delay(attempt)),
            Some(RetryClass::Timeout) => Ok(self.timeout_delay(attempt)),
            Some(RetryClass::StreamParse) => Ok(self.stream_parse_error_delay(attempt)),
            None => Ok(None),
        }
    }

    fn jittered(&self, base: Duration) -> Duration {
        if !self.config.jitter || base.is_zero() {
            return base;
        }
        let factor = rand::rng().random_range(0.0..=0.1);
        base + base.mul_f64(factor)
    }
}

fn short_backoff(attempt: u32, max_retries: u32) -> Option<Duration> {
    if attempt == 0 || attempt > max_retries {
        return None;
    }
    let shift = (attempt - 1).min(16);
    Some(SHORT_BACKOFF_BASE * (1u32 << shift))
}

// ── Sleep ──────────────────────────────────────────────────────────

/// Sleep for `duration` unless `cancel` fires first.
///
/// The timer is dropped on either outcome.
pub async fn sleep(duration: Duration, cancel: &CancellationToken) -> Result<(), ProviderError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ProviderError::Aborted),
        _ = tokio::time::sleep(duration) => Ok(()),
    }
}
