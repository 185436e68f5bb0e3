use std::time::Duration;
use tracing::warn;

use crate::api::retry::RetryConfig;

/// Configuration for a [`SessionProcessor`](super::processor::SessionProcessor).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProcessorConfig {
    pub retry: RetryConfig,
    /// Deadline for one provider attempt (opening and draining the stream).
    /// Expiry counts as a retryable timeout. `None` disables it.
    pub request_timeout: Option<Duration>,
}

impl ProcessorConfig {
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Load from `CINCH_*` environment variables over the defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let request_timeout = lookup("CINCH_REQUEST_TIMEOUT").and_then(|raw| {
            match raw.trim().parse::<u64>() {
                Ok(0) => None,
                Ok(secs) => Some(Duration::from_secs(secs)),
                Err(_) => {
                    warn!("ignoring CINCH_REQUEST_TIMEOUT={raw:?}: expected seconds");
                    None
                }
            }
        });
        Self {
            retry: RetryConfig::from_lookup(&lookup),
            request_timeout,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_have_no_request_timeout() {
        let config = ProcessorConfig::default();
        assert_eq!(config.request_timeout, None);
        assert_eq!(config.retry, RetryConfig::default());
    }

    #[test]
    fn request_timeout_from_lookup() {
        let config = ProcessorConfig::from_lookup(|name| {
            (name == "CINCH_REQUEST_TIMEOUT").then(|| "300".to_string())
        });
        assert_eq!(config.request_timeout, Some(Duration::from_secs(300)));

        let zero = ProcessorConfig::from_lookup(|_| Some("0".to_string()));
        assert_eq!(zero.request_timeout, None);
    }
}
