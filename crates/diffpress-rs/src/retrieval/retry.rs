//! Bounded retry with exponential backoff for retrieval calls.
//!
//! The semantic-search index is a remote service; transient failures are
//! expected and retried with exponential backoff. The policy is injected
//! into the retriever rather than hardcoded so callers can tune it per
//! deployment.

use std::time::Duration;

use super::RetrievalError;

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of retries (0 = no retries, fail immediately).
    pub max_retries: u32,
    /// Initial delay before the first retry.
    pub initial_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Backoff multiplier (typically 2.0 for exponential backoff).
    pub multiplier: f64,
    /// Whether to shave delays to prevent thundering herd.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(4),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Create a policy with the given retry count and default backoff.
    pub fn with_retries(retries: u32) -> Self {
        Self {
            max_retries: retries,
            ..Default::default()
        }
    }

    /// Calculate the delay for a given attempt number (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.initial_delay.as_secs_f64() * self.multiplier.powi(attempt as i32);
        let capped = base.min(self.max_delay.as_secs_f64());

        if self.jitter {
            // Deterministic jitter keyed on attempt number; good enough to
            // de-synchronize retries without pulling in rand.
            let factor = match attempt % 4 {
                0 => 0.75,
                1 => 0.90,
                2 => 0.60,
                _ => 0.85,
            };
            Duration::from_secs_f64(capped * factor)
        } else {
            Duration::from_secs_f64(capped)
        }
    }

    /// Whether the error is worth retrying. Timeouts and transport errors
    /// are transient; a malformed response will not improve on retry.
    pub fn should_retry(&self, error: &RetrievalError, attempt: u32) -> bool {
        if attempt >= self.max_retries {
            return false;
        }
        matches!(
            error,
            RetrievalError::Request(_) | RetrievalError::Timeout(_)
        )
    }
}
