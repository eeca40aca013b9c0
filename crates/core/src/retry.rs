//! Retry policy for transient infrastructure failures in the worker.
//!
//! Classification is by error kind, not by message content: only the
//! metadata store, object store, and queue kinds are retryable.

use crate::errors::PipelineError;
use std::time::Duration;

/// Retry policy configuration
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts (0 = no retries, just the initial attempt)
    pub max_attempts: u32,
    /// Initial delay before first retry
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Backoff multiplier (e.g., 2.0 for exponential backoff)
    pub backoff_multiplier: f64,
    /// Add random jitter to prevent thundering herd (0.0 - 1.0)
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }
}

impl RetryPolicy {
    /// Load retry policy from environment variables with optional prefix
    pub fn from_env_with_prefix(prefix: &str) -> Self {
        let defaults = Self::default();

        let max_attempts = std::env::var(format!("{}_MAX_ATTEMPTS", prefix))
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.max_attempts);

        let initial_delay_ms = std::env::var(format!("{}_INITIAL_DELAY_MS", prefix))
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.initial_delay.as_millis() as u64);

        let max_delay_ms = std::env::var(format!("{}_MAX_DELAY_MS", prefix))
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.max_delay.as_millis() as u64);

        let backoff_multiplier = std::env::var(format!("{}_BACKOFF_MULTIPLIER", prefix))
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.backoff_multiplier);

        let jitter_factor = std::env::var(format!("{}_JITTER_FACTOR", prefix))
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.jitter_factor);

        Self {
            max_attempts,
            initial_delay: Duration::from_millis(initial_delay_ms),
            max_delay: Duration::from_millis(max_delay_ms),
            backoff_multiplier,
            jitter_factor,
        }
    }

    /// Load the default worker retry policy from environment
    pub fn from_env() -> Self {
        Self::from_env_with_prefix("RETRY")
    }

    /// Calculate delay for a given attempt number (0-indexed)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base_delay = self.initial_delay.as_millis() as f64
            * self.backoff_multiplier.powi((attempt - 1) as i32);
        let capped_delay = base_delay.min(self.max_delay.as_millis() as f64);

        // Add jitter
        let jitter = if self.jitter_factor > 0.0 {
            let jitter_range = capped_delay * self.jitter_factor;
            (rand::random::<f64>() - 0.5) * 2.0 * jitter_range
        } else {
            0.0
        };

        let final_delay = (capped_delay + jitter).max(0.0);
        Duration::from_millis(final_delay as u64)
    }
}

/// Trait to determine if an error is retryable
pub trait RetryableError {
    fn is_retryable(&self) -> bool;
}

impl RetryableError for PipelineError {
    fn is_retryable(&self) -> bool {
        self.is_transient()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_calculation() {
        let policy = RetryPolicy {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            jitter_factor: 0.0, // Disable jitter for deterministic test
        };

        assert_eq!(policy.delay_for_attempt(0), Duration::ZERO);
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(500));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(1000));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(2000));
        // Should cap at max_delay
        assert_eq!(policy.delay_for_attempt(20), Duration::from_secs(60));
    }

    #[test]
    fn test_classification_is_kind_based() {
        let infra = PipelineError::ObjectStore(anyhow::anyhow!("connection refused"));
        assert!(infra.is_retryable());

        // A payload error mentioning a "timeout" in its message must still
        // not be retried; only the kind decides.
        let payload = PipelineError::InvalidPayload("field 'timeout' is not valid".to_string());
        assert!(!payload.is_retryable());
    }
}
