//! Exponential backoff for releasing records after transient failures.
//!
//! Backoff formula: min(max_delay, base_delay * 2^attempt) ± 25% jitter

use crate::config::RetrySettings;
use std::time::Duration;

/// SQS rejects visibility timeouts above 12 hours.
const MAX_VISIBILITY_DELAY: Duration = Duration::from_secs(12 * 60 * 60);

/// Retry configuration for exponential backoff.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Delay for the first retry
    pub base_delay: Duration,
    /// Upper bound on any delay
    pub max_delay: Duration,
    /// Whether to add jitter (randomness) to delays (default: true)
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(300),
            jitter: true,
        }
    }
}

impl From<&RetrySettings> for RetryConfig {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            base_delay: Duration::from_millis(settings.base_delay_ms),
            max_delay: Duration::from_millis(settings.max_delay_ms).min(MAX_VISIBILITY_DELAY),
            jitter: settings.jitter,
        }
    }
}

impl RetryConfig {
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay: max_delay.min(MAX_VISIBILITY_DELAY),
            jitter: true,
        }
    }

    /// Disable jitter (for testing).
    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    /// Calculate the backoff delay for a given attempt (0-based).
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as u64;
        let max_ms = self.max_delay.as_millis() as u64;

        let delay_ms = base_ms.saturating_mul(1u64 << attempt.min(20));
        let capped_delay_ms = delay_ms.min(max_ms);

        let final_delay_ms = if self.jitter {
            let jitter_range = capped_delay_ms / 4;
            let jitter = (std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .subsec_nanos() as u64)
                % (jitter_range * 2 + 1);
            capped_delay_ms.saturating_sub(jitter_range) + jitter
        } else {
            capped_delay_ms
        };

        Duration::from_millis(final_delay_ms)
    }

    /// Delay before the next delivery of a record delivered `delivery_count` times.
    pub fn release_delay(&self, delivery_count: u32) -> Duration {
        self.calculate_delay(delivery_count.saturating_sub(1))
    }
}
