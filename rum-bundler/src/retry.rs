use rand::Rng;
use serde::Deserialize;
use std::time::Duration;

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Backoff {
    Fixed,
    Exponential,
}

/// How a failed batch is retried.
///
/// `max_attempts` counts every run of the batch including the first one.
/// `None` retries forever.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: Option<u32>,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff: Backoff,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: Some(8),
            initial_delay_ms: 1_000,
            max_delay_ms: 30_000,
            backoff: Backoff::Exponential,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Retry forever, one second apart.
    pub fn unbounded() -> Self {
        RetryPolicy {
            max_attempts: None,
            initial_delay_ms: 1_000,
            max_delay_ms: 1_000,
            backoff: Backoff::Fixed,
            jitter: false,
        }
    }

    /// Retry immediately, at most `max_attempts` runs in total.
    pub fn immediate(max_attempts: u32) -> Self {
        RetryPolicy {
            max_attempts: Some(max_attempts),
            initial_delay_ms: 0,
            max_delay_ms: 0,
            backoff: Backoff::Fixed,
            jitter: false,
        }
    }

    pub fn allows_retry(&self, attempts_made: u32) -> bool {
        self.max_attempts.is_none_or(|max| attempts_made < max)
    }

    /// Delay before retry number `retry` (zero-based). Jitter adds up to a
    /// quarter of the base delay.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let base_ms = match self.backoff {
            Backoff::Fixed => self.initial_delay_ms,
            Backoff::Exponential => self
                .initial_delay_ms
                .saturating_mul(2_u64.saturating_pow(retry))
                .min(self.max_delay_ms.max(self.initial_delay_ms)),
        };

        let jitter_ms = if self.jitter && base_ms > 0 {
            rand::rng().random_range(0..=(base_ms / 4))
        } else {
            0
        };

        Duration::from_millis(base_ms + jitter_ms)
    }
}
