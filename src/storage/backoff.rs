use rand::Rng;
use std::time::Duration;

use crate::config::ConnectRetryConfig;

/// Waits between Redis connection attempts
#[derive(Debug)]
pub struct ExponentialBackoff {
    /// Retries handed out so far
    retries: usize,
    config: ConnectRetryConfig,
}

impl ExponentialBackoff {
    pub fn new(config: ConnectRetryConfig) -> Self {
        Self { retries: 0, config }
    }

    /// Wait before the next attempt, or None once `max_attempts` have been made.
    pub fn next_backoff(&mut self) -> Option<Duration> {
        if self.retries + 1 >= self.config.max_attempts {
            return None;
        }
        let exp = self.retries as i32;
        self.retries += 1;

        let base_ms = self.config.initial_backoff.as_millis() as f64;
        let max_ms = self.config.max_backoff.as_millis() as f64;
        let capped_ms = (base_ms * self.config.backoff_multiplier.powi(exp)).min(max_ms);

        let wait_ms = if self.config.use_jitter {
            // between 50% and 100% of the nominal wait
            capped_ms * rand::rng().random_range(0.5..=1.0)
        } else {
            capped_ms
        };

        Some(Duration::from_millis(wait_ms as u64))
    }

    /// Number of retries handed out so far
    pub fn retries(&self) -> usize {
        self.retries
    }
}
