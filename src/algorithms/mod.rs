// src/algorithms/mod.rs

pub mod distributed;
pub mod leaky_bucket;
pub mod sliding_window;
pub mod token_bucket;

#[cfg(test)]
mod tests;

pub use distributed::{RedisLeakyBucket, RedisTokenBucket};
pub use leaky_bucket::LeakyBucket;
pub use sliding_window::SlidingWindow;
pub use token_bucket::TokenBucket;

use super::error::Result;
use async_trait::async_trait;
use std::fmt::Debug;
use std::time::Duration;

/// Verdict returned by [`RateLimitAlgorithm::allow`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitStatus {
    /// Whether the request may proceed
    pub allowed: bool,

    /// How long a denied caller should wait before trying again; zero when allowed
    pub retry_after: Duration,
}

impl RateLimitStatus {
    pub fn allowed() -> Self {
        Self {
            allowed: true,
            retry_after: Duration::ZERO,
        }
    }

    pub fn denied(retry_after: Duration) -> Self {
        Self {
            allowed: false,
            retry_after,
        }
    }

    /// Whole seconds for an HTTP `Retry-After` header, rounded up
    pub fn retry_after_secs(&self) -> u64 {
        let secs = self.retry_after.as_secs();
        if self.retry_after.subsec_nanos() > 0 {
            secs + 1
        } else {
            secs
        }
    }
}

/// Contract every algorithm/backend combination implements.
///
/// `allow` returns `Err` only when the backend fails (Redis unreachable,
/// script error, malformed stored record). Exceeding the limit is an `Ok`
/// status with `allowed == false`.
#[async_trait]
pub trait RateLimitAlgorithm: Send + Sync + Debug {
    /// Decide whether a request for `key` may proceed, recording it if so
    async fn allow(&self, key: &str) -> Result<RateLimitStatus>;

    /// Forget all state for `key`; the next request starts fresh
    async fn reset(&self, key: &str) -> Result<()>;

    /// Short algorithm name used in logs and storage keys
    fn name(&self) -> &'static str;
}

/// `ceil(seconds)` as a Duration; retry hints are reported in whole seconds
pub(crate) fn whole_seconds_ceil(seconds: f64) -> Duration {
    if !seconds.is_finite() || seconds <= 0.0 {
        return Duration::ZERO;
    }
    Duration::from_secs(seconds.ceil() as u64)
}
