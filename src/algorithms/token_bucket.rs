// src/algorithms/token_bucket.rs

use crate::algorithms::{whole_seconds_ceil, RateLimitAlgorithm, RateLimitStatus};
use crate::clock::{elapsed_since, Clock, SystemClock};
use crate::config::TokenBucketConfig;
use crate::error::Result;
use crate::storage::{BucketState, LocalStore};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Per-key token bucket state
#[derive(Debug, Clone, PartialEq)]
pub struct TokenBucketState {
    /// Available tokens, within `[0, capacity]` between calls
    pub tokens: f64,

    pub last_refill: Duration,
}

impl TokenBucketState {
    /// State for a key seen for the first time; the creating request has
    /// already taken its token.
    fn first_request(capacity: f64, now: Duration) -> Self {
        Self {
            tokens: (capacity - 1.0).max(0.0),
            last_refill: now,
        }
    }

    fn refill(&mut self, now: Duration, rate: f64, capacity: f64) {
        let elapsed = elapsed_since(self.last_refill, now).as_secs_f64();
        self.tokens = (self.tokens + elapsed * rate).min(capacity);
        self.last_refill = self.last_refill.max(now);
    }

    fn try_take(&mut self, rate: f64) -> RateLimitStatus {
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            RateLimitStatus::allowed()
        } else {
            // time until one whole token has accrued
            RateLimitStatus::denied(whole_seconds_ceil((1.0 - self.tokens) / rate))
        }
    }
}

impl BucketState for TokenBucketState {
    fn last_activity(&self) -> Duration {
        self.last_refill
    }
}

/// Token Bucket rate limiting algorithm, in-process
///
/// Each key owns a bucket of up to `capacity` tokens refilled continuously at
/// `rate` tokens per second. A request takes one token; with less than one
/// token left it is denied and told how long until the next token accrues.
/// Keys idle for longer than `cleanup_interval` are evicted and start over
/// with a full bucket.
#[derive(Debug)]
pub struct TokenBucket {
    store: LocalStore<TokenBucketState>,
    config: TokenBucketConfig,
    clock: Arc<dyn Clock>,
}

impl TokenBucket {
    /// Creates a token bucket driven by the system clock
    pub fn new(config: TokenBucketConfig) -> Result<Self> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: TokenBucketConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate()?;
        let store = LocalStore::new(
            "token_bucket",
            config.cleanup_interval,
            config.cleanup_interval,
            Arc::clone(&clock),
        )?;

        Ok(Self {
            store,
            config,
            clock,
        })
    }

    /// Synchronous admission check; [`RateLimitAlgorithm::allow`] delegates here
    pub fn check(&self, key: &str) -> RateLimitStatus {
        let now = self.clock.now();
        let rate = self.config.rate;
        let capacity = self.config.capacity;

        self.store.with_state(
            key,
            || TokenBucketState::first_request(capacity, now),
            |state, created| {
                if created {
                    return RateLimitStatus::allowed();
                }
                state.refill(now, rate, capacity);
                state.try_take(rate)
            },
        )
    }

    pub fn config(&self) -> &TokenBucketConfig {
        &self.config
    }

    pub fn store(&self) -> &LocalStore<TokenBucketState> {
        &self.store
    }
}

#[async_trait]
impl RateLimitAlgorithm for TokenBucket {
    async fn allow(&self, key: &str) -> Result<RateLimitStatus> {
        Ok(self.check(key))
    }

    async fn reset(&self, key: &str) -> Result<()> {
        self.store.remove(key);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "token_bucket"
    }
}
