// src/algorithms/leaky_bucket.rs

use crate::algorithms::{RateLimitAlgorithm, RateLimitStatus};
use crate::clock::{elapsed_since, Clock, SystemClock};
use crate::config::LeakyBucketConfig;
use crate::error::Result;
use crate::storage::{BucketState, LocalStore};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

/// Per-key leaky bucket state, queue form
#[derive(Debug, Clone)]
pub struct LeakyBucketState {
    /// Admission times, oldest at the front
    pub queue: VecDeque<Duration>,

    pub last_leak: Duration,

    /// Time for one queued entry to drain
    pub leak_period: Duration,
}

impl LeakyBucketState {
    fn new(now: Duration, leak_period: Duration) -> Self {
        Self {
            queue: VecDeque::new(),
            last_leak: now,
            leak_period,
        }
    }

    /// Drops one entry from the head for every full leak period since `last_leak`.
    fn leak(&mut self, now: Duration) {
        let period = self.leak_period.as_nanos();
        let leaks = elapsed_since(self.last_leak, now).as_nanos() / period;
        if leaks == 0 {
            return;
        }

        let drained = leaks.min(self.queue.len() as u128) as usize;
        self.queue.drain(..drained);

        // leaks * period never exceeds the elapsed time, so this stays <= now
        let advanced = Duration::from_nanos((leaks * period) as u64);
        self.last_leak = (self.last_leak + advanced).min(now);
    }

    fn try_enqueue(&mut self, now: Duration, capacity: usize) -> RateLimitStatus {
        if self.queue.len() < capacity {
            self.queue.push_back(now);
            return RateLimitStatus::allowed();
        }

        // the head drains at the next leak boundary
        let next_leak = self.last_leak.saturating_add(self.leak_period);
        RateLimitStatus::denied(next_leak.saturating_sub(now))
    }
}

impl BucketState for LeakyBucketState {
    fn last_activity(&self) -> Duration {
        match self.queue.back() {
            Some(&newest) => newest.max(self.last_leak),
            None => self.last_leak,
        }
    }
}

/// Leaky Bucket rate limiting algorithm, in-process
///
/// Admitted requests join a per-key queue of at most `capacity` entries that
/// drains one entry every `1 / rate` seconds. A request arriving at a full
/// queue is denied until the head entry drains. Unlike the token bucket, a
/// drained slot frees exactly one admission, which smooths bursts.
///
/// Smoothing is bounded by the drain rate, not by the burst size: one leak
/// period after a full queue exactly one more request fits, while waiting
/// `capacity / rate` empties the queue and admits a whole new burst of
/// `capacity` back to back. Idle time never banks more than `capacity`.
#[derive(Debug)]
pub struct LeakyBucket {
    store: LocalStore<LeakyBucketState>,
    config: LeakyBucketConfig,
    leak_period: Duration,
    clock: Arc<dyn Clock>,
}

impl LeakyBucket {
    pub fn new(config: LeakyBucketConfig) -> Result<Self> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: LeakyBucketConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate()?;
        let store = LocalStore::new(
            "leaky_bucket",
            config.cleanup_interval,
            config.cleanup_interval,
            Arc::clone(&clock),
        )?;

        Ok(Self {
            store,
            leak_period: config.leak_period(),
            config,
            clock,
        })
    }

    pub fn check(&self, key: &str) -> RateLimitStatus {
        let now = self.clock.now();
        let leak_period = self.leak_period;
        let capacity = self.config.capacity;

        self.store.with_state(
            key,
            || LeakyBucketState::new(now, leak_period),
            |state, _| {
                state.leak(now);
                state.try_enqueue(now, capacity)
            },
        )
    }

    pub fn leak_period(&self) -> Duration {
        self.leak_period
    }

    pub fn store(&self) -> &LocalStore<LeakyBucketState> {
        &self.store
    }
}

#[async_trait]
impl RateLimitAlgorithm for LeakyBucket {
    async fn allow(&self, key: &str) -> Result<RateLimitStatus> {
        Ok(self.check(key))
    }

    async fn reset(&self, key: &str) -> Result<()> {
        self.store.remove(key);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "leaky_bucket"
    }
}
