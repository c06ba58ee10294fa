// src/algorithms/sliding_window.rs

use crate::algorithms::{RateLimitAlgorithm, RateLimitStatus};
use crate::clock::{Clock, SystemClock};
use crate::config::SlidingWindowConfig;
use crate::error::Result;
use crate::storage::{BucketState, LocalStore};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Per-key ring of sub-window counters
#[derive(Debug, Clone)]
pub struct SlidingWindowState {
    /// Count per slot; slot for time `t` is `floor(t / sub_window_size) % num_sub_windows`
    pub counts: Vec<u64>,

    pub last_update: Duration,

    pub sub_window_size: Duration,

    pub num_sub_windows: usize,
}

impl SlidingWindowState {
    fn new(now: Duration, sub_window_size: Duration, num_sub_windows: usize) -> Self {
        Self {
            counts: vec![0; num_sub_windows],
            last_update: now,
            sub_window_size,
            num_sub_windows,
        }
    }

    /// Absolute sub-window number containing `t`
    fn sub_window_of(&self, t: Duration) -> u128 {
        t.as_nanos() / self.sub_window_size.as_nanos()
    }

    fn slot(&self, sub_window: u128) -> usize {
        (sub_window % self.num_sub_windows as u128) as usize
    }

    /// Zeroes every slot that has fallen out of the trailing window since
    /// `last_update`, oldest first.
    fn roll_forward(&mut self, now: Duration) {
        let last = self.sub_window_of(self.last_update);
        let current = self.sub_window_of(now);
        if current <= last {
            return;
        }

        if current - last >= self.num_sub_windows as u128 {
            self.counts.iter_mut().for_each(|count| *count = 0);
        } else {
            for sub_window in (last + 1)..=current {
                let slot = self.slot(sub_window);
                self.counts[slot] = 0;
            }
        }
    }

    fn try_record(&mut self, now: Duration, rate: u64) -> RateLimitStatus {
        // a clock that stepped backwards is treated as standing still
        let now = now.max(self.last_update);
        self.roll_forward(now);
        self.last_update = now;

        let current = self.sub_window_of(now);
        let total: u64 = self.counts.iter().sum();
        if total < rate {
            let slot = self.slot(current);
            self.counts[slot] += 1;
            return RateLimitStatus::allowed();
        }

        // Slot `current + i` (mod n) still holds sub-window `current + i - n`,
        // which leaves the trailing window when sub-window `current + i` starts.
        let n = self.num_sub_windows as u128;
        let sub_nanos = self.sub_window_size.as_nanos();
        for i in 1..=n {
            let rolls_out_at = current + i;
            if self.counts[self.slot(rolls_out_at)] > 0 {
                let expires = Duration::from_nanos((rolls_out_at * sub_nanos) as u64);
                return RateLimitStatus::denied(expires.saturating_sub(now));
            }
        }

        RateLimitStatus::denied(Duration::from_nanos((n * sub_nanos) as u64))
    }

    /// Requests counted in the trailing window as of the last update
    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }
}

impl BucketState for SlidingWindowState {
    fn last_activity(&self) -> Duration {
        self.last_update
    }
}

/// Sliding-window counter, in-process only
///
/// The window is split into `window / sub_window` counters arranged as a ring.
/// A request is admitted while the sum over the trailing window stays below
/// `rate`. This avoids the double burst a fixed window allows at its boundary,
/// at the cost of up to one sub-window of approximation error. Keys idle for
/// a whole window are evicted, which loses nothing since all their counters
/// would have rolled out anyway.
#[derive(Debug)]
pub struct SlidingWindow {
    store: LocalStore<SlidingWindowState>,
    config: SlidingWindowConfig,
    num_sub_windows: usize,
    clock: Arc<dyn Clock>,
}

impl SlidingWindow {
    pub fn new(config: SlidingWindowConfig) -> Result<Self> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: SlidingWindowConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate()?;
        let num_sub_windows = config.num_sub_windows();
        let effective_window =
            Duration::from_nanos((config.sub_window.as_nanos() * num_sub_windows as u128) as u64);
        let store = LocalStore::new(
            "sliding_window",
            config.cleanup_interval,
            effective_window,
            Arc::clone(&clock),
        )?;

        Ok(Self {
            store,
            config,
            num_sub_windows,
            clock,
        })
    }

    pub fn check(&self, key: &str) -> RateLimitStatus {
        let now = self.clock.now();
        let rate = self.config.rate;
        let sub_window = self.config.sub_window;
        let num_sub_windows = self.num_sub_windows;

        self.store.with_state(
            key,
            || SlidingWindowState::new(now, sub_window, num_sub_windows),
            |state, _| state.try_record(now, rate),
        )
    }

    pub fn num_sub_windows(&self) -> usize {
        self.num_sub_windows
    }

    pub fn store(&self) -> &LocalStore<SlidingWindowState> {
        &self.store
    }
}

#[async_trait]
impl RateLimitAlgorithm for SlidingWindow {
    async fn allow(&self, key: &str) -> Result<RateLimitStatus> {
        Ok(self.check(key))
    }

    async fn reset(&self, key: &str) -> Result<()> {
        self.store.remove(key);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "sliding_window"
    }
}
