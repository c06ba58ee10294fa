// src/storage/memory.rs

// In-process keyed bucket registry with idle eviction.
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::debug;

use crate::clock::{elapsed_since, Clock};
use crate::error::{RateLimiterError, Result};
use crate::storage::BucketState;

type Entries<S> = DashMap<String, S>;

/// Keyed, concurrency-safe storage of bucket state.
///
/// Entries live in a sharded map; every read-modify-write for a key happens
/// while that key's shard is locked, and the background eviction sweep takes
/// the same shard locks. A task spawned at construction wakes every
/// `cleanup_interval` and drops keys idle for longer than `idle_timeout`.
/// The task ends when the store is dropped.
pub struct LocalStore<S: BucketState> {
    entries: Arc<Entries<S>>,
    idle_timeout: Duration,
    clock: Arc<dyn Clock>,
    eviction: JoinHandle<()>,
}

impl<S: BucketState> fmt::Debug for LocalStore<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalStore")
            .field("keys", &self.entries.len())
            .field("idle_timeout", &self.idle_timeout)
            .finish()
    }
}

impl<S: BucketState> LocalStore<S> {
    /// Creates the store and starts its eviction task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(
        name: &'static str,
        cleanup_interval: Duration,
        idle_timeout: Duration,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        if cleanup_interval.is_zero() {
            return Err(RateLimiterError::config(format!(
                "{} cleanup interval must be greater than zero",
                name
            )));
        }
        let runtime = Handle::try_current().map_err(|_| {
            RateLimiterError::config(format!(
                "{} must be created inside a tokio runtime to run idle eviction",
                name
            ))
        })?;

        let entries = Arc::new(DashMap::new());
        let eviction = runtime.spawn(Self::run_eviction(
            name,
            Arc::downgrade(&entries),
            cleanup_interval,
            idle_timeout,
            Arc::clone(&clock),
        ));

        Ok(Self {
            entries,
            idle_timeout,
            clock,
            eviction,
        })
    }

    /// Runs `f` on the state for `key`, creating it with `init` first if absent.
    ///
    /// `f` receives `true` as its second argument when the state was just
    /// created by this call. Concurrent callers racing on a new key see exactly
    /// one creation.
    pub fn with_state<R>(
        &self,
        key: &str,
        init: impl FnOnce() -> S,
        f: impl FnOnce(&mut S, bool) -> R,
    ) -> R {
        // fast path avoids allocating the key for known callers
        if let Some(mut state) = self.entries.get_mut(key) {
            return f(state.value_mut(), false);
        }

        match self.entries.entry(key.to_owned()) {
            Entry::Occupied(mut occupied) => f(occupied.get_mut(), false),
            Entry::Vacant(vacant) => {
                debug!(key, "Creating bucket state");
                let mut state = vacant.insert(init());
                f(state.value_mut(), true)
            }
        }
    }

    /// Forgets the state for `key`. Returns whether it existed.
    pub fn remove(&self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Number of tracked keys
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    /// Runs one eviction sweep now and returns how many keys were dropped.
    pub fn evict_idle(&self) -> usize {
        evict(&self.entries, self.clock.now(), self.idle_timeout)
    }

    async fn run_eviction(
        name: &'static str,
        entries: Weak<Entries<S>>,
        every: Duration,
        idle_timeout: Duration,
        clock: Arc<dyn Clock>,
    ) {
        let mut ticker = time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // the first tick completes immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let Some(live) = entries.upgrade() else {
                break;
            };
            let evicted = evict(&live, clock.now(), idle_timeout);
            if evicted > 0 {
                debug!(
                    store = name,
                    evicted,
                    remaining = live.len(),
                    "Evicted idle bucket state"
                );
            }
        }

        debug!(store = name, "Eviction task stopped");
    }
}

impl<S: BucketState> Drop for LocalStore<S> {
    fn drop(&mut self) {
        self.eviction.abort();
    }
}

fn evict<S: BucketState>(entries: &Entries<S>, now: Duration, idle_timeout: Duration) -> usize {
    let mut evicted = 0;
    entries.retain(|_, state| {
        let keep = elapsed_since(state.last_activity(), now) <= idle_timeout;
        if !keep {
            evicted += 1;
        }
        keep
    });
    evicted
}
