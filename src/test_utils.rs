// src/test_utils.rs

use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::clock::Clock;
use crate::config::RedisConfig;
use crate::storage::RedisStorage;

/// Manually driven clock for deterministic limiter tests
#[derive(Debug)]
pub struct TestClock {
    now: Mutex<Duration>,
}

impl TestClock {
    /// Starts at an arbitrary but realistic epoch offset
    pub fn new() -> Arc<Self> {
        Self::starting_at(Duration::from_secs(1_700_000_000))
    }

    pub fn starting_at(start: Duration) -> Arc<Self> {
        Arc::new(Self {
            now: Mutex::new(start),
        })
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock().unwrap() += by;
    }

    pub fn set(&self, to: Duration) {
        *self.now.lock().unwrap() = to;
    }
}

impl Clock for TestClock {
    fn now(&self) -> Duration {
        *self.now.lock().unwrap()
    }
}

/// Upcasts for the `with_clock` constructors while keeping a handle to advance
pub fn shared(clock: &Arc<TestClock>) -> Arc<dyn Clock> {
    Arc::clone(clock) as Arc<dyn Clock>
}

pub const TEST_REDIS_URL: &str = "redis://localhost:6379";

/// Connects to a local Redis, or returns `None` so the caller can skip.
pub async fn local_redis() -> Option<RedisStorage> {
    let mut config = RedisConfig::new(TEST_REDIS_URL);
    config.connection_timeout = Duration::from_millis(300);
    config.retry.max_attempts = 1;

    let redis = RedisStorage::connect(config).await.ok()?;
    redis.ping().await.ok()?;
    Some(redis)
}

/// Unique per-test limiter id so runs never share Redis keys
pub fn unique_limiter_id(test: &str) -> String {
    format!("{}-{}", test, uuid::Uuid::new_v4().simple())
}
