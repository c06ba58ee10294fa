// src/limiter.rs

use std::fmt;
use std::sync::Arc;
use tracing::warn;

use crate::algorithms::{
    LeakyBucket, RateLimitAlgorithm, RateLimitStatus, RedisLeakyBucket, RedisTokenBucket,
    SlidingWindow, TokenBucket,
};
use crate::clock::{Clock, SystemClock};
use crate::config::LimiterConfig;
use crate::error::{RateLimiterError, Result};
use crate::rate_limit_event;
use crate::storage::RedisStorage;

/// A named limiter instance, e.g. one per route.
///
/// Cloning is cheap and clones share state. The middleware calls
/// [`RateLimiter::allow`] with the caller's identity key and turns a denial
/// into a 429 carrying [`RateLimitStatus::retry_after_secs`].
#[derive(Clone)]
pub struct RateLimiter {
    id: String,
    algorithm: Arc<dyn RateLimitAlgorithm>,
}

impl fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimiter")
            .field("id", &self.id)
            .field("algorithm", &self.algorithm.name())
            .finish()
    }
}

impl RateLimiter {
    pub fn new<A>(id: impl Into<String>, algorithm: A) -> Self
    where
        A: RateLimitAlgorithm + 'static,
    {
        Self {
            id: id.into(),
            algorithm: Arc::new(algorithm),
        }
    }

    /// Builds the algorithm/backend pair described by `config`.
    ///
    /// Distributed configs need `redis`; passing `None` for one is a
    /// configuration error. Local configs must be built inside a tokio
    /// runtime because they start an eviction task.
    pub fn from_config(
        id: impl Into<String>,
        config: &LimiterConfig,
        redis: Option<&RedisStorage>,
    ) -> Result<Self> {
        Self::from_config_with_clock(id, config, redis, Arc::new(SystemClock))
    }

    pub fn from_config_with_clock(
        id: impl Into<String>,
        config: &LimiterConfig,
        redis: Option<&RedisStorage>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let id = id.into();
        let algorithm: Arc<dyn RateLimitAlgorithm> = match config {
            LimiterConfig::TokenBucket(c) => Arc::new(TokenBucket::with_clock(c.clone(), clock)?),
            LimiterConfig::LeakyBucket(c) => Arc::new(LeakyBucket::with_clock(c.clone(), clock)?),
            LimiterConfig::SlidingWindow(c) => {
                Arc::new(SlidingWindow::with_clock(c.clone(), clock)?)
            }
            LimiterConfig::RedisTokenBucket(c) => Arc::new(RedisTokenBucket::with_clock(
                require_redis(&id, redis)?,
                c.clone(),
                clock,
            )?),
            LimiterConfig::RedisLeakyBucket(c) => Arc::new(RedisLeakyBucket::with_clock(
                require_redis(&id, redis)?,
                c.clone(),
                clock,
            )?),
        };

        Ok(Self { id, algorithm })
    }

    /// Decide whether a request from `key` may proceed.
    ///
    /// `Err` means the backend failed; whether to fail open or closed is the
    /// caller's decision.
    pub async fn allow(&self, key: &str) -> Result<RateLimitStatus> {
        let result = self.algorithm.allow(key).await;
        match &result {
            Ok(status) => rate_limit_event!(self.id.as_str(), key, status),
            Err(e) => warn!(limiter = %self.id, key, error = %e, "Rate limit check failed"),
        }
        result
    }

    pub async fn reset(&self, key: &str) -> Result<()> {
        self.algorithm.reset(key).await
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn algorithm_name(&self) -> &'static str {
        self.algorithm.name()
    }
}

fn require_redis(id: &str, redis: Option<&RedisStorage>) -> Result<RedisStorage> {
    redis.cloned().ok_or_else(|| {
        RateLimiterError::config(format!(
            "limiter {} uses a Redis backend but no Redis connection was provided",
            id
        ))
    })
}
