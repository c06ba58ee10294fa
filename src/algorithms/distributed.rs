// src/algorithms/distributed.rs

//! Redis-backed token and leaky buckets.
//!
//! Each `allow` is a single script invocation that decodes the stored
//! record, applies refill or leak, decides, re-encodes and writes the record
//! back with a fresh TTL. Redis runs scripts one at a time, so callers in
//! different processes racing on the same key cannot both spend the last
//! unit of capacity. Idle records simply expire; there is no cleanup task.

use crate::algorithms::{RateLimitAlgorithm, RateLimitStatus};
use crate::clock::{Clock, SystemClock};
use crate::config::DistributedBucketConfig;
use crate::error::Result;
use crate::storage::{RedisStorage, ScriptArgs};
use async_trait::async_trait;
use redis::Script;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::error;

/// KEYS[1] = bucket key
/// ARGV = rate, capacity, now (seconds), ttl (seconds), use server TIME (0|1)
/// Returns {admitted (0|1), retry_after_seconds}
///
/// Records are written with `string.format` rather than `cjson.encode`, which
/// keeps only 14 significant digits and would round epoch timestamps to
/// about 0.1ms. Timestamps are stored with microsecond precision.
pub const TOKEN_BUCKET_SCRIPT: &str = r#"
local key = KEYS[1]
local rate = tonumber(ARGV[1])
local capacity = tonumber(ARGV[2])
local now = tonumber(ARGV[3])
local ttl = tonumber(ARGV[4])

if ARGV[5] == "1" then
    local t = redis.call("TIME")
    now = tonumber(t[1]) + tonumber(t[2]) / 1000000
end

local raw = redis.call("GET", key)
if not raw then
    local fresh = string.format('{"tokens":%.17g,"last_refill":%.6f}', math.max(0, capacity - 1), now)
    redis.call("SET", key, fresh, "EX", ttl)
    return {1, 0}
end

local ok, data = pcall(cjson.decode, raw)
if not ok or type(data) ~= "table" or type(data.tokens) ~= "number"
    or type(data.last_refill) ~= "number" then
    return redis.error_reply("malformed token bucket record at " .. key)
end

local elapsed = math.max(0, now - data.last_refill)
local tokens = math.min(capacity, data.tokens + elapsed * rate)
local last_refill = math.max(now, data.last_refill)

local allowed = 0
local retry_after = 0
if tokens >= 1 then
    tokens = tokens - 1
    allowed = 1
else
    retry_after = math.ceil((1 - tokens) / rate)
end

local record = string.format('{"tokens":%.17g,"last_refill":%.6f}', tokens, last_refill)
redis.call("SET", key, record, "EX", ttl)
return {allowed, retry_after}
"#;

/// Same calling convention as [`TOKEN_BUCKET_SCRIPT`]. `tokens` is the
/// continuous queue depth: it drains at `rate` and each admission adds one.
pub const LEAKY_BUCKET_SCRIPT: &str = r#"
local key = KEYS[1]
local rate = tonumber(ARGV[1])
local capacity = tonumber(ARGV[2])
local now = tonumber(ARGV[3])
local ttl = tonumber(ARGV[4])

if ARGV[5] == "1" then
    local t = redis.call("TIME")
    now = tonumber(t[1]) + tonumber(t[2]) / 1000000
end

local tokens = 0
local last_leak = now

local raw = redis.call("GET", key)
if raw then
    local ok, data = pcall(cjson.decode, raw)
    if not ok or type(data) ~= "table" or type(data.tokens) ~= "number"
        or type(data.last_leak) ~= "number" then
        return redis.error_reply("malformed leaky bucket record at " .. key)
    end
    tokens = data.tokens
    last_leak = data.last_leak
end

local elapsed = math.max(0, now - last_leak)
tokens = math.max(0, tokens - elapsed * rate)
last_leak = math.max(now, last_leak)

local allowed = 0
local retry_after = 0
if tokens < capacity then
    tokens = tokens + 1
    allowed = 1
else
    retry_after = math.ceil((tokens - capacity + 1) / rate)
end

local record = string.format('{"tokens":%.17g,"last_leak":%.6f}', tokens, last_leak)
redis.call("SET", key, record, "EX", ttl)
return {allowed, retry_after}
"#;

/// Stored token bucket record, as written by [`TOKEN_BUCKET_SCRIPT`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenBucketRecord {
    pub tokens: f64,
    /// Seconds since the UNIX epoch
    pub last_refill: f64,
}

/// Stored leaky bucket record, as written by [`LEAKY_BUCKET_SCRIPT`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeakyBucketRecord {
    /// Approximate queue depth
    pub tokens: f64,
    pub last_leak: f64,
}

/// `<prefix>:<algorithm>:<limiter_id>:<caller_key>`
pub fn storage_key(prefix: &str, algorithm: &str, limiter_id: &str, key: &str) -> String {
    format!("{}:{}:{}:{}", prefix, algorithm, limiter_id, key)
}

/// Shared plumbing: one script, one limiter namespace
#[derive(Debug)]
struct ScriptedBucket {
    algorithm: &'static str,
    storage: RedisStorage,
    config: DistributedBucketConfig,
    script: Script,
    clock: Arc<dyn Clock>,
}

impl ScriptedBucket {
    fn new(
        algorithm: &'static str,
        source: &str,
        storage: RedisStorage,
        config: DistributedBucketConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            algorithm,
            storage,
            config,
            script: Script::new(source),
            clock,
        })
    }

    fn key_for(&self, key: &str) -> String {
        storage_key(
            &self.config.key_prefix,
            self.algorithm,
            &self.config.limiter_id,
            key,
        )
    }

    async fn allow(&self, key: &str) -> Result<RateLimitStatus> {
        let storage_key = self.key_for(key);
        let args = ScriptArgs {
            rate: self.config.rate,
            capacity: self.config.capacity,
            now_secs: self.clock.now().as_secs_f64(),
            ttl_secs: self.config.ttl_secs(),
            use_server_time: self.config.use_server_time,
        };

        let verdict = self
            .storage
            .run_bucket_script(&self.script, &storage_key, args)
            .await
            .inspect_err(|e| {
                error!(
                    algorithm = self.algorithm,
                    limiter = %self.config.limiter_id,
                    key = %storage_key,
                    error = %e,
                    "Bucket script failed"
                )
            })?;

        Ok(if verdict.admitted {
            RateLimitStatus::allowed()
        } else {
            RateLimitStatus::denied(Duration::from_secs(verdict.retry_after_secs))
        })
    }

    async fn reset(&self, key: &str) -> Result<()> {
        self.storage.delete(&self.key_for(key)).await?;
        Ok(())
    }

    async fn fetch<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.storage.get(&self.key_for(key)).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }
}

/// Token bucket shared by every process pointing at the same Redis.
///
/// `last_refill` is stored as epoch seconds rounded to the microsecond, so
/// each call can gain or lose at most `rate * 1e-6` tokens to rounding.
#[derive(Debug)]
pub struct RedisTokenBucket {
    inner: ScriptedBucket,
}

impl RedisTokenBucket {
    pub fn new(storage: RedisStorage, config: DistributedBucketConfig) -> Result<Self> {
        Self::with_clock(storage, config, Arc::new(SystemClock))
    }

    /// `clock` is only consulted when the config opts out of server time
    pub fn with_clock(
        storage: RedisStorage,
        config: DistributedBucketConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let inner = ScriptedBucket::new(
            "token_bucket",
            TOKEN_BUCKET_SCRIPT,
            storage,
            config,
            clock,
        )?;
        Ok(Self { inner })
    }

    /// Redis key holding the record for `key`
    pub fn storage_key(&self, key: &str) -> String {
        self.inner.key_for(key)
    }

    /// Reads the stored record without touching it
    pub async fn peek(&self, key: &str) -> Result<Option<TokenBucketRecord>> {
        self.inner.fetch(key).await
    }
}

#[async_trait]
impl RateLimitAlgorithm for RedisTokenBucket {
    async fn allow(&self, key: &str) -> Result<RateLimitStatus> {
        self.inner.allow(key).await
    }

    async fn reset(&self, key: &str) -> Result<()> {
        self.inner.reset(key).await
    }

    fn name(&self) -> &'static str {
        "redis_token_bucket"
    }
}

/// Leaky bucket shared through Redis.
///
/// Uses the continuous queue-depth form rather than a stored queue of
/// timestamps, so it can admit slightly more than [`super::LeakyBucket`]
/// right after an idle stretch. `last_leak` keeps the same microsecond
/// precision as the token bucket's `last_refill`.
#[derive(Debug)]
pub struct RedisLeakyBucket {
    inner: ScriptedBucket,
}

impl RedisLeakyBucket {
    pub fn new(storage: RedisStorage, config: DistributedBucketConfig) -> Result<Self> {
        Self::with_clock(storage, config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        storage: RedisStorage,
        config: DistributedBucketConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let inner = ScriptedBucket::new(
            "leaky_bucket",
            LEAKY_BUCKET_SCRIPT,
            storage,
            config,
            clock,
        )?;
        Ok(Self { inner })
    }

    pub fn storage_key(&self, key: &str) -> String {
        self.inner.key_for(key)
    }

    pub async fn peek(&self, key: &str) -> Result<Option<LeakyBucketRecord>> {
        self.inner.fetch(key).await
    }
}

#[async_trait]
impl RateLimitAlgorithm for RedisLeakyBucket {
    async fn allow(&self, key: &str) -> Result<RateLimitStatus> {
        self.inner.allow(key).await
    }

    async fn reset(&self, key: &str) -> Result<()> {
        self.inner.reset(key).await
    }

    fn name(&self) -> &'static str {
        "redis_leaky_bucket"
    }
}
