// src/config/mod.rs

use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

use crate::error::{RateLimiterError, Result};

/// Configuration for the in-memory token bucket
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenBucketConfig {
    /// Tokens added per second
    pub rate: f64,

    /// Maximum burst size
    pub capacity: f64,

    /// How often idle keys are swept, and how long a key may stay idle
    #[serde(default = "default_cleanup_interval", with = "duration_serde")]
    pub cleanup_interval: Duration,
}

impl TokenBucketConfig {
    pub fn validate(&self) -> Result<()> {
        ensure_positive("token bucket rate", self.rate)?;
        ensure_whole_request("token bucket capacity", self.capacity)?;
        ensure_positive_interval("token bucket cleanup interval", self.cleanup_interval)
    }
}

/// Configuration for the in-memory (queue form) leaky bucket
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeakyBucketConfig {
    /// Queue entries drained per second
    pub rate: f64,

    /// Maximum queue depth
    pub capacity: usize,

    #[serde(default = "default_cleanup_interval", with = "duration_serde")]
    pub cleanup_interval: Duration,
}

impl LeakyBucketConfig {
    pub fn validate(&self) -> Result<()> {
        ensure_positive("leaky bucket rate", self.rate)?;
        if self.capacity == 0 {
            return Err(RateLimiterError::config(
                "leaky bucket capacity must be greater than zero",
            ));
        }
        if self.leak_period().is_zero() {
            return Err(RateLimiterError::config(format!(
                "leaky bucket rate {} is too high to drain in whole nanoseconds",
                self.rate
            )));
        }
        ensure_positive_interval("leaky bucket cleanup interval", self.cleanup_interval)
    }

    /// Time for one queue entry to drain
    pub fn leak_period(&self) -> Duration {
        Duration::try_from_secs_f64(1.0 / self.rate).unwrap_or(Duration::MAX)
    }
}

/// Configuration for the in-memory sliding-window counter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlidingWindowConfig {
    /// Admissions allowed per trailing window
    pub rate: u64,

    /// Length of the trailing window
    #[serde(with = "duration_serde")]
    pub window: Duration,

    /// Width of one counter slot
    #[serde(with = "duration_serde")]
    pub sub_window: Duration,

    #[serde(default = "default_cleanup_interval", with = "duration_serde")]
    pub cleanup_interval: Duration,
}

impl SlidingWindowConfig {
    pub fn validate(&self) -> Result<()> {
        if self.rate == 0 {
            return Err(RateLimiterError::config(
                "sliding window rate must be greater than zero",
            ));
        }
        ensure_positive_interval("sliding window size", self.window)?;
        ensure_positive_interval("sliding window sub-window size", self.sub_window)?;
        ensure_positive_interval("sliding window cleanup interval", self.cleanup_interval)?;
        if self.num_sub_windows() == 0 {
            return Err(RateLimiterError::config(
                "sliding window size must not be smaller than the sub-window size",
            ));
        }
        Ok(())
    }

    /// Number of counter slots; the window is truncated to a whole number of sub-windows
    pub fn num_sub_windows(&self) -> usize {
        if self.sub_window.is_zero() {
            return 0;
        }
        (self.window.as_nanos() / self.sub_window.as_nanos()) as usize
    }
}

/// Configuration shared by the Redis-backed token and leaky buckets
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistributedBucketConfig {
    /// Identifies this limiter inside the shared key space (e.g. one per route)
    pub limiter_id: String,

    pub rate: f64,

    pub capacity: f64,

    /// Expiry applied to the stored record on every write
    #[serde(with = "duration_serde")]
    pub key_ttl: Duration,

    /// Key prefix to use for all keys in storage
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Take "now" from the Redis server clock instead of the caller's
    #[serde(default = "default_use_server_time")]
    pub use_server_time: bool,
}

impl DistributedBucketConfig {
    /// Config with the default prefix and server-side clock
    pub fn new(limiter_id: impl Into<String>, rate: f64, capacity: f64, key_ttl: Duration) -> Self {
        Self {
            limiter_id: limiter_id.into(),
            rate,
            capacity,
            key_ttl,
            key_prefix: default_key_prefix(),
            use_server_time: default_use_server_time(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.limiter_id.is_empty() || self.limiter_id.contains(':') {
            return Err(RateLimiterError::config(format!(
                "limiter id {:?} must be non-empty and must not contain ':'",
                self.limiter_id
            )));
        }
        ensure_positive("distributed bucket rate", self.rate)?;
        ensure_whole_request("distributed bucket capacity", self.capacity)?;
        ensure_positive_interval("distributed bucket key TTL", self.key_ttl)
    }

    /// TTL in whole seconds, as `SET .. EX` requires; never below one
    pub fn ttl_secs(&self) -> u64 {
        (self.key_ttl.as_secs_f64().ceil() as u64).max(1)
    }
}

/// Configuration for Redis storage backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Redis connection URL
    pub url: String,

    /// Timeout for a single connection attempt and for pings
    #[serde(default = "default_conn_timeout", with = "duration_serde")]
    pub connection_timeout: Duration,

    #[serde(default)]
    pub retry: ConnectRetryConfig,
}

impl RedisConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            connection_timeout: default_conn_timeout(),
            retry: ConnectRetryConfig::default(),
        }
    }

    /// Build from the environment.
    ///
    /// `REDIS_URL` wins when set. Otherwise the URL is assembled from
    /// `RD_USE_TLS`, `RD_HOST`, `RD_PORT` and `RD_PASSWORD`.
    pub fn from_env() -> Result<Self> {
        if let Ok(url) = env::var("REDIS_URL") {
            return Ok(Self::new(url));
        }

        let host = env::var("RD_HOST")
            .map_err(|_| RateLimiterError::config("neither REDIS_URL nor RD_HOST is set"))?;
        let port = env::var("RD_PORT").unwrap_or_else(|_| "6379".to_string());
        let password = env::var("RD_PASSWORD").unwrap_or_default();
        let use_tls = env::var("RD_USE_TLS")
            .map(|v| parse_env_bool(&v))
            .unwrap_or(false);

        Ok(Self::new(redis_url(use_tls, &host, &port, &password)))
    }
}

/// Backoff schedule for establishing the Redis connection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectRetryConfig {
    /// Total connection attempts, including the first one
    pub max_attempts: usize,

    #[serde(with = "duration_serde")]
    pub initial_backoff: Duration,

    #[serde(with = "duration_serde")]
    pub max_backoff: Duration,

    pub backoff_multiplier: f64,

    /// Randomize each wait to between 50% and 100% of its nominal value
    pub use_jitter: bool,
}

impl Default for ConnectRetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            initial_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(3),
            backoff_multiplier: 2.0,
            use_jitter: true,
        }
    }
}

/// One limiter instance: which algorithm, on which backend, with which numbers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "algorithm", rename_all = "snake_case")]
pub enum LimiterConfig {
    TokenBucket(TokenBucketConfig),
    LeakyBucket(LeakyBucketConfig),
    SlidingWindow(SlidingWindowConfig),
    RedisTokenBucket(DistributedBucketConfig),
    RedisLeakyBucket(DistributedBucketConfig),
}

impl LimiterConfig {
    pub fn validate(&self) -> Result<()> {
        match self {
            LimiterConfig::TokenBucket(c) => c.validate(),
            LimiterConfig::LeakyBucket(c) => c.validate(),
            LimiterConfig::SlidingWindow(c) => c.validate(),
            LimiterConfig::RedisTokenBucket(c) | LimiterConfig::RedisLeakyBucket(c) => {
                c.validate()
            }
        }
    }

    /// Whether this limiter needs a Redis connection
    pub fn is_distributed(&self) -> bool {
        matches!(
            self,
            LimiterConfig::RedisTokenBucket(_) | LimiterConfig::RedisLeakyBucket(_)
        )
    }
}

fn ensure_positive(what: &str, value: f64) -> Result<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(RateLimiterError::config(format!(
            "{} must be a positive number, got {}",
            what, value
        )))
    }
}

/// A bucket that can never hold one whole token would deny forever after the
/// first request, so capacities below one are refused.
fn ensure_whole_request(what: &str, value: f64) -> Result<()> {
    ensure_positive(what, value)?;
    if value < 1.0 {
        return Err(RateLimiterError::config(format!(
            "{} must be at least 1, got {}",
            what, value
        )));
    }
    Ok(())
}

fn ensure_positive_interval(what: &str, value: Duration) -> Result<()> {
    if value.is_zero() {
        Err(RateLimiterError::config(format!(
            "{} must be greater than zero",
            what
        )))
    } else {
        Ok(())
    }
}

fn redis_url(use_tls: bool, host: &str, port: &str, password: &str) -> String {
    let scheme = if use_tls { "rediss" } else { "redis" };
    if password.is_empty() {
        format!("{}://{}:{}", scheme, host, port)
    } else {
        format!("{}://default:{}@{}:{}", scheme, password, host, port)
    }
}

fn parse_env_bool(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn default_key_prefix() -> String {
    "ratelimit".to_string()
}

fn default_use_server_time() -> bool {
    true
}

fn default_conn_timeout() -> Duration {
    Duration::from_secs(2)
}

fn default_cleanup_interval() -> Duration {
    Duration::from_secs(60)
}

// Helper module to serialize/deserialize Duration with serde
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
