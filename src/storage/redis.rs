// src/storage/redis.rs

use redis::{aio::ConnectionManager, AsyncCommands, Client, Script};
use std::fmt;
use std::time::{Duration, Instant};
use tokio::time;
use tracing::{error, info, warn};

use crate::config::RedisConfig;
use crate::error::{RateLimiterError, Result, StorageError};
use crate::storage::ExponentialBackoff;
use crate::storage_op;

/// Arguments every bucket script receives, in `ARGV` order
#[derive(Debug, Clone, Copy)]
pub struct ScriptArgs {
    pub rate: f64,
    pub capacity: f64,
    /// Caller's clock, seconds since the UNIX epoch
    pub now_secs: f64,
    pub ttl_secs: u64,
    /// Ask the script to read `TIME` from the server instead of `now_secs`
    pub use_server_time: bool,
}

/// Decoded `{admitted, retry_after_seconds}` script reply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScriptVerdict {
    pub admitted: bool,
    pub retry_after_secs: u64,
}

impl ScriptVerdict {
    /// Validates the raw integer pair returned by Redis
    pub fn from_reply(admitted: i64, retry_after_secs: i64) -> Result<Self> {
        let admitted = match admitted {
            0 => false,
            1 => true,
            other => {
                return Err(RateLimiterError::Storage(StorageError::Serialization(
                    format!("unexpected 'admitted' value from bucket script: {}", other),
                )))
            }
        };
        if retry_after_secs < 0 {
            return Err(RateLimiterError::Storage(StorageError::Serialization(
                format!("negative retry-after from bucket script: {}", retry_after_secs),
            )));
        }
        Ok(Self {
            admitted,
            retry_after_secs: retry_after_secs as u64,
        })
    }
}

/// Shared-cache backend: one multiplexed connection, cheap to clone
#[derive(Clone)]
pub struct RedisStorage {
    connection: ConnectionManager,
    config: RedisConfig,
}

// Manually implement Debug
impl fmt::Debug for RedisStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisStorage")
            .field("url", &self.config.url)
            .field("connection_timeout", &self.config.connection_timeout)
            .finish()
    }
}

impl RedisStorage {
    /// Connects to Redis, retrying with exponential backoff until the
    /// configured number of attempts is used up.
    pub async fn connect(config: RedisConfig) -> Result<Self> {
        // Open the client - this doesn't actually connect to Redis yet
        let client = Client::open(config.url.as_str()).map_err(|e| {
            RateLimiterError::config(format!("invalid Redis URL {}: {}", config.url, e))
        })?;

        let mut backoff = ExponentialBackoff::new(config.retry.clone());
        loop {
            let attempt = backoff.retries() + 1;
            match Self::open_connection(&client, config.connection_timeout).await {
                Ok(connection) => {
                    info!(attempt, "Connected to Redis");
                    return Ok(Self { connection, config });
                }
                Err(e) => match backoff.next_backoff() {
                    Some(wait) => {
                        warn!(
                            attempt,
                            error = %e,
                            retry_in_ms = wait.as_millis() as u64,
                            "Failed to connect to Redis"
                        );
                        time::sleep(wait).await;
                    }
                    None => {
                        error!(attempt, error = %e, "Giving up connecting to Redis");
                        return Err(e);
                    }
                },
            }
        }
    }

    async fn open_connection(client: &Client, timeout: Duration) -> Result<ConnectionManager> {
        match time::timeout(timeout, ConnectionManager::new(client.clone())).await {
            Ok(result) => result.map_err(|e| {
                RateLimiterError::Storage(StorageError::RedisConnection(e.to_string()))
            }),
            Err(_) => Err(RateLimiterError::Storage(StorageError::RedisConnection(
                format!("connection attempt timed out after {:?}", timeout),
            ))),
        }
    }

    /// Ping Redis to check health with timeout
    pub async fn ping(&self) -> Result<()> {
        let mut conn = self.connection.clone();
        let ping = conn.ping::<String>();

        let reply = match time::timeout(self.config.connection_timeout, ping).await {
            Ok(inner) => inner?,
            Err(_) => {
                return Err(RateLimiterError::Storage(StorageError::RedisCommand(
                    format!(
                        "Redis PING timed out after {:?}",
                        self.config.connection_timeout
                    ),
                )));
            }
        };

        if reply == "PONG" {
            Ok(())
        } else {
            Err(RateLimiterError::Storage(StorageError::RedisCommand(
                format!("Unexpected response from Redis PING: {}", reply),
            )))
        }
    }

    /// Runs a bucket script against `key` as one atomic server-side call.
    ///
    /// Uses EVALSHA and falls back to EVAL when the server has not cached the
    /// script yet. Failures are returned as-is; there is no retry here.
    pub async fn run_bucket_script(
        &self,
        script: &Script,
        key: &str,
        args: ScriptArgs,
    ) -> Result<ScriptVerdict> {
        let mut conn = self.connection.clone();
        let started = Instant::now();

        let mut invocation = script.key(key);
        invocation
            .arg(args.rate)
            .arg(args.capacity)
            .arg(args.now_secs)
            .arg(args.ttl_secs)
            .arg(if args.use_server_time { 1 } else { 0 });

        let reply: Result<(i64, i64)> = invocation
            .invoke_async(&mut conn)
            .await
            .map_err(RateLimiterError::from);
        storage_op!(
            "eval",
            key,
            reply,
            started.elapsed().as_millis() as u64
        );

        let (admitted, retry_after) = reply?;
        ScriptVerdict::from_reply(admitted, retry_after)
    }

    /// Raw record stored under `key`, if any
    pub async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.connection.clone();
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    /// Deletes `key`; returns whether it existed
    pub async fn delete(&self, key: &str) -> Result<bool> {
        let mut conn = self.connection.clone();
        let removed: i64 = conn.del(key).await?;
        Ok(removed > 0)
    }

    /// Remaining time to live of `key`, None when missing or persistent
    pub async fn ttl(&self, key: &str) -> Result<Option<Duration>> {
        let mut conn = self.connection.clone();
        let secs: i64 = conn.ttl(key).await?;
        Ok(if secs >= 0 {
            Some(Duration::from_secs(secs as u64))
        } else {
            None
        })
    }
}
