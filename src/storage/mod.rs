// src/storage/mod.rs

mod backoff;
pub mod memory;
pub mod redis;

#[cfg(test)]
mod tests;

pub use backoff::ExponentialBackoff;
pub use memory::LocalStore;
pub use self::redis::{RedisStorage, ScriptArgs, ScriptVerdict};

use std::time::Duration;

/// Per-key state held by a [`LocalStore`].
pub trait BucketState: Send + Sync + 'static {
    /// Timestamp of the most recent update; idle eviction compares against it
    fn last_activity(&self) -> Duration;
}
