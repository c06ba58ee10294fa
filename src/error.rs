// for error definitions
use redis;
use thiserror::Error;

/// Errors surfaced by limiter construction and by `allow` on backend failure.
///
/// A denied request is never an error; it is an `Ok` status with
/// `allowed == false`.
#[derive(Error, Debug)]
pub enum RateLimiterError {
    /// Errors related to the storage backend
    #[error("Storage error: {0}")]
    Storage(StorageError),

    /// Invalid limiter parameters, rejected at construction time
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Storage-specific errors
#[derive(Error, Debug)]
pub enum StorageError {
    /// Redis connection errors
    #[error("Redis connection error: {0}")]
    RedisConnection(String),

    // Redis authentication errors
    #[error("Redis authentication error: {0}")]
    RedisAuth(String),

    /// Redis command and script errors
    #[error("Redis command error: {0}")]
    RedisCommand(String),

    /// A stored bucket record could not be decoded
    #[error("Data serialization error: {0}")]
    Serialization(String),
}

impl RateLimiterError {
    /// Shorthand for a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        RateLimiterError::Config(msg.into())
    }

    /// True when the error came from the storage backend rather than setup
    pub fn is_storage(&self) -> bool {
        matches!(self, RateLimiterError::Storage(_))
    }
}

// Classify redis failures by what the caller can do about them
impl From<redis::RedisError> for RateLimiterError {
    fn from(err: redis::RedisError) -> Self {
        match err.kind() {
            redis::ErrorKind::AuthenticationFailed => {
                RateLimiterError::Storage(StorageError::RedisAuth(err.to_string()))
            }
            redis::ErrorKind::IoError | redis::ErrorKind::ClientError => {
                RateLimiterError::Storage(StorageError::RedisConnection(err.to_string()))
            }
            redis::ErrorKind::TypeError => {
                RateLimiterError::Storage(StorageError::Serialization(err.to_string()))
            }
            _ => RateLimiterError::Storage(StorageError::RedisCommand(err.to_string())),
        }
    }
}

// implement conversions from serde_json::Error to RateLimiterError
impl From<serde_json::Error> for RateLimiterError {
    fn from(err: serde_json::Error) -> Self {
        RateLimiterError::Storage(StorageError::Serialization(err.to_string()))
    }
}

// define a Result type alias for convenience
pub type Result<T> = std::result::Result<T, RateLimiterError>;
