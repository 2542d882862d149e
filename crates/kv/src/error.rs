//! Shared store error types.

use std::time::Duration;
use thiserror::Error;

/// Shared store operation errors.
///
/// None of these reach an HTTP caller: the rate limiter and the metadata
/// cache absorb every variant into a fail-open outcome.
#[derive(Debug, Error)]
pub enum KvError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("value at '{key}' is not a counter")]
    NotACounter { key: String },

    #[error("configuration error: {0}")]
    Config(String),
}

/// Result type for shared store operations.
pub type KvResult<T> = std::result::Result<T, KvError>;
