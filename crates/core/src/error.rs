//! Error types for the core domain.

use thiserror::Error;

/// Core domain error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid image id: {0}")]
    InvalidImageId(String),

    #[error("empty payload")]
    EmptyPayload,

    #[error("payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: u64, max: u64 },

    #[error("could not determine file type")]
    UnknownFormat,

    #[error("file type '{detected}' is not allowed (allowed: {allowed})")]
    DisallowedFormat { detected: String, allowed: String },
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
