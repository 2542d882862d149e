//! Core domain types and shared logic for the lightbox image service.
//!
//! This crate defines what every other crate agrees on:
//! - Configuration for the admission, rate-limit and cache tiers
//! - Image identifiers and the metadata snapshot that gets cached
//! - Content sniffing and dimension probing for uploaded payloads
//! - A wall-clock abstraction so window alignment can be driven in tests

pub mod clock;
pub mod config;
pub mod error;
pub mod image;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{Error, Result};
pub use image::{
    ImageFormat, ImageId, ImageMetadata, ImageRecord, hash_delete_token, validate_payload,
};

/// Default maximum upload size: 5 MiB
pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 5 * 1024 * 1024;
