//! HTTP service for the lightbox image store.
//!
//! This crate provides the request-admission and read-path layer:
//! - Fixed-window per-client rate limiting over a shared store (fail-open)
//! - Bounded upload concurrency with timeout-bounded admission (fail-closed)
//! - Cache-aside metadata caching with invalidation on every write (fail-open)
//! - Image upload, retrieval, deletion and health endpoints composing the three

pub mod admission;
pub mod cache;
pub mod catalog;
pub mod error;
pub mod handlers;
pub mod health;
pub mod metrics;
pub mod ratelimit;
pub mod routes;
pub mod state;
pub mod trace;

pub use admission::{AdmissionTimeout, UploadAdmission, UploadPermit};
pub use cache::{CacheOutcome, MetadataCache};
pub use catalog::{CatalogError, ImageCatalog, MemoryCatalog};
pub use error::ApiError;
pub use health::TierStatus;
pub use ratelimit::{ClientIp, RateLimitDecision, RateLimiter};
pub use routes::create_router;
pub use state::AppState;
pub use trace::TraceId;
