//! Prometheus metrics for the lightbox server.
//!
//! Covers the three protection tiers (rate limiting, upload admission,
//! metadata cache), shared-store health, and upload volume.
//!
//! # Security Note
//!
//! The `/metrics` endpoint is unauthenticated to allow Prometheus scraping.
//! Metrics carry no client addresses or image ids, only aggregate counts.
//! Restrict the endpoint to scraper IPs at the infrastructure level.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{
    self, Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::sync::{LazyLock, Once};

/// Global Prometheus registry for all metrics.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

// Rate limiting
pub static RATE_LIMIT_DECISIONS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "lightbox_rate_limit_decisions_total",
            "Rate limit checks by outcome (allowed, denied, fail_open)",
        ),
        &["outcome"],
    )
    .expect("metric creation failed")
});

// Upload admission
pub static UPLOADS_IN_FLIGHT: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new(
        "lightbox_uploads_in_flight",
        "Uploads currently holding an admission permit",
    )
    .expect("metric creation failed")
});

pub static ADMISSION_TIMEOUTS: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "lightbox_admission_timeouts_total",
        "Uploads turned away because no admission permit freed up in time",
    )
    .expect("metric creation failed")
});

pub static ADMISSION_WAIT_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        HistogramOpts::new(
            "lightbox_admission_wait_seconds",
            "Time spent waiting for an upload admission permit",
        )
        .buckets(vec![0.001, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0]),
    )
    .expect("metric creation failed")
});

// Metadata cache
pub static CACHE_LOOKUPS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "lightbox_cache_lookups_total",
            "Metadata cache lookups by outcome (hit, miss, error)",
        ),
        &["outcome"],
    )
    .expect("metric creation failed")
});

pub static CACHE_INVALIDATION_FAILURES: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "lightbox_cache_invalidation_failures_total",
        "Invalidations that could not reach the store; entries may be stale until TTL",
    )
    .expect("metric creation failed")
});

// Shared store
pub static STORE_ERRORS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "lightbox_store_errors_total",
            "Shared store errors by operation",
        ),
        &["operation"],
    )
    .expect("metric creation failed")
});

// Upload volume
pub static IMAGES_UPLOADED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "lightbox_images_uploaded_total",
        "Total number of images accepted",
    )
    .expect("metric creation failed")
});

pub static BYTES_UPLOADED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "lightbox_bytes_uploaded_total",
        "Total bytes of accepted images",
    )
    .expect("metric creation failed")
});

/// Guard to ensure metrics are only registered once.
static REGISTER_ONCE: Once = Once::new();

/// Register all metrics with the global registry.
///
/// Idempotent, so every test router can call it.
pub fn register_metrics() {
    REGISTER_ONCE.call_once(|| {
        REGISTRY
            .register(Box::new(RATE_LIMIT_DECISIONS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(UPLOADS_IN_FLIGHT.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(ADMISSION_TIMEOUTS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(ADMISSION_WAIT_DURATION.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(CACHE_LOOKUPS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(CACHE_INVALIDATION_FAILURES.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(STORE_ERRORS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(IMAGES_UPLOADED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(BYTES_UPLOADED.clone()))
            .expect("metric registration failed");
    });
}

/// GET /metrics - Prometheus metrics endpoint.
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = Vec::new();
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; charset=utf-8")],
            format!("Failed to encode metrics: {e}").into_bytes(),
        ),
    }
}

pub fn record_rate_limit(outcome: &str) {
    RATE_LIMIT_DECISIONS.with_label_values(&[outcome]).inc();
}

pub fn record_cache_lookup(outcome: &str) {
    CACHE_LOOKUPS.with_label_values(&[outcome]).inc();
}

pub fn record_store_error(operation: &str) {
    STORE_ERRORS.with_label_values(&[operation]).inc();
}
