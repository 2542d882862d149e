//! Application state shared across handlers.

use crate::admission::UploadAdmission;
use crate::cache::MetadataCache;
use crate::catalog::ImageCatalog;
use crate::ratelimit::RateLimiter;
use lightbox_core::config::AppConfig;
use lightbox_kv::SharedStore;
use std::sync::Arc;
use thiserror::Error;

/// Configuration rejected at startup.
#[derive(Debug, Error)]
#[error("invalid configuration: {0}")]
pub struct InvalidConfig(pub String);

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<AppConfig>,
    /// Source of truth for image metadata and bytes.
    pub catalog: Arc<dyn ImageCatalog>,
    /// Shared store backing the limiter and cache. `None` if it was unreachable at startup.
    pub kv: Option<Arc<dyn SharedStore>>,
    pub rate_limiter: RateLimiter,
    pub admission: UploadAdmission,
    pub cache: MetadataCache,
}

impl AppState {
    /// Build state from configuration.
    ///
    /// Validates the configuration and logs warnings for risky-but-legal
    /// settings.
    pub fn new(
        config: AppConfig,
        catalog: Arc<dyn ImageCatalog>,
        kv: Option<Arc<dyn SharedStore>>,
    ) -> Result<Self, InvalidConfig> {
        let warnings = config.validate().map_err(InvalidConfig)?;
        for warning in warnings {
            tracing::warn!("Configuration warning: {}", warning);
        }

        if kv.is_none() && (config.rate_limit.enabled || config.cache.enabled) {
            tracing::warn!(
                rate_limit = config.rate_limit.enabled,
                cache = config.cache.enabled,
                "Shared store unavailable; rate limiting allows all requests \
                 and every read misses the cache"
            );
        }

        let rate_limiter = RateLimiter::new(&config.rate_limit, kv.clone(), &config.key_prefix);
        let admission = UploadAdmission::new(
            config.uploads.concurrency_limit,
            config.uploads.acquire_timeout(),
        );
        let cache = MetadataCache::new(&config.cache, kv.clone(), &config.key_prefix);

        Ok(Self {
            config: Arc::new(config),
            catalog,
            kv,
            rate_limiter,
            admission,
            cache,
        })
    }

    /// Replace the rate limiter, e.g. with one driven by a manual clock.
    pub fn with_rate_limiter(mut self, rate_limiter: RateLimiter) -> Self {
        self.rate_limiter = rate_limiter;
        self
    }
}
