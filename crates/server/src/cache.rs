//! Cache-aside metadata cache over the shared store.
//!
//! Readers call [`MetadataCache::get`] and, on a miss, fetch from the catalog
//! and [`MetadataCache::set`] the result. Writers call
//! [`MetadataCache::invalidate`] after every catalog mutation and before
//! responding. Not-found results are never cached.
//!
//! The cache fails open: store errors and slow round-trips become misses, and
//! failed writes are logged and dropped. An entry a failed invalidation left
//! behind lives at most one TTL.

use crate::health::TierStatus;
use crate::metrics;
use bytes::Bytes;
use lightbox_core::config::CacheConfig;
use lightbox_core::{ImageId, ImageMetadata};
use lightbox_kv::{SharedStore, with_timeout};
use std::sync::Arc;
use std::time::Duration;

/// How a read was served, reported to clients in the `X-Cache` header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CacheOutcome {
    Hit,
    Miss,
    Disabled,
}

impl CacheOutcome {
    pub fn as_header_value(self) -> &'static str {
        match self {
            Self::Hit => "HIT",
            Self::Miss => "MISS",
            Self::Disabled => "DISABLED",
        }
    }
}

/// Metadata cache handle. Cheap to clone.
#[derive(Clone)]
pub struct MetadataCache {
    inner: Option<Arc<CacheInner>>,
}

struct CacheInner {
    /// `None` when the store could not be reached at startup.
    store: Option<Arc<dyn SharedStore>>,
    key_prefix: String,
    default_ttl: Duration,
    store_timeout: Duration,
    debug: bool,
}

impl CacheInner {
    fn key(&self, id: &ImageId) -> String {
        format!("{}:image:{}", self.key_prefix, id)
    }
}

impl MetadataCache {
    /// Create a cache from configuration.
    ///
    /// With `store = None` an enabled cache misses on every read.
    pub fn new(
        config: &CacheConfig,
        store: Option<Arc<dyn SharedStore>>,
        key_prefix: &str,
    ) -> Self {
        if !config.enabled {
            return Self { inner: None };
        }
        Self {
            inner: Some(Arc::new(CacheInner {
                store,
                key_prefix: key_prefix.to_string(),
                default_ttl: config.ttl(),
                store_timeout: config.store_timeout(),
                debug: config.debug,
            })),
        }
    }

    /// A cache that never stores anything.
    pub fn disabled() -> Self {
        Self { inner: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.is_some()
    }

    /// Look up cached metadata. Any failure reads as a miss.
    pub async fn get(&self, id: &ImageId) -> Option<ImageMetadata> {
        self.lookup(id).await.0
    }

    /// Look up cached metadata and report how the lookup went.
    pub async fn lookup(&self, id: &ImageId) -> (Option<ImageMetadata>, CacheOutcome) {
        let Some(inner) = self.inner.as_ref() else {
            return (None, CacheOutcome::Disabled);
        };
        let Some(store) = inner.store.as_ref() else {
            metrics::record_cache_lookup("miss");
            return (None, CacheOutcome::Miss);
        };

        let key = inner.key(id);
        let raw = match with_timeout(inner.store_timeout, store.get(&key)).await {
            Ok(raw) => raw,
            Err(e) => {
                metrics::record_cache_lookup("error");
                metrics::record_store_error("get");
                tracing::warn!(key = %key, error = %e, "Cache get failed, treating as miss");
                return (None, CacheOutcome::Miss);
            }
        };

        let Some(raw) = raw else {
            metrics::record_cache_lookup("miss");
            if inner.debug {
                tracing::info!(key = %key, "Cache miss");
            }
            return (None, CacheOutcome::Miss);
        };

        match serde_json::from_slice::<ImageMetadata>(&raw) {
            Ok(metadata) => {
                metrics::record_cache_lookup("hit");
                if inner.debug {
                    tracing::info!(key = %key, "Cache hit");
                }
                (Some(metadata), CacheOutcome::Hit)
            }
            Err(e) => {
                metrics::record_cache_lookup("error");
                tracing::warn!(key = %key, error = %e, "Discarding undecodable cache entry");
                if let Err(e) = with_timeout(inner.store_timeout, store.delete(&key)).await {
                    metrics::record_store_error("delete");
                    tracing::warn!(
                        key = %key,
                        error = %e,
                        "Failed to delete undecodable cache entry"
                    );
                }
                (None, CacheOutcome::Miss)
            }
        }
    }

    /// Store metadata, replacing any previous entry.
    ///
    /// `ttl = None` uses the configured default. Returns whether the entry was
    /// written; failures are logged, never returned.
    pub async fn set(&self, id: &ImageId, metadata: &ImageMetadata, ttl: Option<Duration>) -> bool {
        let Some(inner) = self.inner.as_ref() else {
            return false;
        };
        let Some(store) = inner.store.as_ref() else {
            return false;
        };

        let key = inner.key(id);
        let value = match serde_json::to_vec(metadata) {
            Ok(value) => Bytes::from(value),
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Failed to encode metadata for cache");
                return false;
            }
        };
        let ttl = ttl.unwrap_or(inner.default_ttl);

        match with_timeout(inner.store_timeout, store.set(&key, value, ttl)).await {
            Ok(()) => {
                if inner.debug {
                    tracing::info!(key = %key, ttl_secs = ttl.as_secs(), "Cache set");
                }
                true
            }
            Err(e) => {
                metrics::record_store_error("set");
                tracing::warn!(key = %key, error = %e, "Cache set failed");
                false
            }
        }
    }

    /// Remove any cached entry for `id`. Removing an absent entry succeeds.
    ///
    /// Returns `false` if the store could not be reached, in which case a
    /// stale entry may survive until its TTL runs out.
    pub async fn invalidate(&self, id: &ImageId) -> bool {
        let Some(inner) = self.inner.as_ref() else {
            return true;
        };
        let key = inner.key(id);
        let Some(store) = inner.store.as_ref() else {
            metrics::CACHE_INVALIDATION_FAILURES.inc();
            tracing::error!(key = %key, "Cache invalidation skipped: no store connection");
            return false;
        };

        match with_timeout(inner.store_timeout, store.delete(&key)).await {
            Ok(()) => {
                if inner.debug {
                    tracing::info!(key = %key, "Cache invalidated");
                }
                true
            }
            Err(e) => {
                metrics::CACHE_INVALIDATION_FAILURES.inc();
                metrics::record_store_error("delete");
                tracing::error!(
                    key = %key,
                    error = %e,
                    ttl_secs = inner.default_ttl.as_secs(),
                    "Cache invalidation failed; entry may be stale until TTL expiry"
                );
                false
            }
        }
    }

    /// Report whether the cache can currently reach its store.
    pub async fn health(&self) -> TierStatus {
        let Some(inner) = self.inner.as_ref() else {
            return TierStatus::Disabled;
        };
        let Some(store) = inner.store.as_ref() else {
            return TierStatus::Degraded;
        };
        match with_timeout(inner.store_timeout, store.ping()).await {
            Ok(()) => TierStatus::Healthy,
            Err(e) => {
                tracing::debug!(error = %e, "Cache store ping failed");
                TierStatus::Degraded
            }
        }
    }

    /// Configured default TTL, or `None` when disabled.
    pub fn default_ttl(&self) -> Option<Duration> {
        self.inner.as_ref().map(|inner| inner.default_ttl)
    }
}
