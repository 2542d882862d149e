//! Configuration types shared across crates.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Server configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Maximum accepted upload size in bytes.
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: u64,
    /// MIME types accepted for upload. Matched against the sniffed type,
    /// never against the declared Content-Type.
    #[serde(default = "default_allowed_content_types")]
    pub allowed_content_types: Vec<String>,
    /// Enable the /metrics endpoint for Prometheus scraping (default: true).
    /// SECURITY: When enabled, ensure this endpoint is network-restricted
    /// to authorized Prometheus scraper IPs only at the infrastructure level.
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_max_upload_bytes() -> u64 {
    crate::DEFAULT_MAX_UPLOAD_BYTES
}

fn default_allowed_content_types() -> Vec<String> {
    vec!["image/jpeg".to_string(), "image/png".to_string()]
}

fn default_metrics_enabled() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            max_upload_bytes: default_max_upload_bytes(),
            allowed_content_types: default_allowed_content_types(),
            metrics_enabled: default_metrics_enabled(),
        }
    }
}

impl ServerConfig {
    /// Validate server configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_upload_bytes == 0 {
            return Err("server.max_upload_bytes cannot be 0".to_string());
        }
        if self.allowed_content_types.is_empty() {
            return Err(
                "server.allowed_content_types is empty; every upload would be rejected"
                    .to_string(),
            );
        }
        Ok(())
    }
}

/// Shared key-value store backing rate-limit counters and cache entries.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum KvConfig {
    /// In-process store. Limits and cache coherence hold for this process only.
    Memory {
        /// Interval in seconds between sweeps of expired keys (0 disables the sweep;
        /// expired keys are still dropped lazily on access).
        #[serde(default = "default_sweep_interval_secs")]
        sweep_interval_secs: u64,
    },
    /// Redis (or any RESP-compatible server) shared by every instance.
    Redis {
        /// Connection URL, e.g. `redis://:password@localhost:6379/0`.
        /// WARNING: Prefer LIGHTBOX_KV__URL env var over storing credentials in config.
        url: String,
        /// Timeout for the initial connection in milliseconds.
        #[serde(default = "default_connect_timeout_ms")]
        connect_timeout_ms: u64,
    },
}

fn default_sweep_interval_secs() -> u64 {
    60
}

fn default_connect_timeout_ms() -> u64 {
    2_000
}

impl Default for KvConfig {
    fn default() -> Self {
        Self::Memory {
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl KvConfig {
    /// Validate key-value store configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            KvConfig::Memory { .. } => Ok(()),
            KvConfig::Redis { url, .. } => {
                if url.starts_with("redis://")
                    || url.starts_with("rediss://")
                    || url.starts_with("redis+unix://")
                    || url.starts_with("unix://")
                {
                    Ok(())
                } else {
                    Err(format!(
                        "kv.url '{url}' must use a redis://, rediss:// or unix:// scheme"
                    ))
                }
            }
        }
    }

    /// Whether keys written here are visible to other processes.
    pub fn is_shared(&self) -> bool {
        matches!(self, KvConfig::Redis { .. })
    }
}

/// Rate limiting configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Enable rate limiting.
    #[serde(default)]
    pub enabled: bool,
    /// Requests allowed per client within one window.
    #[serde(default = "default_requests_per_window")]
    pub requests_per_window: u32,
    /// Window length in seconds. Windows are aligned to wall-clock multiples
    /// of this length, not to a client's first request.
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
    /// Trusted proxy IP addresses/CIDR ranges.
    /// Only requests from these IPs will have X-Forwarded-For/X-Real-IP headers trusted.
    /// If empty, forwarded headers are never trusted (only direct connection IP is used).
    /// Use ["*"] to trust all proxies (NOT recommended for production).
    #[serde(default)]
    pub trusted_proxies: Vec<String>,
    /// Upper bound in milliseconds on a single counter round-trip. A slower
    /// store is treated as unreachable and the request is allowed.
    #[serde(default = "default_store_timeout_ms")]
    pub store_timeout_ms: u64,
}

fn default_requests_per_window() -> u32 {
    10
}

fn default_window_secs() -> u64 {
    60
}

fn default_store_timeout_ms() -> u64 {
    250
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            requests_per_window: default_requests_per_window(),
            window_secs: default_window_secs(),
            trusted_proxies: Vec::new(),
            store_timeout_ms: default_store_timeout_ms(),
        }
    }
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    /// Validate rate limit configuration for dangerous settings.
    /// Returns warnings for configs that are insecure but allowed,
    /// and errors for configs that are unsafe and should be rejected.
    pub fn validate(&self) -> Result<Vec<String>, String> {
        let mut warnings = Vec::new();

        if !self.enabled {
            return Ok(warnings);
        }

        if self.window_secs == 0 {
            return Err("rate_limit.window_secs cannot be 0".to_string());
        }

        if self.requests_per_window == 0 {
            return Err("rate_limit.requests_per_window cannot be 0. \
                 Disable rate limiting instead of rejecting every request."
                .to_string());
        }

        if self.trusted_proxies.len() == 1 && self.trusted_proxies[0] == "*" {
            warnings.push(
                "rate_limit.trusted_proxies=['*'] trusts ALL forwarded headers. \
                 This allows clients to spoof their IP address and bypass rate limits. \
                 Only use this setting in development or behind a trusted reverse proxy."
                    .to_string(),
            );
        }

        if self.store_timeout_ms == 0 {
            warnings.push(
                "rate_limit.store_timeout_ms=0 makes every counter lookup time out; \
                 the limiter will allow all requests."
                    .to_string(),
            );
        }

        Ok(warnings)
    }
}

/// Upload admission (concurrency) configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Maximum uploads processed concurrently by this process.
    #[serde(default = "default_concurrency_limit")]
    pub concurrency_limit: u32,
    /// How long an upload waits for a free slot before being turned away, in milliseconds.
    #[serde(default = "default_acquire_timeout_ms")]
    pub acquire_timeout_ms: u64,
}

fn default_concurrency_limit() -> u32 {
    10
}

fn default_acquire_timeout_ms() -> u64 {
    30_000
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            concurrency_limit: default_concurrency_limit(),
            acquire_timeout_ms: default_acquire_timeout_ms(),
        }
    }
}

impl UploadConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    /// Validate upload configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        if self.concurrency_limit == 0 {
            return Err("uploads.concurrency_limit cannot be 0".to_string());
        }
        Ok(())
    }
}

/// Metadata cache configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Enable the read-through metadata cache.
    #[serde(default = "default_cache_enabled")]
    pub enabled: bool,
    /// Default time-to-live for cached metadata in seconds.
    #[serde(default = "default_cache_ttl_secs")]
    pub ttl_secs: u64,
    /// Upper bound in milliseconds on a single cache round-trip.
    #[serde(default = "default_store_timeout_ms")]
    pub store_timeout_ms: u64,
    /// Log every hit, miss and invalidation at info level.
    #[serde(default)]
    pub debug: bool,
}

fn default_cache_enabled() -> bool {
    true
}

fn default_cache_ttl_secs() -> u64 {
    3600
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: default_cache_enabled(),
            ttl_secs: default_cache_ttl_secs(),
            store_timeout_ms: default_store_timeout_ms(),
            debug: false,
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    /// Validate cache configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        if self.enabled && self.ttl_secs == 0 {
            return Err("cache.ttl_secs cannot be 0; TTL is the only bound on a missed \
                 invalidation. Disable the cache instead."
                .to_string());
        }
        Ok(())
    }
}

/// Complete application configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AppConfig {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Shared key-value store configuration.
    #[serde(default)]
    pub kv: KvConfig,
    /// Prefix namespacing every key this service writes to the shared store.
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
    /// Rate limiting configuration.
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    /// Upload admission configuration.
    #[serde(default)]
    pub uploads: UploadConfig,
    /// Metadata cache configuration.
    #[serde(default)]
    pub cache: CacheConfig,
}

fn default_key_prefix() -> String {
    "lightbox".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            kv: KvConfig::default(),
            key_prefix: default_key_prefix(),
            rate_limit: RateLimitConfig::default(),
            uploads: UploadConfig::default(),
            cache: CacheConfig::default(),
        }
    }
}

impl AppConfig {
    /// Create a test configuration with sensible defaults.
    ///
    /// **For testing only.** Uses the in-memory store with the sweep disabled
    /// and leaves rate limiting off.
    pub fn for_testing() -> Self {
        Self {
            server: ServerConfig::default(),
            kv: KvConfig::Memory {
                sweep_interval_secs: 0,
            },
            key_prefix: default_key_prefix(),
            rate_limit: RateLimitConfig::default(),
            uploads: UploadConfig::default(),
            cache: CacheConfig::default(),
        }
    }

    /// Validate every section. Returns warnings for legal-but-risky settings.
    pub fn validate(&self) -> Result<Vec<String>, String> {
        self.server.validate()?;
        self.kv.validate()?;
        self.uploads.validate()?;
        self.cache.validate()?;
        if self.key_prefix.is_empty() {
            return Err("key_prefix cannot be empty".to_string());
        }
        let mut warnings = self.rate_limit.validate()?;
        if self.rate_limit.enabled && !self.kv.is_shared() {
            warnings.push(
                "rate_limit is enabled with the in-memory store; \
                 limits apply per process, not cluster-wide."
                    .to_string(),
            );
        }
        Ok(warnings)
    }
}
