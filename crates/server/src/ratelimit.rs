//! Per-client rate limiting using fixed wall-clock windows.
//!
//! Each client gets one counter per window in the shared store, keyed
//! `{prefix}:ratelimit:{client}:{window_id}`. Windows are aligned to multiples
//! of the window length since the Unix epoch, so every instance agrees on
//! where a window starts and counters reset on the boundary rather than a
//! rolling interval after a client's first request.
//!
//! A client can get up to twice the limit through by spending one full quota
//! at the end of a window and another at the start of the next.
//!
//! # Failure Semantics
//!
//! The limiter fails open. A store error, a store round-trip slower than
//! `store_timeout_ms`, or a store that was never reachable all result in the
//! request being allowed and a warning logged.
//!
//! # Security Note
//!
//! By default, X-Forwarded-For and X-Real-IP headers are NOT trusted to prevent
//! IP spoofing attacks. You must explicitly configure `trusted_proxies` to enable
//! header-based IP detection:
//!
//! - Empty list (default): Only direct connection IP is used (most secure)
//! - List of IPs/CIDRs: Headers trusted only when request comes from these IPs
//! - ["*"]: Trust headers from all sources (NOT recommended for production)

use crate::health::TierStatus;
use crate::metrics;
use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use ipnet::IpNet;
use lightbox_core::config::RateLimitConfig;
use lightbox_core::{Clock, SystemClock};
use lightbox_kv::{SharedStore, parse_counter, with_timeout};
use std::{
    net::{IpAddr, SocketAddr},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

/// Extra lifetime given to a window counter past the end of its window.
const COUNTER_TTL_GRACE: Duration = Duration::from_secs(1);

/// Identity used when no client address can be determined.
pub const UNKNOWN_CLIENT: &str = "unknown";

/// Outcome of a single rate-limit check.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    /// Requests counted for this client in the current window, including this one.
    /// Zero when the check did not reach the store.
    pub count: u64,
    pub limit: u32,
    pub remaining: u32,
    /// Time until the current window ends. Only meaningful when denied.
    pub retry_after: Duration,
    /// The store could not be consulted and the request was let through.
    pub fail_open: bool,
}

impl RateLimitDecision {
    fn allow_unchecked(limit: u32, fail_open: bool) -> Self {
        Self {
            allowed: true,
            count: 0,
            limit,
            remaining: limit,
            retry_after: Duration::ZERO,
            fail_open,
        }
    }

    /// `retry_after` rounded up to whole seconds, never below one.
    pub fn retry_after_secs(&self) -> u64 {
        let millis = u64::try_from(self.retry_after.as_millis()).unwrap_or(u64::MAX);
        millis.div_ceil(1000).max(1)
    }
}

/// Snapshot of a client's usage in the current window.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RateLimitStatus {
    pub count: u64,
    pub limit: u32,
    pub remaining: u32,
    /// Time until the current window ends and the count resets.
    pub resets_in: Duration,
}

/// Fixed-window rate limiter shared across requests.
#[derive(Clone)]
pub struct RateLimiter {
    inner: Option<Arc<RateLimiterInner>>,
    clients: Arc<ClientIpResolver>,
}

/// Inner state that's only allocated when rate limiting is enabled.
struct RateLimiterInner {
    /// `None` when the store could not be reached at startup.
    store: Option<Arc<dyn SharedStore>>,
    limit: u32,
    window: Duration,
    key_prefix: String,
    store_timeout: Duration,
    clock: Arc<dyn Clock>,
}

impl RateLimiterInner {
    fn window_millis(&self) -> u64 {
        u64::try_from(self.window.as_millis())
            .unwrap_or(u64::MAX)
            .max(1)
    }

    /// Current window id and the time remaining until it ends.
    fn current_window(&self) -> (u64, Duration) {
        let window_ms = self.window_millis();
        let now = self.clock.now_millis();
        let window_id = now / window_ms;
        let window_end = window_id.saturating_add(1).saturating_mul(window_ms);
        (window_id, Duration::from_millis(window_end - now))
    }

    fn counter_key(&self, client_id: &str, window_id: u64) -> String {
        format!(
            "{}:ratelimit:{}:{}",
            self.key_prefix,
            normalize_client_id(client_id),
            window_id
        )
    }

    fn remaining(&self, count: u64) -> u32 {
        let limit = u64::from(self.limit);
        u32::try_from(limit.saturating_sub(count)).unwrap_or(0)
    }
}

fn normalize_client_id(client_id: &str) -> &str {
    let trimmed = client_id.trim();
    if trimmed.is_empty() {
        UNKNOWN_CLIENT
    } else {
        trimmed
    }
}

impl RateLimiter {
    /// Create a limiter from configuration using the system clock.
    ///
    /// Pass `store = None` when the shared store is unreachable; an enabled
    /// limiter then allows everything and reports itself degraded.
    pub fn new(
        config: &RateLimitConfig,
        store: Option<Arc<dyn SharedStore>>,
        key_prefix: &str,
    ) -> Self {
        Self::with_clock(config, store, key_prefix, Arc::new(SystemClock))
    }

    /// Create a limiter that reads wall-clock time from `clock`.
    pub fn with_clock(
        config: &RateLimitConfig,
        store: Option<Arc<dyn SharedStore>>,
        key_prefix: &str,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let clients = Arc::new(ClientIpResolver::new(&config.trusted_proxies));

        if !config.enabled {
            return Self {
                inner: None,
                clients,
            };
        }

        Self {
            inner: Some(Arc::new(RateLimiterInner {
                store,
                limit: config.requests_per_window,
                window: config.window(),
                key_prefix: key_prefix.to_string(),
                store_timeout: config.store_timeout(),
                clock,
            })),
            clients,
        }
    }

    /// Check if rate limiting is enabled.
    pub fn is_enabled(&self) -> bool {
        self.inner.is_some()
    }

    /// Count a request from `client_id` and decide whether it may proceed.
    ///
    /// The request that crosses the limit is itself counted, so a client that
    /// keeps retrying within a window stays denied until the window ends.
    pub async fn check(&self, client_id: &str) -> RateLimitDecision {
        let inner = match &self.inner {
            Some(inner) => inner,
            None => return RateLimitDecision::allow_unchecked(0, false),
        };

        let store = match &inner.store {
            Some(store) => store,
            None => {
                metrics::record_rate_limit("fail_open");
                tracing::debug!("Rate limiter has no store, allowing request");
                return RateLimitDecision::allow_unchecked(inner.limit, true);
            }
        };

        let (window_id, retry_after) = inner.current_window();
        let key = inner.counter_key(client_id, window_id);
        let ttl = inner.window + COUNTER_TTL_GRACE;

        let count = match with_timeout(inner.store_timeout, store.incr(&key, ttl)).await {
            Ok(count) => count,
            Err(e) => {
                metrics::record_rate_limit("fail_open");
                metrics::record_store_error("incr");
                tracing::warn!(
                    client = normalize_client_id(client_id),
                    backend = store.backend_name(),
                    error = %e,
                    "Rate limiter store error, allowing request"
                );
                return RateLimitDecision::allow_unchecked(inner.limit, true);
            }
        };

        let allowed = count <= u64::from(inner.limit);
        if allowed {
            metrics::record_rate_limit("allowed");
        } else {
            metrics::record_rate_limit("denied");
            tracing::debug!(
                client = normalize_client_id(client_id),
                count = count,
                limit = inner.limit,
                retry_after_ms = retry_after.as_millis() as u64,
                "Rate limit exceeded"
            );
        }

        RateLimitDecision {
            allowed,
            count,
            limit: inner.limit,
            remaining: inner.remaining(count),
            retry_after,
            fail_open: false,
        }
    }

    /// Read a client's usage in the current window without counting a request.
    ///
    /// Returns `None` when disabled or when the store cannot be read.
    pub async fn status(&self, client_id: &str) -> Option<RateLimitStatus> {
        let inner = self.inner.as_ref()?;
        let store = inner.store.as_ref()?;

        let (window_id, resets_in) = inner.current_window();
        let key = inner.counter_key(client_id, window_id);

        let count = match with_timeout(inner.store_timeout, store.get(&key)).await {
            Ok(Some(value)) => match parse_counter(&key, &value) {
                Ok(count) => count,
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "Unreadable rate limit counter");
                    return None;
                }
            },
            Ok(None) => 0,
            Err(e) => {
                metrics::record_store_error("get");
                tracing::warn!(key = %key, error = %e, "Failed to read rate limit status");
                return None;
            }
        };

        Some(RateLimitStatus {
            count,
            limit: inner.limit,
            remaining: inner.remaining(count),
            resets_in,
        })
    }

    /// Clear a client's counter for the current window.
    ///
    /// Returns `true` if the counter was removed (or never existed).
    pub async fn reset(&self, client_id: &str) -> bool {
        let Some(inner) = self.inner.as_ref() else {
            return false;
        };
        let Some(store) = inner.store.as_ref() else {
            return false;
        };

        let (window_id, _) = inner.current_window();
        let key = inner.counter_key(client_id, window_id);

        match with_timeout(inner.store_timeout, store.delete(&key)).await {
            Ok(()) => true,
            Err(e) => {
                metrics::record_store_error("delete");
                tracing::warn!(
                    client = normalize_client_id(client_id),
                    error = %e,
                    "Failed to reset rate limit"
                );
                false
            }
        }
    }

    /// Report whether the limiter can currently reach its store.
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
                tracing::debug!(error = %e, "Rate limiter store ping failed");
                TierStatus::Degraded
            }
        }
    }

    /// Resolve the client identity for a request.
    pub fn client_ip(&self, req: &Request<Body>) -> String {
        self.clients.extract_ip(req)
    }

    /// Configured requests per window, or `None` when disabled.
    pub fn limit(&self) -> Option<u32> {
        self.inner.as_ref().map(|inner| inner.limit)
    }

    /// Configured window length, or `None` when disabled.
    pub fn window(&self) -> Option<Duration> {
        self.inner.as_ref().map(|inner| inner.window)
    }
}

/// Error returned when rate limit is exceeded.
#[derive(Debug)]
pub struct RateLimitError {
    /// Number of seconds to wait before retrying.
    pub retry_after_secs: u64,
    /// Requests allowed per window.
    pub limit: u32,
}

impl From<&RateLimitDecision> for RateLimitError {
    fn from(decision: &RateLimitDecision) -> Self {
        Self {
            retry_after_secs: decision.retry_after_secs(),
            limit: decision.limit,
        }
    }
}

impl IntoResponse for RateLimitError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "code": "rate_limit_exceeded",
            "message": format!(
                "Rate limit exceeded. Retry after {} seconds.",
                self.retry_after_secs
            ),
            "limit": self.limit,
            "retry_after": self.retry_after_secs,
        });

        (
            StatusCode::TOO_MANY_REQUESTS,
            [("Retry-After", self.retry_after_secs.to_string())],
            axum::Json(body),
        )
            .into_response()
    }
}

/// A parsed trusted proxy entry (either an IP or CIDR range).
#[derive(Clone, Debug)]
enum TrustedEntry {
    Ip(IpAddr),
    Cidr(IpNet),
}

/// Trusted proxy configuration for IP extraction.
#[derive(Clone, Debug)]
enum TrustedProxies {
    /// Never trust forwarded headers (default, most secure).
    None,
    /// Trust headers from all sources (dangerous, for development only).
    All,
    /// Trust headers only from specific IPs/CIDRs.
    List(Vec<TrustedEntry>),
}

impl TrustedProxies {
    fn from_config(proxies: &[String]) -> Self {
        if proxies.is_empty() {
            return Self::None;
        }
        if proxies.len() == 1 && proxies[0] == "*" {
            return Self::All;
        }

        let entries = proxies
            .iter()
            .filter_map(|p| {
                let parsed = if p.contains('/') {
                    p.parse::<IpNet>()
                        .map(TrustedEntry::Cidr)
                        .map_err(|e| e.to_string())
                } else {
                    p.parse::<IpAddr>()
                        .map(TrustedEntry::Ip)
                        .map_err(|e| e.to_string())
                };
                match parsed {
                    Ok(entry) => Some(entry),
                    Err(e) => {
                        tracing::warn!(
                            entry = %p,
                            error = %e,
                            "Ignoring invalid trusted_proxies entry"
                        );
                        None
                    }
                }
            })
            .collect();
        Self::List(entries)
    }

    /// Check if the given connection IP is a trusted proxy.
    fn is_trusted(&self, connection_ip: &str) -> bool {
        match self {
            Self::None => false,
            Self::All => true,
            Self::List(entries) => {
                let Ok(ip) = connection_ip.parse::<IpAddr>() else {
                    return false;
                };
                entries.iter().any(|entry| match entry {
                    TrustedEntry::Ip(trusted) => *trusted == ip,
                    TrustedEntry::Cidr(network) => network.contains(&ip),
                })
            }
        }
    }
}

/// Derives client identity from a request.
struct ClientIpResolver {
    trusted_proxies: TrustedProxies,
    /// Whether ConnectInfo missing warning has been logged.
    connect_info_warned: AtomicBool,
}

impl ClientIpResolver {
    fn new(trusted_proxies: &[String]) -> Self {
        Self {
            trusted_proxies: TrustedProxies::from_config(trusted_proxies),
            connect_info_warned: AtomicBool::new(false),
        }
    }

    /// Extract client IP address from request.
    ///
    /// # Security
    ///
    /// Forwarded headers are read only when the direct connection comes from
    /// a trusted proxy (or every source is trusted with `["*"]`).
    fn extract_ip(&self, req: &Request<Body>) -> String {
        let connection_ip = extract_connection_ip(req);

        let trust_headers = match (&connection_ip, &self.trusted_proxies) {
            (None, TrustedProxies::All) => true,
            // Can't verify the proxy without a connection address.
            (None, _) => false,
            (Some(conn_ip), trusted_proxies) => trusted_proxies.is_trusted(conn_ip),
        };

        if trust_headers && let Some(forwarded_ip) = extract_forwarded_ip(req) {
            return forwarded_ip;
        }

        match connection_ip {
            Some(ip) => ip,
            None => {
                self.warn_connect_info_missing();
                UNKNOWN_CLIENT.to_string()
            }
        }
    }

    /// Log a warning if ConnectInfo is not available (only once).
    fn warn_connect_info_missing(&self) {
        if !self.connect_info_warned.swap(true, Ordering::Relaxed) {
            tracing::warn!(
                "ConnectInfo not available for rate limiting. All requests will share a single \
                 rate limit bucket ('unknown' IP). Add \
                 .into_make_service_with_connect_info::<SocketAddr>() to your server \
                 configuration to enable per-IP rate limiting."
            );
        }
    }
}

/// Extract client IP address from forwarding headers (only called if trusted).
fn extract_forwarded_ip(req: &Request<Body>) -> Option<String> {
    // First hop of X-Forwarded-For is the original client.
    if let Some(forwarded) = req.headers().get("x-forwarded-for")
        && let Ok(s) = forwarded.to_str()
        && let Some(ip) = s.split(',').next()
        && !ip.trim().is_empty()
    {
        return Some(ip.trim().to_string());
    }

    if let Some(real_ip) = req.headers().get("x-real-ip")
        && let Ok(s) = real_ip.to_str()
        && !s.trim().is_empty()
    {
        return Some(s.trim().to_string());
    }

    None
}

/// Extract connection IP from request extensions (set by ConnectInfo).
fn extract_connection_ip(req: &Request<Body>) -> Option<String> {
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.ip().to_string())
}

/// Client identity resolved by [`rate_limit_middleware`].
#[derive(Clone, Debug)]
pub struct ClientIp(pub String);

/// Per-client rate limiting middleware.
///
/// Resolves the client identity, records it as a [`ClientIp`] request
/// extension, and rejects the request with `429` once the client's window
/// quota is spent. Runs before any handler work, including body reads.
pub async fn rate_limit_middleware(
    State(limiter): State<RateLimiter>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let client = limiter.client_ip(&req);

    if limiter.is_enabled() {
        let decision = limiter.check(&client).await;
        if !decision.allowed {
            return RateLimitError::from(&decision).into_response();
        }
    }

    req.extensions_mut().insert(ClientIp(client));
    next.run(req).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use lightbox_core::ManualClock;
    use lightbox_kv::MemoryStore;

    fn enabled_config(limit: u32, window_secs: u64) -> RateLimitConfig {
        RateLimitConfig {
            enabled: true,
            requests_per_window: limit,
            window_secs,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_rate_limiter_disabled() {
        let config = RateLimitConfig {
            enabled: false,
            ..Default::default()
        };
        let limiter = RateLimiter::new(&config, Some(Arc::new(MemoryStore::new())), "t");
        assert!(!limiter.is_enabled());
        for _ in 0..100 {
            assert!(limiter.check("127.0.0.1").await.allowed);
        }
        assert_eq!(limiter.health().await, TierStatus::Disabled);
    }

    #[tokio::test]
    async fn test_retry_after_runs_to_window_boundary() {
        let clock = Arc::new(ManualClock::new(60_000 * 10 + 15_500));
        let limiter = RateLimiter::with_clock(
            &enabled_config(1, 60),
            Some(Arc::new(MemoryStore::new())),
            "t",
            clock,
        );

        assert!(limiter.check("a").await.allowed);
        let denied = limiter.check("a").await;
        assert!(!denied.allowed);
        assert_eq!(denied.retry_after, Duration::from_millis(44_500));
        assert_eq!(denied.retry_after_secs(), 45);
        assert_eq!(denied.remaining, 0);
    }

    #[tokio::test]
    async fn test_empty_client_id_shares_unknown_bucket() {
        let clock = Arc::new(ManualClock::new(0));
        let limiter = RateLimiter::with_clock(
            &enabled_config(1, 60),
            Some(Arc::new(MemoryStore::new())),
            "t",
            clock,
        );
        assert!(limiter.check("").await.allowed);
        assert!(!limiter.check(UNKNOWN_CLIENT).await.allowed);
    }

    #[tokio::test]
    async fn test_missing_store_fails_open_and_degrades() {
        let limiter = RateLimiter::new(&enabled_config(1, 60), None, "t");
        for _ in 0..5 {
            let decision = limiter.check("a").await;
            assert!(decision.allowed);
            assert!(decision.fail_open);
        }
        assert_eq!(limiter.health().await, TierStatus::Degraded);
        assert!(limiter.status("a").await.is_none());
    }

    #[tokio::test]
    async fn test_status_and_reset() {
        let clock = Arc::new(ManualClock::new(0));
        let limiter = RateLimiter::with_clock(
            &enabled_config(3, 60),
            Some(Arc::new(MemoryStore::new())),
            "t",
            clock,
        );

        assert_eq!(limiter.status("a").await.map(|s| s.count), Some(0));
        limiter.check("a").await;
        limiter.check("a").await;
        let status = limiter.status("a").await.unwrap();
        assert_eq!(status.count, 2);
        assert_eq!(status.remaining, 1);
        assert_eq!(status.resets_in, Duration::from_secs(60));

        assert!(limiter.reset("a").await);
        assert_eq!(limiter.status("a").await.map(|s| s.count), Some(0));
        assert_eq!(limiter.check("a").await.count, 1);
    }

    #[test]
    fn test_rate_limit_error_rounds_up() {
        let decision = RateLimitDecision {
            allowed: false,
            count: 2,
            limit: 1,
            remaining: 0,
            retry_after: Duration::from_millis(1),
            fail_open: false,
        };
        assert_eq!(RateLimitError::from(&decision).retry_after_secs, 1);
    }

    #[test]
    fn test_trusted_proxies_none() {
        let proxies = TrustedProxies::from_config(&[]);
        assert!(!proxies.is_trusted("127.0.0.1"));
        assert!(!proxies.is_trusted("10.0.0.1"));
    }

    #[test]
    fn test_trusted_proxies_all() {
        let proxies = TrustedProxies::from_config(&["*".to_string()]);
        assert!(proxies.is_trusted("127.0.0.1"));
        assert!(proxies.is_trusted("anything"));
    }

    #[test]
    fn test_trusted_proxies_list() {
        let proxies =
            TrustedProxies::from_config(&["127.0.0.1".to_string(), "10.0.0.0/8".to_string()]);
        assert!(proxies.is_trusted("127.0.0.1"));
        assert!(proxies.is_trusted("10.255.255.255"));
        assert!(!proxies.is_trusted("192.168.1.1"));
        assert!(!proxies.is_trusted("11.0.0.1"));
    }

    #[test]
    fn test_forwarded_headers_only_from_trusted_proxy() {
        let resolver = ClientIpResolver::new(&["10.0.0.0/8".to_string()]);

        let mut req = Request::builder()
            .header("x-forwarded-for", "203.0.113.9, 10.0.0.2")
            .body(Body::empty())
            .unwrap();
        req.extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([10, 0, 0, 2], 4000))));
        assert_eq!(resolver.extract_ip(&req), "203.0.113.9");

        let mut req = Request::builder()
            .header("x-forwarded-for", "203.0.113.9")
            .body(Body::empty())
            .unwrap();
        req.extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([198, 51, 100, 7], 4000))));
        assert_eq!(resolver.extract_ip(&req), "198.51.100.7");
    }

    #[test]
    fn test_real_ip_fallback_and_unknown() {
        let resolver = ClientIpResolver::new(&["*".to_string()]);
        let req = Request::builder()
            .header("x-real-ip", " 192.0.2.1 ")
            .body(Body::empty())
            .unwrap();
        assert_eq!(resolver.extract_ip(&req), "192.0.2.1");

        let strict = ClientIpResolver::new(&[]);
        let req = Request::builder()
            .header("x-real-ip", "192.0.2.1")
            .body(Body::empty())
            .unwrap();
        assert_eq!(strict.extract_ip(&req), UNKNOWN_CLIENT);
    }
}
