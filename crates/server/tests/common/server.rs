//! Server test utilities.

use super::fixtures::CountingCatalog;
use axum::Router;
use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{HeaderMap, Request, StatusCode};
use lightbox_core::config::AppConfig;
use lightbox_core::{Clock, ManualClock};
use lightbox_kv::MemoryStore;
use lightbox_server::ratelimit::RateLimiter;
use lightbox_server::{AppState, create_router};
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use tower::ServiceExt;

/// Address attached to requests that do not set their own.
#[allow(dead_code)]
pub const DEFAULT_CLIENT: [u8; 4] = [192, 0, 2, 10];

/// A test server wrapper with all dependencies.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub struct TestServer {
    pub router: Router,
    pub state: AppState,
    pub store: Arc<MemoryStore>,
    pub catalog: Arc<CountingCatalog>,
}

/// A parsed response.
#[allow(dead_code)]
pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Value,
    pub raw: Vec<u8>,
}

#[allow(dead_code)]
impl TestResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

#[allow(dead_code)]
impl TestServer {
    /// Create a test server with default configuration and an in-memory store.
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    /// Create a test server with custom config modifications.
    pub fn with_config<F>(modifier: F) -> Self
    where
        F: FnOnce(&mut AppConfig),
    {
        Self::build(modifier, true, None)
    }

    /// Create a test server whose shared store was unreachable at startup.
    pub fn without_store<F>(modifier: F) -> Self
    where
        F: FnOnce(&mut AppConfig),
    {
        Self::build(modifier, false, None)
    }

    /// Create a test server whose rate limiter reads time from `clock`.
    pub fn with_clock<F>(modifier: F, clock: Arc<ManualClock>) -> Self
    where
        F: FnOnce(&mut AppConfig),
    {
        Self::build(modifier, true, Some(clock))
    }

    fn build<F>(modifier: F, connected: bool, clock: Option<Arc<ManualClock>>) -> Self
    where
        F: FnOnce(&mut AppConfig),
    {
        let mut config = AppConfig::for_testing();
        modifier(&mut config);

        let store = Arc::new(MemoryStore::new());
        let catalog = Arc::new(CountingCatalog::new());
        let kv: Option<Arc<dyn lightbox_kv::SharedStore>> = if connected {
            Some(store.clone())
        } else {
            None
        };

        let mut state = AppState::new(config.clone(), catalog.clone(), kv.clone())
            .expect("Failed to build app state");

        if let Some(clock) = clock {
            let clock: Arc<dyn Clock> = clock;
            state = state.with_rate_limiter(RateLimiter::with_clock(
                &config.rate_limit,
                kv,
                &config.key_prefix,
                clock,
            ));
        }

        let router = create_router(state.clone());

        Self {
            router,
            state,
            store,
            catalog,
        }
    }

    /// Send a request, attaching [`DEFAULT_CLIENT`] as the peer address if
    /// the request carries none.
    pub async fn send(&self, mut request: Request<Body>) -> TestResponse {
        if request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .is_none()
        {
            request
                .extensions_mut()
                .insert(ConnectInfo(SocketAddr::from((DEFAULT_CLIENT, 40000))));
        }

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let raw = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap()
            .to_vec();
        let body = if raw.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&raw).unwrap_or(Value::Null)
        };

        TestResponse {
            status,
            headers,
            body,
            raw,
        }
    }

    pub async fn get(&self, uri: &str) -> TestResponse {
        self.send(Request::get(uri).body(Body::empty()).unwrap())
            .await
    }

    /// Upload raw bytes from the default client.
    pub async fn upload(&self, data: Vec<u8>) -> TestResponse {
        self.send(upload_request(data, DEFAULT_CLIENT)).await
    }

    /// Upload raw bytes as if from `client`.
    pub async fn upload_from(&self, data: Vec<u8>, client: [u8; 4]) -> TestResponse {
        self.send(upload_request(data, client)).await
    }

    pub async fn delete(&self, id: &str, token: Option<&str>) -> TestResponse {
        let mut builder = Request::delete(format!("/v1/images/{id}"));
        if let Some(token) = token {
            builder = builder.header("x-delete-token", token);
        }
        self.send(builder.body(Body::empty()).unwrap()).await
    }
}

/// Build an upload request from a specific peer address.
#[allow(dead_code)]
pub fn upload_request(data: Vec<u8>, client: [u8; 4]) -> Request<Body> {
    let mut request = Request::post("/v1/images")
        .header("content-type", "application/octet-stream")
        .body(Body::from(data))
        .unwrap();
    request
        .extensions_mut()
        .insert(ConnectInfo(SocketAddr::from((client, 40000))));
    request
}

/// Build a GET request from a specific peer address.
#[allow(dead_code)]
pub fn get_request(uri: &str, client: [u8; 4]) -> Request<Body> {
    let mut request = Request::get(uri).body(Body::empty()).unwrap();
    request
        .extensions_mut()
        .insert(ConnectInfo(SocketAddr::from((client, 40000))));
    request
}
