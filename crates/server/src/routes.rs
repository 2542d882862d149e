//! Route configuration.

use crate::handlers;
use crate::metrics::{metrics_handler, register_metrics};
use crate::ratelimit::rate_limit_middleware;
use crate::state::AppState;
use crate::trace::trace_middleware;
use axum::Router;
use axum::middleware;
use axum::routing::{get, post};
use tower_http::trace::TraceLayer;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    register_metrics();

    // Every image route is rate limited before its handler runs, so a denied
    // upload never queues for admission or has its body read.
    let image_routes = Router::new()
        .route("/v1/images", post(handlers::upload_image))
        .route(
            "/v1/images/{id}",
            get(handlers::get_image).delete(handlers::delete_image),
        )
        .route("/v1/images/{id}/file", get(handlers::get_image_file))
        .route_layer(middleware::from_fn_with_state(
            state.rate_limiter.clone(),
            rate_limit_middleware,
        ));

    // Health check stays unlimited for load balancer checks.
    let mut router = Router::new()
        .route("/v1/health", get(handlers::health_check))
        .merge(image_routes);

    // SECURITY: When enabled, this endpoint MUST be network-restricted
    // to authorized Prometheus scraper IPs only.
    if state.config.server.metrics_enabled {
        router = router.route("/metrics", get(metrics_handler));
    }

    // Order of execution: TraceLayer -> trace id -> rate limit -> handler
    router
        .layer(middleware::from_fn(trace_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
