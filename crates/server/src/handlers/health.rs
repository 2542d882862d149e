//! Health endpoint.

use crate::admission::AdmissionStatus;
use crate::health::TierStatus;
use crate::state::AppState;
use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use serde::Serialize;

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// `ok`, `degraded` (a fail-open tier is down) or `unavailable` (the catalog is down).
    pub status: &'static str,
    pub version: &'static str,
    pub catalog: TierStatus,
    pub rate_limit: TierStatus,
    pub cache: TierStatus,
    pub uploads: UploadHealth,
}

/// Upload admission utilisation.
#[derive(Debug, Serialize)]
pub struct UploadHealth {
    pub status: TierStatus,
    #[serde(flatten)]
    pub admission: AdmissionStatus,
}

/// GET /v1/health - Per-subsystem health.
///
/// Unauthenticated and not rate limited so liveness checks keep working under load.
/// Returns 503 only when the catalog is unreachable; a shared-store outage
/// degrades rate limiting and caching but requests still succeed.
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let catalog = match state.catalog.health_check().await {
        Ok(()) => TierStatus::Healthy,
        Err(e) => {
            tracing::warn!(error = %e, "Catalog health check failed");
            TierStatus::Unavailable
        }
    };
    let (rate_limit, cache) = tokio::join!(state.rate_limiter.health(), state.cache.health());
    let admission = state.admission.status();
    let uploads = UploadHealth {
        // Every slot busy: uploads are queueing.
        status: if admission.available == 0 {
            TierStatus::Degraded
        } else {
            TierStatus::Healthy
        },
        admission,
    };

    let (code, status) = if catalog != TierStatus::Healthy {
        (StatusCode::SERVICE_UNAVAILABLE, "unavailable")
    } else if rate_limit.is_ok() && cache.is_ok() && uploads.status.is_ok() {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::OK, "degraded")
    };

    (
        code,
        Json(HealthResponse {
            status,
            version: env!("CARGO_PKG_VERSION"),
            catalog,
            rate_limit,
            cache,
            uploads,
        }),
    )
}
