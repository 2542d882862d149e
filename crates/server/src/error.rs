//! API error types.

use crate::admission::AdmissionTimeout;
use crate::catalog::CatalogError;
use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

/// Reason reported when an upload could not get an admission slot.
pub const UPLOAD_CONCURRENCY_EXCEEDED: &str = "upload_concurrency_limit_exceeded";

/// API error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error code for programmatic handling.
    pub code: String,
    /// Human-readable error message.
    pub message: String,
    /// Machine-readable cause, when the code alone is ambiguous.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("payload too large: {size} bytes exceeds limit of {max} bytes")]
    PayloadTooLarge { size: u64, max: u64 },

    #[error("server busy, try again later")]
    Busy(#[from] AdmissionTimeout),

    #[error("catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("{0}")]
    Core(#[from] lightbox_core::Error),
}

impl ApiError {
    /// Get the error code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::BadRequest(_) => "bad_request",
            Self::Forbidden(_) => "forbidden",
            Self::PayloadTooLarge { .. } => "payload_too_large",
            Self::Busy(_) => "service_unavailable",
            Self::Catalog(e) => match e {
                CatalogError::AlreadyExists(_) => "conflict",
                CatalogError::Unavailable(_) => "service_unavailable",
            },
            Self::Core(e) => match e {
                lightbox_core::Error::InvalidImageId(_) => "invalid_image_id",
                lightbox_core::Error::EmptyPayload => "empty_file",
                lightbox_core::Error::PayloadTooLarge { .. } => "payload_too_large",
                lightbox_core::Error::UnknownFormat
                | lightbox_core::Error::DisallowedFormat { .. } => "invalid_file_format",
            },
        }
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Busy(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Catalog(e) => match e {
                CatalogError::AlreadyExists(_) => StatusCode::CONFLICT,
                CatalogError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            },
            Self::Core(e) => match e {
                lightbox_core::Error::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
                _ => StatusCode::BAD_REQUEST,
            },
        }
    }

    fn reason(&self) -> Option<&'static str> {
        match self {
            Self::Busy(_) => Some(UPLOAD_CONCURRENCY_EXCEEDED),
            _ => None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() && !matches!(self, Self::Busy(_)) {
            tracing::error!(error = %self, "Request failed");
        }
        let body = ErrorResponse {
            code: self.code().to_string(),
            message: self.to_string(),
            reason: self.reason().map(str::to_string),
        };
        (status, Json(body)).into_response()
    }
}

/// Result type for API handlers.
pub type ApiResult<T> = std::result::Result<T, ApiError>;
