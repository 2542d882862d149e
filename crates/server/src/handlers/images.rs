//! Image upload, retrieval and deletion handlers.

use crate::cache::CacheOutcome;
use crate::error::{ApiError, ApiResult};
use crate::metrics::{BYTES_UPLOADED, IMAGES_UPLOADED};
use crate::ratelimit::{ClientIp, UNKNOWN_CLIENT};
use crate::state::AppState;
use crate::trace::get_trace_id;
use axum::Json;
use axum::body::Body;
use axum::extract::{Path, Query, Request, State};
use axum::http::header::{CACHE_CONTROL, CONTENT_LENGTH, CONTENT_TYPE};
use axum::http::{HeaderMap, HeaderName, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use lightbox_core::{
    ImageFormat, ImageId, ImageMetadata, ImageRecord, hash_delete_token, validate_payload,
};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// Response header reporting how a metadata read was served.
pub const X_CACHE: HeaderName = HeaderName::from_static("x-cache");

/// Request header carrying the token handed out at upload time.
pub const X_DELETE_TOKEN: &str = "x-delete-token";

/// Maximum stored filename length in characters.
const MAX_FILENAME_LEN: usize = 255;

/// Query parameters for an upload.
#[derive(Debug, Default, Deserialize)]
pub struct UploadParams {
    /// Original filename. Only the final path component is kept.
    pub filename: Option<String>,
}

/// Upload response.
#[derive(Debug, Serialize)]
pub struct UploadResponse {
    #[serde(flatten)]
    pub metadata: ImageMetadata,
    /// Path the image bytes are served from.
    pub url: String,
    /// Secret required to delete the image. Shown once.
    pub delete_token: String,
}

/// POST /v1/images - Upload an image.
///
/// The body is the raw image. An admission permit is taken before the body is
/// read and held until the response is ready.
#[tracing::instrument(skip(state, req), fields(image_id))]
pub async fn upload_image(
    State(state): State<AppState>,
    Query(params): Query<UploadParams>,
    req: Request,
) -> ApiResult<(StatusCode, Json<UploadResponse>)> {
    let trace_id = get_trace_id(&req).cloned().unwrap_or_default();
    let client_ip = req
        .extensions()
        .get::<ClientIp>()
        .map(|ip| ip.0.clone())
        .unwrap_or_else(|| UNKNOWN_CLIENT.to_string());
    let max = state.config.server.max_upload_bytes;

    // Reject declared-oversized bodies before queueing for a slot.
    if let Some(declared) = declared_content_length(req.headers())
        && declared > max
    {
        return Err(ApiError::PayloadTooLarge {
            size: declared,
            max,
        });
    }

    let permit = state.admission.acquire_default().await.inspect_err(|e| {
        tracing::debug!(trace_id = %trace_id, error = %e, "Upload not admitted");
    })?;

    let data = read_bounded(req.into_body(), max).await?;
    let format = validate_payload(&data, max, &state.config.server.allowed_content_types)?;
    let (width, height) = match format.dimensions(&data) {
        Some((w, h)) => (Some(w), Some(h)),
        None => (None, None),
    };

    let id = ImageId::new();
    tracing::Span::current().record("image_id", tracing::field::display(id));

    let delete_token = generate_delete_token();
    let metadata = ImageMetadata {
        id,
        filename: sanitize_filename(params.filename.as_deref(), format),
        content_type: format.mime_type().to_string(),
        file_size: data.len() as u64,
        width,
        height,
        created_at: OffsetDateTime::now_utc(),
    };
    let record = ImageRecord {
        metadata: metadata.clone(),
        upload_ip: client_ip,
        delete_token_hash: hash_delete_token(&delete_token),
    };

    let size = data.len() as u64;
    state.catalog.insert(record, data).await?;
    // Every catalog write is followed by an invalidation before responding.
    state.cache.invalidate(&id).await;

    IMAGES_UPLOADED.inc();
    BYTES_UPLOADED.inc_by(size);
    tracing::info!(
        trace_id = %trace_id,
        size = size,
        content_type = %metadata.content_type,
        "Image uploaded"
    );

    let response = UploadResponse {
        url: format!("/v1/images/{id}/file"),
        metadata,
        delete_token,
    };
    permit.release();

    Ok((StatusCode::CREATED, Json(response)))
}

/// GET /v1/images/{id} - Image metadata, served cache-aside.
pub async fn get_image(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let id: ImageId = id.parse()?;

    let (cached, outcome) = state.cache.lookup(&id).await;
    if let Some(metadata) = cached {
        return Ok(with_cache_header(Json(metadata), outcome));
    }

    // Not-found is returned without touching the cache.
    let record = state
        .catalog
        .get(&id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("image not found: {id}")))?;

    state.cache.set(&id, &record.metadata, None).await;
    Ok(with_cache_header(Json(record.metadata), outcome))
}

/// GET /v1/images/{id}/file - Image bytes.
pub async fn get_image_file(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let id: ImageId = id.parse()?;

    let content_type = match state.cache.get(&id).await {
        Some(metadata) => metadata.content_type,
        None => {
            state
                .catalog
                .get(&id)
                .await?
                .ok_or_else(|| ApiError::NotFound(format!("image not found: {id}")))?
                .metadata
                .content_type
        }
    };

    let data = state
        .catalog
        .read_file(&id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("image not found: {id}")))?;

    Ok((
        StatusCode::OK,
        [
            (CONTENT_TYPE, content_type),
            (CONTENT_LENGTH, data.len().to_string()),
            (CACHE_CONTROL, "public, max-age=31536000, immutable".to_string()),
        ],
        Body::from(data),
    )
        .into_response())
}

/// DELETE /v1/images/{id} - Delete an image.
///
/// Requires the `X-Delete-Token` issued at upload. The cache entry is
/// invalidated before the response is sent.
pub async fn delete_image(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> ApiResult<StatusCode> {
    let id: ImageId = id.parse()?;

    let token = headers
        .get(X_DELETE_TOKEN)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ApiError::Forbidden("delete token is required".to_string()))?;

    // Authorise against the catalog, never the cache.
    let record = state
        .catalog
        .get(&id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("image not found: {id}")))?;

    if hash_delete_token(token) != record.delete_token_hash {
        return Err(ApiError::Forbidden("invalid delete token".to_string()));
    }

    let deleted = state.catalog.delete(&id).await?;
    // Invalidate even if a concurrent delete won; the entry must be gone either way.
    state.cache.invalidate(&id).await;

    if !deleted {
        return Err(ApiError::NotFound(format!("image not found: {id}")));
    }

    tracing::info!(image_id = %id, "Image deleted");
    Ok(StatusCode::NO_CONTENT)
}

fn with_cache_header(body: impl IntoResponse, outcome: CacheOutcome) -> Response {
    ([(X_CACHE, outcome.as_header_value())], body).into_response()
}

fn declared_content_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

/// Read the request body, failing as soon as it exceeds `max` bytes.
async fn read_bounded(body: Body, max: u64) -> ApiResult<Bytes> {
    let mut stream = body.into_data_stream();
    let mut buf = BytesMut::new();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| ApiError::BadRequest(format!("failed to read body: {e}")))?;
        let size = (buf.len() + chunk.len()) as u64;
        if size > max {
            return Err(ApiError::PayloadTooLarge { size, max });
        }
        buf.extend_from_slice(&chunk);
    }

    Ok(buf.freeze())
}

fn generate_delete_token() -> String {
    format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple())
}

/// Keep only the final path component and bound its length. Falls back to
/// `image.<ext>` when nothing usable remains.
fn sanitize_filename(filename: Option<&str>, format: ImageFormat) -> String {
    let name: String = filename
        .and_then(|f| f.rsplit(['/', '\\']).next())
        .unwrap_or("")
        .chars()
        .filter(|c| !c.is_control())
        .take(MAX_FILENAME_LEN)
        .collect();
    let name = name.trim();

    if name.is_empty() || name == "." || name == ".." {
        let ext = match format {
            ImageFormat::Jpeg => "jpg",
            ImageFormat::Png => "png",
        };
        format!("image.{ext}")
    } else {
        name.to_string()
    }
}
