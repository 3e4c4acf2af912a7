use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::api::response::{ApiError, AppQuery, JSend};
use crate::blob_store::{Blob, BlobId, BlobStore, Headers};
use crate::AppState;

/// Request headers with this prefix are stored as blob headers (prefix stripped).
const BLOB_HEADER_PREFIX: &str = "x-blob-";
const CONTENT_TYPE_HEADER: &str = "content-type";

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct BlobResponse {
    pub created_at: String,
    pub deleted: bool,
    pub headers: Headers,
    pub id: String,
    pub size: u64,
}

#[derive(Debug, Serialize)]
pub struct ExistsResponse {
    pub exists: bool,
}

#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub deleted: bool,
}

#[derive(Debug, Serialize)]
pub struct UndeleteResponse {
    pub undeleted: bool,
}

#[derive(Debug, Deserialize)]
pub struct GetBlobParams {
    #[serde(default)]
    pub include_deleted: bool,
}

#[derive(Debug, Deserialize)]
pub struct DeleteBlobParams {
    #[serde(default)]
    pub hard: bool,
    #[serde(default = "default_reason")]
    pub reason: String,
}

fn default_reason() -> String {
    "deleted via api".to_string()
}

// ============================================================================
// Handlers
// ============================================================================

pub async fn create_blob(
    State(state): State<Arc<AppState>>,
    request_headers: HeaderMap,
    body: Bytes,
) -> Result<Json<JSend<BlobResponse>>, ApiError> {
    if body.len() as u64 > state.config.max_upload_size {
        return Err(ApiError::payload_too_large(format!(
            "Blob exceeds maximum upload size of {} bytes",
            state.config.max_upload_size
        )));
    }

    let headers = blob_headers(&request_headers);
    let blob = state.group.create(body, headers, None).await?;

    tracing::debug!(blob_id = %blob.id, size = blob.size(), "Stored blob");
    Ok(JSend::success(blob_to_response(&blob)))
}

pub async fn get_blob(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    AppQuery(params): AppQuery<GetBlobParams>,
) -> Result<Response, ApiError> {
    let blob = state
        .group
        .get(&BlobId::from(id), params.include_deleted)
        .await?
        .ok_or_else(|| ApiError::not_found("Blob not found"))?;

    let mut response = (StatusCode::OK, blob.data.clone()).into_response();
    let headers = response.headers_mut();

    let content_type = blob
        .headers
        .get(CONTENT_TYPE_HEADER)
        .and_then(|ct| ct.parse().ok())
        .unwrap_or(HeaderValue::from_static("application/octet-stream"));
    headers.insert(header::CONTENT_TYPE, content_type);
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(blob.size()));

    for (key, value) in &blob.headers {
        if key == CONTENT_TYPE_HEADER {
            continue;
        }
        let name = HeaderName::try_from(format!("{BLOB_HEADER_PREFIX}{key}"));
        if let (Ok(name), Ok(value)) = (name, HeaderValue::from_str(value)) {
            headers.insert(name, value);
        }
    }

    // Blob content is immutable once written.
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("public, max-age=3600"),
    );

    Ok(response)
}

pub async fn blob_exists(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<JSend<ExistsResponse>>, ApiError> {
    let exists = state.group.exists(&BlobId::from(id)).await?;
    Ok(JSend::success(ExistsResponse { exists }))
}

pub async fn copy_blob(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    request_headers: HeaderMap,
) -> Result<Json<JSend<BlobResponse>>, ApiError> {
    let source = BlobId::from(id);
    let blob = state
        .group
        .copy(&source, blob_headers(&request_headers))
        .await?;

    tracing::debug!(source = %source, blob_id = %blob.id, "Copied blob");
    Ok(JSend::success(blob_to_response(&blob)))
}

pub async fn delete_blob(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    AppQuery(params): AppQuery<DeleteBlobParams>,
) -> Result<Json<JSend<DeleteResponse>>, ApiError> {
    let id = BlobId::from(id);
    let deleted = if params.hard {
        state.group.delete_hard(&id).await?
    } else {
        state.group.delete(&id, &params.reason).await?
    };

    if !deleted {
        tracing::warn!(blob_id = %id, hard = params.hard, "Blob was not deleted from every member");
    }
    Ok(JSend::success(DeleteResponse { deleted }))
}

pub async fn undelete_blob(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<JSend<UndeleteResponse>>, ApiError> {
    let undeleted = state.group.undelete(None, &BlobId::from(id)).await?;
    Ok(JSend::success(UndeleteResponse { undeleted }))
}

// ============================================================================
// Helpers
// ============================================================================

fn blob_headers(request_headers: &HeaderMap) -> Headers {
    let mut headers = Headers::new();
    for (name, value) in request_headers {
        let Ok(value) = value.to_str() else {
            continue;
        };
        let name = name.as_str();
        if name == CONTENT_TYPE_HEADER {
            headers.insert(CONTENT_TYPE_HEADER.to_string(), value.to_string());
        } else if let Some(key) = name.strip_prefix(BLOB_HEADER_PREFIX) {
            headers.insert(key.to_string(), value.to_string());
        }
    }
    headers
}

fn blob_to_response(blob: &Blob) -> BlobResponse {
    BlobResponse {
        created_at: blob.created_at.to_rfc3339(),
        deleted: blob.deleted,
        headers: blob.headers.clone(),
        id: blob.id.to_string(),
        size: blob.size(),
    }
}
