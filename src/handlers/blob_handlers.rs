//! Serves blobs to holders of a signed access URL.

use crate::{errors::AppError, repositories::BlobRepository, state::AppState};
use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{HeaderValue, StatusCode, header},
    response::Response,
};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct SignedUrlQuery {
    pub expires: i64,
    pub signature: String,
}

/// `GET /blobs/{*key}?expires=&signature=`
///
/// Served with the content type the blob was stored under. Rejected with
/// 403 once the URL has expired or if it was tampered with.
pub async fn get_signed_blob(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Query(q): Query<SignedUrlQuery>,
) -> Result<Response, AppError> {
    state.blobs.verify_access(&key, q.expires, &q.signature)?;
    let blob = state.blobs.get(&key).await?;

    let content_type = HeaderValue::from_str(&blob.content_type)
        .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream"));
    let mut response = Response::new(Body::from_stream(blob.content));
    *response.status_mut() = StatusCode::OK;
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, content_type);
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("private, no-store"),
    );
    Ok(response)
}
