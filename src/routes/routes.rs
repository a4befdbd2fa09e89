//! Defines routes for photo operations and signed blob access.
//!
//! ## Structure
//! - **Photo endpoints** (`/api/v1/photos`)
//!   - `POST   /api/v1/photos`              : upload (multipart)
//!   - `GET    /api/v1/photos`              : list (`?page=&limit=`)
//!   - `GET    /api/v1/photos/{id}`         : record plus access URL
//!   - `GET    /api/v1/photos/{id}/content` : stream bytes
//!   - `GET    /api/v1/photos/{id}/url`     : fresh access URL
//!   - `DELETE /api/v1/photos/{id}`         : delete blob and record
//!
//! - **Blob endpoint**
//!   - `GET    /blobs/{*key}?expires=&signature=` : signed, time-boxed read
//!
//! The wildcard `*key` allows nested keys like `photos/2025/01/02/abc.png`.

use crate::{
    handlers::{
        blob_handlers::get_signed_blob,
        health_handlers::{healthz, readyz},
        photo_handlers::{
            delete_photo, get_photo, get_photo_content, get_photo_url, list_photos, upload_photo,
        },
    },
    state::AppState,
};
use axum::{Router, extract::DefaultBodyLimit, routing::get};

/// Room for multipart boundaries and the text fields around the file part.
const MULTIPART_OVERHEAD: u64 = 64 * 1024;

/// Build the router. The request body limit follows the state's upload limit.
pub fn routes(state: AppState) -> Router {
    let body_limit =
        usize::try_from(state.max_upload_size.saturating_add(MULTIPART_OVERHEAD)).unwrap_or(usize::MAX);

    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // Photo routes
        .route(
            "/api/v1/photos",
            get(list_photos)
                .post(upload_photo)
                .layer(DefaultBodyLimit::max(body_limit)),
        )
        .route("/api/v1/photos/{id}", get(get_photo).delete(delete_photo))
        .route("/api/v1/photos/{id}/content", get(get_photo_content))
        .route("/api/v1/photos/{id}/url", get(get_photo_url))
        // Signed blob access
        .route("/blobs/{*key}", get(get_signed_blob))
        .with_state(state)
}
