//! HTTP handlers for photo operations.
//!
//! Uploads are spooled to a temporary file first so the declared size is
//! known and the bytes are never held in memory in full. Downloads stream
//! straight from the blob store.

use crate::{
    errors::{AppError, GENERIC_FAILURE},
    handlers::upload_validation::{ValidationError, validate_file, validate_size},
    models::{
        access::AccessUrl,
        photo::{Photo, PhotoId, PhotoUpload},
    },
    repositories::ByteStream,
    state::AppState,
};
use axum::{
    Json,
    body::Body,
    extract::{Multipart, Path, Query, State, multipart::Field},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::{io, path::Path as FsPath};
use tempfile::NamedTempFile;
use tokio::{fs::File, io::AsyncWriteExt};
use tokio_util::io::ReaderStream;
use tracing::{debug, error, warn};

const DEFAULT_PAGE_LIMIT: u32 = 20;
const MAX_PAGE_LIMIT: u32 = 100;

/// Query params accepted by the listing endpoint.
#[derive(Debug, Default, Deserialize)]
pub struct ListPhotosQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

impl ListPhotosQuery {
    /// Page defaults to 1; limit defaults to 20 and is clamped to 1..=100.
    pub fn resolve(&self) -> (u32, u32) {
        let page = self.page.unwrap_or(1).max(1);
        let limit = self
            .limit
            .unwrap_or(DEFAULT_PAGE_LIMIT)
            .clamp(1, MAX_PAGE_LIMIT);
        (page, limit)
    }
}

#[derive(Debug, Serialize)]
pub struct PhotoResponse {
    pub id: PhotoId,
    pub name: String,
    pub description: Option<String>,
    pub size: i64,
    pub content_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url_expires_at: Option<DateTime<Utc>>,
    pub uploaded_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PhotoResponse {
    fn new(photo: Photo, access: Option<AccessUrl>) -> Self {
        let (url, url_expires_at) = match access {
            Some(access) => (Some(access.url), Some(access.expires_at)),
            None => (None, None),
        };
        Self {
            id: photo.id,
            name: photo.name,
            description: photo.description,
            size: photo.size_bytes,
            content_type: photo.content_type,
            url,
            url_expires_at,
            uploaded_at: photo.uploaded_at,
            updated_at: photo.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PhotoListResponse {
    pub photos: Vec<PhotoResponse>,
    pub page: u32,
    pub limit: u32,
    pub total: u64,
}

/// An upload's file part, spooled to disk. The file is removed on drop.
struct SpooledFile {
    file: NamedTempFile,
    filename: String,
    content_type: String,
    size: u64,
}

impl SpooledFile {
    /// Reopen the spooled bytes from the start as a stream.
    fn open(&self) -> io::Result<ByteStream> {
        let reader = File::from_std(self.file.reopen()?);
        Ok(ReaderStream::new(reader).boxed())
    }
}

fn spool_failure(err: io::Error) -> AppError {
    error!(error = %err, "failed to spool upload");
    AppError::internal(GENERIC_FAILURE)
}

/// Copy a multipart file field into a temporary file under `dir`, enforcing
/// the size limit as bytes arrive.
async fn spool_field(
    field: &mut Field<'_>,
    dir: &FsPath,
    max_upload_size: u64,
) -> Result<(NamedTempFile, u64), AppError> {
    let spool = tempfile::Builder::new()
        .prefix(".upload-")
        .tempfile_in(dir)
        .map_err(spool_failure)?;
    let mut out = File::from_std(spool.reopen().map_err(spool_failure)?);

    let mut size: u64 = 0;
    while let Some(chunk) = field.chunk().await? {
        size += chunk.len() as u64;
        validate_size(size, max_upload_size)?;
        out.write_all(&chunk).await.map_err(spool_failure)?;
    }
    out.flush().await.map_err(spool_failure)?;

    Ok((spool, size))
}

/// `POST /api/v1/photos` (multipart: `file`, `name`, optional `description`).
pub async fn upload_photo(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    let mut name: Option<String> = None;
    let mut description: Option<String> = None;
    let mut spooled: Option<SpooledFile> = None;

    while let Some(mut field) = multipart.next_field().await? {
        let field_name = field.name().map(str::to_owned);
        match field_name.as_deref() {
            Some("name") => {
                if name.is_some() {
                    return Err(ValidationError::DuplicateField("name").into());
                }
                name = Some(field.text().await?);
            }
            Some("description") => description = Some(field.text().await?),
            Some("file") => {
                if spooled.is_some() {
                    return Err(ValidationError::DuplicateField("file").into());
                }
                let filename = field.file_name().unwrap_or_default().to_string();
                let content_type = validate_file(field.content_type(), &filename)?;
                let (file, size) =
                    spool_field(&mut field, &state.spool_dir, state.max_upload_size).await?;
                spooled = Some(SpooledFile {
                    file,
                    filename,
                    content_type,
                    size,
                });
            }
            other => debug!("ignoring multipart field {:?}", other),
        }
    }

    let name = name
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .ok_or(ValidationError::MissingField("name"))?;
    let description = description
        .map(|d| d.trim().to_string())
        .filter(|d| !d.is_empty());
    let spooled = spooled.ok_or(ValidationError::MissingField("file"))?;

    let content = spooled.open().map_err(spool_failure)?;
    let photo = state
        .photos
        .upload(
            PhotoUpload {
                name,
                description,
                filename: spooled.filename.clone(),
                content_type: spooled.content_type.clone(),
                size: spooled.size,
            },
            content,
        )
        .await?;
    drop(spooled);

    // Committed; a URL failure only drops the link from the response.
    let access = match state.photos.url_for(photo.id).await {
        Ok(access) => Some(access),
        Err(err) => {
            warn!(photo_id = %photo.id, error = %err, "photo stored but access url not issued");
            None
        }
    };
    Ok((StatusCode::CREATED, Json(PhotoResponse::new(photo, access))))
}

/// `GET /api/v1/photos?page=&limit=`, newest first.
pub async fn list_photos(
    State(state): State<AppState>,
    Query(q): Query<ListPhotosQuery>,
) -> Result<Json<PhotoListResponse>, AppError> {
    let (page, limit) = q.resolve();
    let photos = state.photos.list(page, limit).await?;
    let total = state.photos.count().await?;

    Ok(Json(PhotoListResponse {
        photos: photos
            .into_iter()
            .map(|p| PhotoResponse::new(p, None))
            .collect(),
        page,
        limit,
        total,
    }))
}

/// `GET /api/v1/photos/{id}`: record plus a fresh access URL.
pub async fn get_photo(
    State(state): State<AppState>,
    Path(id): Path<PhotoId>,
) -> Result<Json<PhotoResponse>, AppError> {
    let photo = state.photos.get(id).await?;
    let access = state.photos.url_for(id).await?;
    Ok(Json(PhotoResponse::new(photo, Some(access))))
}

/// `GET /api/v1/photos/{id}/content` as a streaming response.
pub async fn get_photo_content(
    State(state): State<AppState>,
    Path(id): Path<PhotoId>,
) -> Result<Response, AppError> {
    let content = state.photos.get_content(id).await?;
    let mut response = Response::new(Body::from_stream(content.content));
    *response.status_mut() = StatusCode::OK;
    set_photo_headers(response.headers_mut(), &content.photo);
    Ok(response)
}

/// `GET /api/v1/photos/{id}/url`
pub async fn get_photo_url(
    State(state): State<AppState>,
    Path(id): Path<PhotoId>,
) -> Result<Json<AccessUrl>, AppError> {
    Ok(Json(state.photos.url_for(id).await?))
}

/// `DELETE /api/v1/photos/{id}`
pub async fn delete_photo(
    State(state): State<AppState>,
    Path(id): Path<PhotoId>,
) -> Result<StatusCode, AppError> {
    state.photos.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

fn set_photo_headers(headers: &mut HeaderMap, photo: &Photo) {
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&photo.content_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );

    headers.insert(
        header::CONTENT_LENGTH,
        HeaderValue::from(photo.size_bytes.max(0) as u64),
    );

    let last_modified = photo
        .updated_at
        .format("%a, %d %b %Y %H:%M:%S GMT")
        .to_string();
    if let Ok(value) = HeaderValue::from_str(&last_modified) {
        headers.insert(header::LAST_MODIFIED, value);
    }
}
