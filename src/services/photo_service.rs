//! src/services/photo_service.rs
//!
//! PhotoService: keeps a blob in the blob store and its record in the
//! metadata store in agreement. Uploads write the blob first and compensate
//! with a blob delete when the record insert fails. Deletes remove the blob
//! first and only then the record, so a visible record always implies the
//! blob was not knowingly removed.
//!
//! Nothing is retried here. Every store failure is wrapped with the step that
//! produced it.

use crate::{
    models::{
        access::AccessUrl,
        pagination::PageRequest,
        photo::{NewPhoto, Photo, PhotoId, PhotoUpload},
    },
    repositories::{BlobError, BlobRepository, ByteStream, MetadataError, PhotoRepository},
};
use chrono::{DateTime, Utc};
use std::{fmt, sync::Arc, time::Duration};
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Validity window of issued access URLs.
pub const URL_EXPIRY: Duration = Duration::from_secs(15 * 60);

const KEY_PREFIX: &str = "photos";
const MAX_EXTENSION_LEN: usize = 10;

/// The store call a failure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    BlobWrite,
    MetadataWrite,
    BlobRead,
    MetadataRead,
    BlobDelete,
    MetadataDelete,
    UrlIssue,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Step::BlobWrite => "blob-write",
            Step::MetadataWrite => "metadata-write",
            Step::BlobRead => "blob-read",
            Step::MetadataRead => "metadata-read",
            Step::BlobDelete => "blob-delete",
            Step::MetadataDelete => "metadata-delete",
            Step::UrlIssue => "url-issue",
        })
    }
}

/// Terminal state of a two-store write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SagaOutcome {
    /// Both stores were updated.
    Committed,
    /// A later step failed and the earlier one was undone.
    Compensated,
    /// A later step failed and undoing the blob write also failed.
    Orphaned,
    /// The blob is gone but its record could not be removed.
    Dangling,
}

impl fmt::Display for SagaOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SagaOutcome::Committed => "committed",
            SagaOutcome::Compensated => "compensated",
            SagaOutcome::Orphaned => "orphaned",
            SagaOutcome::Dangling => "dangling",
        })
    }
}

#[derive(Debug, Error)]
pub enum PhotoError {
    #[error("photo `{0}` not found")]
    NotFound(PhotoId),
    #[error("{step} failed: {source}")]
    Blob { step: Step, source: BlobError },
    #[error("{step} failed: {source}")]
    Metadata { step: Step, source: MetadataError },
    #[error("metadata-write failed after blob-write, blob `{key}` {outcome}: {source}")]
    Upload {
        key: String,
        outcome: SagaOutcome,
        source: MetadataError,
    },
    #[error("metadata-delete failed after blob-delete, record `{id}` {outcome}: {source}")]
    Delete {
        id: PhotoId,
        outcome: SagaOutcome,
        source: MetadataError,
    },
}

impl PhotoError {
    /// True for unknown photo ids and for blobs missing under a live record.
    pub fn is_not_found(&self) -> bool {
        match self {
            PhotoError::NotFound(_) => true,
            PhotoError::Blob {
                step: Step::BlobRead,
                source,
            } => source.is_not_found(),
            _ => false,
        }
    }

    /// The step that failed, if a store call failed.
    pub fn step(&self) -> Option<Step> {
        match self {
            PhotoError::NotFound(_) => None,
            PhotoError::Blob { step, .. } | PhotoError::Metadata { step, .. } => Some(*step),
            PhotoError::Upload { .. } => Some(Step::MetadataWrite),
            PhotoError::Delete { .. } => Some(Step::MetadataDelete),
        }
    }

    /// How a partially applied write was left, for upload and delete failures
    /// that happened after the first store had already changed.
    pub fn outcome(&self) -> Option<SagaOutcome> {
        match self {
            PhotoError::Upload { outcome, .. } | PhotoError::Delete { outcome, .. } => {
                Some(*outcome)
            }
            _ => None,
        }
    }
}

pub type PhotoResult<T> = Result<T, PhotoError>;

/// A photo record together with an open stream of its bytes.
pub struct PhotoContent {
    pub photo: Photo,
    pub content: ByteStream,
}

impl fmt::Debug for PhotoContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PhotoContent")
            .field("photo", &self.photo)
            .finish_non_exhaustive()
    }
}

/// Orchestrates the metadata store and the blob store.
///
/// Holds no state beyond the two store handles, so clones can be shared
/// freely across requests.
#[derive(Clone)]
pub struct PhotoService {
    photos: Arc<dyn PhotoRepository>,
    blobs: Arc<dyn BlobRepository>,
}

impl PhotoService {
    pub fn new(photos: Arc<dyn PhotoRepository>, blobs: Arc<dyn BlobRepository>) -> Self {
        Self { photos, blobs }
    }

    /// Store the bytes, then the record. The record carries the byte count the
    /// blob store actually wrote. If the record insert fails the blob
    /// is deleted again; a failure of that cleanup is logged and reported as
    /// `SagaOutcome::Orphaned`, never in place of the insert error.
    pub async fn upload(&self, upload: PhotoUpload, content: ByteStream) -> PhotoResult<Photo> {
        let key = storage_key(Utc::now(), &upload.filename);

        let written = self
            .blobs
            .put(&key, content, &upload.content_type)
            .await
            .map_err(|source| PhotoError::Blob {
                step: Step::BlobWrite,
                source,
            })?;
        if written != upload.size {
            warn!(
                key = %key,
                declared = upload.size,
                written,
                "uploaded byte count differs from declared size"
            );
        }

        let now = Utc::now();
        let record = NewPhoto {
            name: upload.name,
            description: upload.description,
            size_bytes: i64::try_from(written).unwrap_or(i64::MAX),
            content_type: upload.content_type,
            storage_key: key.clone(),
            uploaded_at: now,
            updated_at: now,
        };

        match self.photos.create(record).await {
            Ok(photo) => {
                info!(
                    photo_id = %photo.id,
                    key = %photo.storage_key,
                    outcome = %SagaOutcome::Committed,
                    "photo uploaded"
                );
                Ok(photo)
            }
            Err(source) => {
                let outcome = self.compensate_upload(&key).await;
                error!(
                    key = %key,
                    outcome = %outcome,
                    error = %source,
                    "metadata-write failed after blob-write"
                );
                Err(PhotoError::Upload {
                    key,
                    outcome,
                    source,
                })
            }
        }
    }

    async fn compensate_upload(&self, key: &str) -> SagaOutcome {
        match self.blobs.delete(key).await {
            Ok(()) => SagaOutcome::Compensated,
            Err(err) if err.is_not_found() => SagaOutcome::Compensated,
            Err(err) => {
                warn!(key, error = %err, "compensating blob-delete failed, blob orphaned");
                SagaOutcome::Orphaned
            }
        }
    }

    pub async fn get(&self, id: PhotoId) -> PhotoResult<Photo> {
        self.photos
            .get(id)
            .await
            .map_err(|source| PhotoError::Metadata {
                step: Step::MetadataRead,
                source,
            })?
            .ok_or(PhotoError::NotFound(id))
    }

    /// Resolve the record, then open its blob. A blob deleted between the two
    /// reads surfaces as a `blob-read` not-found error.
    pub async fn get_content(&self, id: PhotoId) -> PhotoResult<PhotoContent> {
        let photo = self.get(id).await?;
        let blob = self
            .blobs
            .get(&photo.storage_key)
            .await
            .map_err(|source| PhotoError::Blob {
                step: Step::BlobRead,
                source,
            })?;
        Ok(PhotoContent {
            photo,
            content: blob.content,
        })
    }

    /// Remove the blob, then the record.
    ///
    /// A failed blob delete leaves the record in place so the call can be
    /// retried. A blob that is already gone counts as deleted, which lets a
    /// retry clear a record left dangling by an earlier attempt.
    pub async fn delete(&self, id: PhotoId) -> PhotoResult<()> {
        let photo = self.get(id).await?;

        match self.blobs.delete(&photo.storage_key).await {
            Ok(()) => {}
            Err(err) if err.is_not_found() => {
                debug!(photo_id = %id, key = %photo.storage_key, "blob already absent");
            }
            Err(source) => {
                return Err(PhotoError::Blob {
                    step: Step::BlobDelete,
                    source,
                });
            }
        }

        match self.photos.delete(id).await {
            Ok(()) => {
                info!(photo_id = %id, key = %photo.storage_key, "photo deleted");
                Ok(())
            }
            Err(MetadataError::NotFound(_)) => Err(PhotoError::NotFound(id)),
            Err(source) => {
                error!(
                    photo_id = %id,
                    key = %photo.storage_key,
                    outcome = %SagaOutcome::Dangling,
                    error = %source,
                    "metadata-delete failed after blob-delete"
                );
                Err(PhotoError::Delete {
                    id,
                    outcome: SagaOutcome::Dangling,
                    source,
                })
            }
        }
    }

    /// One page of records, most recently uploaded first. `page` is 1-based.
    pub async fn list(&self, page: u32, limit: u32) -> PhotoResult<Vec<Photo>> {
        self.photos
            .list(PageRequest::new(page, limit))
            .await
            .map_err(|source| PhotoError::Metadata {
                step: Step::MetadataRead,
                source,
            })
    }

    pub async fn count(&self) -> PhotoResult<u64> {
        self.photos
            .count()
            .await
            .map_err(|source| PhotoError::Metadata {
                step: Step::MetadataRead,
                source,
            })
    }

    /// A read-only access URL valid for [`URL_EXPIRY`].
    pub async fn url_for(&self, id: PhotoId) -> PhotoResult<AccessUrl> {
        let photo = self.get(id).await?;
        self.blobs
            .url_for(&photo.storage_key, URL_EXPIRY)
            .await
            .map_err(|source| PhotoError::Blob {
                step: Step::UrlIssue,
                source,
            })
    }

    pub async fn check_metadata(&self) -> Result<(), MetadataError> {
        self.photos.ping().await
    }

    pub async fn check_blobs(&self) -> Result<(), BlobError> {
        self.blobs.ping().await
    }
}

/// Build a fresh storage key: `photos/YYYY/MM/DD/<random token><.ext>`.
///
/// The token is a new v4 UUID, so identical files uploaded in the same
/// instant still get distinct keys.
pub fn storage_key(now: DateTime<Utc>, filename: &str) -> String {
    format!(
        "{}/{}/{}{}",
        KEY_PREFIX,
        now.format("%Y/%m/%d"),
        Uuid::new_v4().simple(),
        key_extension(filename)
    )
}

/// Lowercased extension of the file name's last component, with its dot.
/// Anything that is not a short alphanumeric extension is dropped.
fn key_extension(filename: &str) -> String {
    let base = filename.rsplit(['/', '\\']).next().unwrap_or(filename);
    match base.rsplit_once('.') {
        Some((_, ext))
            if !ext.is_empty()
                && ext.len() <= MAX_EXTENSION_LEN
                && ext.bytes().all(|b| b.is_ascii_alphanumeric()) =>
        {
            format!(".{}", ext.to_ascii_lowercase())
        }
        _ => String::new(),
    }
}
