//! Shared fixtures: real stores (in-memory SQLite, temp-dir blobs) wrapped in
//! decorators that can be told to fail individual operations.

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use futures::{StreamExt, TryStreamExt, stream};
use photo_store::{
    models::{
        access::AccessUrl,
        pagination::PageRequest,
        photo::{NewPhoto, Photo, PhotoId, PhotoUpload},
    },
    repositories::{
        BlobError, BlobRepository, BlobResult, ByteStream, FsBlobRepository, MetadataError,
        MetadataResult, PhotoRepository, SqlitePhotoRepository, StoredBlob,
    },
    services::photo_service::PhotoService,
};
use std::{
    io,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};
use tempfile::TempDir;

pub const SIGNING_SECRET: &[u8] = b"test-signing-secret";

/// Metadata store that fails selected operations on demand.
pub struct FlakyPhotos {
    inner: SqlitePhotoRepository,
    pub fail_create: AtomicBool,
    pub fail_delete: AtomicBool,
    pub fail_get: AtomicBool,
}

fn db_down() -> MetadataError {
    MetadataError::Sqlx(sqlx::Error::PoolTimedOut)
}

#[async_trait]
impl PhotoRepository for FlakyPhotos {
    async fn create(&self, photo: NewPhoto) -> MetadataResult<Photo> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(db_down());
        }
        self.inner.create(photo).await
    }

    async fn get(&self, id: PhotoId) -> MetadataResult<Option<Photo>> {
        if self.fail_get.load(Ordering::SeqCst) {
            return Err(db_down());
        }
        self.inner.get(id).await
    }

    async fn update(&self, photo: &Photo) -> MetadataResult<()> {
        self.inner.update(photo).await
    }

    async fn delete(&self, id: PhotoId) -> MetadataResult<()> {
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(db_down());
        }
        self.inner.delete(id).await
    }

    async fn list(&self, page: PageRequest) -> MetadataResult<Vec<Photo>> {
        self.inner.list(page).await
    }

    async fn count(&self) -> MetadataResult<u64> {
        self.inner.count().await
    }

    async fn ping(&self) -> MetadataResult<()> {
        self.inner.ping().await
    }
}

/// Blob store that fails selected operations on demand.
pub struct FlakyBlobs {
    pub inner: FsBlobRepository,
    pub fail_put: AtomicBool,
    pub fail_get: AtomicBool,
    pub fail_delete: AtomicBool,
    pub fail_url: AtomicBool,
}

fn disk_error() -> BlobError {
    BlobError::Io(io::Error::other("injected blob failure"))
}

#[async_trait]
impl BlobRepository for FlakyBlobs {
    async fn put(&self, key: &str, content: ByteStream, content_type: &str) -> BlobResult<u64> {
        if self.fail_put.load(Ordering::SeqCst) {
            return Err(disk_error());
        }
        self.inner.put(key, content, content_type).await
    }

    async fn get(&self, key: &str) -> BlobResult<StoredBlob> {
        if self.fail_get.load(Ordering::SeqCst) {
            return Err(disk_error());
        }
        self.inner.get(key).await
    }

    async fn delete(&self, key: &str) -> BlobResult<()> {
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(disk_error());
        }
        self.inner.delete(key).await
    }

    async fn url_for(&self, key: &str, expiry: Duration) -> BlobResult<AccessUrl> {
        if self.fail_url.load(Ordering::SeqCst) {
            return Err(disk_error());
        }
        self.inner.url_for(key, expiry).await
    }

    async fn ping(&self) -> BlobResult<()> {
        self.inner.ping().await
    }
}

pub struct Harness {
    pub service: PhotoService,
    pub photos: Arc<FlakyPhotos>,
    pub blobs: Arc<FlakyBlobs>,
    pub dir: TempDir,
}

pub async fn sqlite_memory() -> SqlitePhotoRepository {
    let repo = SqlitePhotoRepository::connect("sqlite::memory:", "test")
        .await
        .unwrap();
    repo.migrate().await.unwrap();
    repo
}

pub async fn fs_blobs(dir: &TempDir) -> FsBlobRepository {
    FsBlobRepository::new(dir.path(), "photos", "http://localhost:8080", SIGNING_SECRET)
        .await
        .unwrap()
}

pub async fn harness() -> Harness {
    let dir = TempDir::new().unwrap();
    let photos = Arc::new(FlakyPhotos {
        inner: sqlite_memory().await,
        fail_create: AtomicBool::new(false),
        fail_delete: AtomicBool::new(false),
        fail_get: AtomicBool::new(false),
    });
    let blobs = Arc::new(FlakyBlobs {
        inner: fs_blobs(&dir).await,
        fail_put: AtomicBool::new(false),
        fail_get: AtomicBool::new(false),
        fail_delete: AtomicBool::new(false),
        fail_url: AtomicBool::new(false),
    });
    let service = PhotoService::new(photos.clone(), blobs.clone());
    Harness {
        service,
        photos,
        blobs,
        dir,
    }
}

pub fn upload_of(name: &str, content: &[u8]) -> PhotoUpload {
    PhotoUpload {
        name: name.to_string(),
        description: None,
        filename: name.to_string(),
        content_type: "image/png".to_string(),
        size: content.len() as u64,
    }
}

/// Split `content` into a few chunks so writes exercise streaming.
pub fn stream_of(content: &[u8]) -> ByteStream {
    let chunks: Vec<io::Result<Bytes>> = content
        .chunks(7)
        .map(|c| Ok(Bytes::copy_from_slice(c)))
        .collect();
    stream::iter(chunks).boxed()
}

pub async fn collect(content: ByteStream) -> Vec<u8> {
    content
        .try_fold(Vec::new(), |mut acc, chunk| async move {
            acc.extend_from_slice(&chunk);
            Ok(acc)
        })
        .await
        .unwrap()
}
