//! Metadata store contract.

use crate::models::{
    pagination::PageRequest,
    photo::{NewPhoto, Photo, PhotoId},
};
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MetadataError {
    /// A write (update/delete) matched no record.
    #[error("photo `{0}` not found")]
    NotFound(PhotoId),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

pub type MetadataResult<T> = Result<T, MetadataError>;

/// CRUD over photo records, keyed by a store-assigned `PhotoId`.
///
/// Reads report absence as `None`. Writes that match nothing report
/// `MetadataError::NotFound`.
#[async_trait]
pub trait PhotoRepository: Send + Sync {
    /// Persist a new record and return it with its assigned id.
    async fn create(&self, photo: NewPhoto) -> MetadataResult<Photo>;

    async fn get(&self, id: PhotoId) -> MetadataResult<Option<Photo>>;

    /// Replace the whole record with the same id.
    async fn update(&self, photo: &Photo) -> MetadataResult<()>;

    async fn delete(&self, id: PhotoId) -> MetadataResult<()>;

    /// One page of records, most recently uploaded first.
    async fn list(&self, page: PageRequest) -> MetadataResult<Vec<Photo>>;

    async fn count(&self) -> MetadataResult<u64>;

    /// Cheap connectivity check used by readiness probes.
    async fn ping(&self) -> MetadataResult<()>;
}
