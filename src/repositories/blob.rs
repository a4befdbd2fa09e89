//! Blob store contract.

use crate::models::access::AccessUrl;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use std::{fmt, io, time::Duration};
use thiserror::Error;

/// A stream of blob bytes. Dropping the stream closes the underlying reader.
pub type ByteStream = BoxStream<'static, io::Result<Bytes>>;

/// An open blob together with the content type it was stored under.
pub struct StoredBlob {
    pub content_type: String,
    pub content: ByteStream,
}

impl fmt::Debug for StoredBlob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoredBlob")
            .field("content_type", &self.content_type)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Error)]
pub enum BlobError {
    #[error("blob `{0}` not found")]
    NotFound(String),
    #[error("invalid blob key `{0}`")]
    InvalidKey(String),
    #[error("access url expired")]
    UrlExpired,
    #[error("access url signature mismatch")]
    InvalidSignature,
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl BlobError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, BlobError::NotFound(_))
    }
}

pub type BlobResult<T> = Result<T, BlobError>;

/// Byte storage addressed by string keys.
#[async_trait]
pub trait BlobRepository: Send + Sync {
    /// Store every byte of `content` under `key` along with its content type,
    /// returning the number of bytes written. Readers never observe a
    /// partially written blob.
    async fn put(&self, key: &str, content: ByteStream, content_type: &str) -> BlobResult<u64>;

    /// Open the blob for streaming reads.
    async fn get(&self, key: &str) -> BlobResult<StoredBlob>;

    /// Remove the blob. Missing keys report `BlobError::NotFound`.
    async fn delete(&self, key: &str) -> BlobResult<()>;

    /// Issue a read-only access URL valid for `expiry` from now.
    async fn url_for(&self, key: &str, expiry: Duration) -> BlobResult<AccessUrl>;

    /// Cheap health check used by readiness probes.
    async fn ping(&self) -> BlobResult<()>;
}
