//! Store contracts the photo service is written against, plus the backends
//! the binary wires up: SQLite for metadata and the local disk for blobs.

pub mod blob;
pub mod filesystem;
pub mod metadata;
pub mod sqlite;

pub use blob::{BlobError, BlobRepository, BlobResult, ByteStream, StoredBlob};
pub use filesystem::FsBlobRepository;
pub use metadata::{MetadataError, MetadataResult, PhotoRepository};
pub use sqlite::SqlitePhotoRepository;
