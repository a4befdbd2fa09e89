//! Represents a photo's metadata record. The bytes themselves live in the
//! blob store under `storage_key`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::{fmt, str::FromStr};
use uuid::Uuid;

/// Opaque photo identifier, assigned by the metadata store on insert.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, sqlx::Type)]
#[serde(transparent)]
#[sqlx(transparent)]
pub struct PhotoId(Uuid);

impl PhotoId {
    /// Mint a fresh identifier. Only metadata stores should call this.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for PhotoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl FromStr for PhotoId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// A persisted photo record.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug, PartialEq)]
pub struct Photo {
    /// Store-assigned identifier; immutable once assigned.
    pub id: PhotoId,

    /// Display name (non-empty).
    pub name: String,

    /// Optional free-form description.
    pub description: Option<String>,

    /// Size in bytes.
    pub size_bytes: i64,

    /// Content type (MIME type) declared at upload.
    pub content_type: String,

    /// Blob-store address of the photo bytes. Generated once at upload.
    pub storage_key: String,

    /// When the photo was uploaded.
    pub uploaded_at: DateTime<Utc>,

    /// When the record was last replaced.
    pub updated_at: DateTime<Utc>,
}

/// A photo record that has not been inserted yet and therefore has no id.
#[derive(Clone, Debug, PartialEq)]
pub struct NewPhoto {
    pub name: String,
    pub description: Option<String>,
    pub size_bytes: i64,
    pub content_type: String,
    pub storage_key: String,
    pub uploaded_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl NewPhoto {
    /// Attach the identifier the store assigned.
    pub fn with_id(self, id: PhotoId) -> Photo {
        Photo {
            id,
            name: self.name,
            description: self.description,
            size_bytes: self.size_bytes,
            content_type: self.content_type,
            storage_key: self.storage_key,
            uploaded_at: self.uploaded_at,
            updated_at: self.updated_at,
        }
    }
}

/// Descriptive fields accompanying an upload. The transport layer validates
/// these before handing them to the photo service.
#[derive(Clone, Debug)]
pub struct PhotoUpload {
    pub name: String,
    pub description: Option<String>,
    /// Original file name; only its extension is used.
    pub filename: String,
    pub content_type: String,
    pub size: u64,
}
