//! Time-boxed, read-only access descriptors for a single blob.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// A signed URL granting read access to one blob until `expires_at`.
#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct AccessUrl {
    pub url: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}
