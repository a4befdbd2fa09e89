//! Shared state handed to every handler.

use crate::{repositories::FsBlobRepository, services::photo_service::PhotoService};
use std::{path::PathBuf, sync::Arc};

#[derive(Clone)]
pub struct AppState {
    pub photos: PhotoService,
    /// Concrete blob store, needed to verify and serve signed access URLs.
    pub blobs: Arc<FsBlobRepository>,
    /// Largest accepted upload, in bytes.
    pub max_upload_size: u64,
    /// Directory incoming uploads are spooled to before being stored.
    pub spool_dir: PathBuf,
}
