//! SQLite-backed metadata store.

use super::metadata::{MetadataError, MetadataResult, PhotoRepository};
use crate::models::{
    pagination::PageRequest,
    photo::{NewPhoto, Photo, PhotoId},
};
use async_trait::async_trait;
use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};
use std::{path::PathBuf, str::FromStr, sync::Arc};
use tracing::debug;

const MIGRATION: &str = include_str!("../../migrations/0001_init.sql");
const MEMORY_URL: &str = "sqlite::memory:";

const PHOTO_COLUMNS: &str =
    "id, name, description, size_bytes, content_type, storage_key, uploaded_at, updated_at";

#[derive(Clone)]
pub struct SqlitePhotoRepository {
    /// Shared SQLite connection pool.
    pub db: Arc<SqlitePool>,
}

impl SqlitePhotoRepository {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// Open the database `database_name` under the connection target
    /// `database_url`.
    ///
    /// `database_url` is either `sqlite://<directory>` (the database file is
    /// `<directory>/<database_name>.db`, created if missing) or
    /// `sqlite::memory:` for a private in-memory database.
    pub async fn connect(database_url: &str, database_name: &str) -> MetadataResult<Self> {
        if database_url.starts_with(MEMORY_URL) {
            let opts = SqliteConnectOptions::from_str(MEMORY_URL)?;
            // Every in-memory connection is its own database, so keep exactly one alive.
            let pool = SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(opts)
                .await?;
            return Ok(Self::new(Arc::new(pool)));
        }

        let dir = PathBuf::from(
            database_url
                .trim_start_matches("sqlite://")
                .trim_start_matches("sqlite:"),
        );
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(sqlx::Error::Io)?;
        let path = dir.join(format!("{database_name}.db"));
        debug!("opening metadata database at {}", path.display());

        let opts = SqliteConnectOptions::new()
            .filename(&path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(opts)
            .await?;
        Ok(Self::new(Arc::new(pool)))
    }

    /// Apply the embedded schema. Safe to run repeatedly.
    pub async fn migrate(&self) -> MetadataResult<()> {
        let statements = MIGRATION
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();

        debug!("running {} migration statements", statements.len());
        for stmt in statements {
            sqlx::query(stmt).execute(&*self.db).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl PhotoRepository for SqlitePhotoRepository {
    async fn create(&self, photo: NewPhoto) -> MetadataResult<Photo> {
        let id = PhotoId::generate();
        sqlx::query(
            "INSERT INTO photos (id, name, description, size_bytes, content_type,
                                 storage_key, uploaded_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(id)
        .bind(&photo.name)
        .bind(&photo.description)
        .bind(photo.size_bytes)
        .bind(&photo.content_type)
        .bind(&photo.storage_key)
        .bind(photo.uploaded_at)
        .bind(photo.updated_at)
        .execute(&*self.db)
        .await?;

        Ok(photo.with_id(id))
    }

    async fn get(&self, id: PhotoId) -> MetadataResult<Option<Photo>> {
        let photo = sqlx::query_as::<_, Photo>(&format!(
            "SELECT {PHOTO_COLUMNS} FROM photos WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&*self.db)
        .await?;
        Ok(photo)
    }

    async fn update(&self, photo: &Photo) -> MetadataResult<()> {
        let result = sqlx::query(
            "UPDATE photos SET name = ?, description = ?, size_bytes = ?, content_type = ?,
                               storage_key = ?, uploaded_at = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(&photo.name)
        .bind(&photo.description)
        .bind(photo.size_bytes)
        .bind(&photo.content_type)
        .bind(&photo.storage_key)
        .bind(photo.uploaded_at)
        .bind(photo.updated_at)
        .bind(photo.id)
        .execute(&*self.db)
        .await?;

        if result.rows_affected() == 0 {
            return Err(MetadataError::NotFound(photo.id));
        }
        Ok(())
    }

    async fn delete(&self, id: PhotoId) -> MetadataResult<()> {
        let result = sqlx::query("DELETE FROM photos WHERE id = ?")
            .bind(id)
            .execute(&*self.db)
            .await?;

        if result.rows_affected() == 0 {
            return Err(MetadataError::NotFound(id));
        }
        Ok(())
    }

    async fn list(&self, page: PageRequest) -> MetadataResult<Vec<Photo>> {
        let offset = i64::try_from(page.offset()).unwrap_or(i64::MAX);
        let photos = sqlx::query_as::<_, Photo>(&format!(
            "SELECT {PHOTO_COLUMNS} FROM photos
             ORDER BY uploaded_at DESC, rowid DESC
             LIMIT ? OFFSET ?"
        ))
        .bind(i64::from(page.limit))
        .bind(offset)
        .fetch_all(&*self.db)
        .await?;
        Ok(photos)
    }

    async fn count(&self) -> MetadataResult<u64> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM photos")
            .fetch_one(&*self.db)
            .await?;
        Ok(u64::try_from(count).unwrap_or_default())
    }

    async fn ping(&self) -> MetadataResult<()> {
        sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&*self.db)
            .await?;
        Ok(())
    }
}
