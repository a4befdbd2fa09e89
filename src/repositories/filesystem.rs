//! Local-disk blob store.
//!
//! Blobs live at `{storage_dir}/{bucket}/{key}`, with the content type in a
//! JSON sidecar at `{key}.meta`. Writes go to temporary files beside the
//! target and are renamed into place once fsynced, so a reader sees either
//! the whole blob or nothing. Access URLs are signed with HMAC-SHA256 and
//! served by the `/blobs/{*key}` route.

use super::blob::{BlobError, BlobRepository, BlobResult, ByteStream, StoredBlob};
use crate::models::access::AccessUrl;
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, SubsecRound, TimeDelta, Utc};
use futures::{StreamExt, TryStreamExt};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    time::Duration,
};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tokio_util::io::ReaderStream;
use tracing::debug;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

const MAX_KEY_LEN: usize = 1024;
const META_SUFFIX: &str = ".meta";
const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";
/// Bound on recreating a shard directory that a concurrent delete pruned.
const MAX_CREATE_ATTEMPTS: usize = 5;

/// Sidecar stored next to every blob.
#[derive(Debug, Serialize, Deserialize)]
struct BlobMeta {
    content_type: String,
}

#[derive(Clone)]
pub struct FsBlobRepository {
    /// Directory holding this bucket's blobs.
    root: PathBuf,
    /// Base the `/blobs/{key}` route is reachable at, without trailing slash.
    public_base_url: String,
    signer: HmacSha256,
}

impl FsBlobRepository {
    /// Open (creating if needed) the bucket directory `storage_dir/bucket`.
    pub async fn new(
        storage_dir: impl AsRef<Path>,
        bucket: &str,
        public_base_url: &str,
        signing_secret: &[u8],
    ) -> BlobResult<Self> {
        ensure_key_safe(bucket)?;
        if bucket.contains('/') {
            return Err(BlobError::InvalidKey(bucket.to_string()));
        }
        let root = storage_dir.as_ref().join(bucket);
        fs::create_dir_all(&root).await?;

        let signer = HmacSha256::new_from_slice(signing_secret)
            .map_err(|err| io::Error::new(ErrorKind::InvalidInput, err.to_string()))?;

        Ok(Self {
            root,
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
            signer,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn blob_path(&self, key: &str) -> BlobResult<PathBuf> {
        ensure_key_safe(key)?;
        // Dot-files are temporaries and `.meta` names are sidecars.
        let file_name = key.rsplit('/').next().unwrap_or(key);
        if file_name.is_empty() || file_name.starts_with('.') || file_name.ends_with(META_SUFFIX) {
            return Err(BlobError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(key))
    }

    fn signature(&self, key: &str, expires: i64) -> HmacSha256 {
        let mut mac = self.signer.clone();
        mac.update(key.as_bytes());
        mac.update(b"\n");
        mac.update(expires.to_string().as_bytes());
        mac
    }

    /// Check a signed access URL's parameters against the current time.
    pub fn verify_access(&self, key: &str, expires: i64, signature: &str) -> BlobResult<()> {
        self.verify_access_at(key, expires, signature, Utc::now())
    }

    /// Check a signed access URL's parameters as of `now`.
    ///
    /// The signature is checked before the expiry so a tampered `expires`
    /// value is reported as a signature mismatch.
    pub fn verify_access_at(
        &self,
        key: &str,
        expires: i64,
        signature: &str,
        now: DateTime<Utc>,
    ) -> BlobResult<()> {
        let provided = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|_| BlobError::InvalidSignature)?;
        self.signature(key, expires)
            .verify_slice(&provided)
            .map_err(|_| BlobError::InvalidSignature)?;

        if now.timestamp() >= expires {
            return Err(BlobError::UrlExpired);
        }
        Ok(())
    }

    /// Remove empty directories from `start` up to (not including) the bucket root.
    async fn prune_empty_dirs(&self, start: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(&self.root) && current != self.root {
            match fs::remove_dir(&current).await {
                Ok(_) => match current.parent() {
                    Some(parent) => current = parent.to_path_buf(),
                    None => break,
                },
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl BlobRepository for FsBlobRepository {
    async fn put(&self, key: &str, content: ByteStream, content_type: &str) -> BlobResult<u64> {
        let file_path = self.blob_path(key)?;
        let meta_path = sidecar_path(&file_path);
        let parent = file_path
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| io::Error::other("blob path missing parent directory"))?;
        let meta = serde_json::to_vec(&BlobMeta {
            content_type: content_type.to_string(),
        })
        .map_err(io::Error::other)?;

        let tmp_id = Uuid::new_v4();
        let tmp_path = parent.join(format!(".tmp-{}", tmp_id));
        let tmp_meta_path = parent.join(format!(".tmp-{}{}", tmp_id, META_SUFFIX));

        // Once the temporary blob exists the directory is non-empty and
        // cannot be pruned until both renames are done.
        let result = async {
            let file = create_in_dir(&parent, &tmp_path).await?;
            let written = write_stream(file, content).await?;
            fs::write(&tmp_meta_path, &meta).await?;
            fs::rename(&tmp_meta_path, &meta_path).await?;
            if let Err(err) = fs::rename(&tmp_path, &file_path).await {
                let _ = fs::remove_file(&meta_path).await;
                return Err(err);
            }
            Ok::<_, io::Error>(written)
        }
        .await;

        match result {
            Ok(written) => {
                debug!(key, content_type, bytes = written, "stored blob");
                Ok(written)
            }
            Err(err) => {
                let _ = fs::remove_file(&tmp_path).await;
                let _ = fs::remove_file(&tmp_meta_path).await;
                Err(BlobError::Io(err))
            }
        }
    }

    async fn get(&self, key: &str) -> BlobResult<StoredBlob> {
        let file_path = self.blob_path(key)?;

        // Sidecar first. Put renames the sidecar before the blob and delete
        // removes the blob before the sidecar, so a live blob always has one.
        let content_type = match fs::read(sidecar_path(&file_path)).await {
            Ok(raw) => {
                serde_json::from_slice::<BlobMeta>(&raw)
                    .map_err(|err| io::Error::new(ErrorKind::InvalidData, err))?
                    .content_type
            }
            Err(err) if err.kind() == ErrorKind::NotFound => DEFAULT_CONTENT_TYPE.to_string(),
            Err(err) => return Err(BlobError::Io(err)),
        };

        let file = File::open(&file_path).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                BlobError::NotFound(key.to_string())
            } else {
                BlobError::Io(err)
            }
        })?;
        Ok(StoredBlob {
            content_type,
            content: ReaderStream::new(file).boxed(),
        })
    }

    async fn delete(&self, key: &str) -> BlobResult<()> {
        let file_path = self.blob_path(key)?;
        match fs::remove_file(&file_path).await {
            Ok(_) => debug!("removed blob {}", file_path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(BlobError::NotFound(key.to_string()));
            }
            Err(err) => return Err(BlobError::Io(err)),
        }

        match fs::remove_file(sidecar_path(&file_path)).await {
            Ok(_) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => debug!(key, error = %err, "failed to remove blob sidecar"),
        }

        if let Some(parent) = file_path.parent() {
            self.prune_empty_dirs(parent).await;
        }
        Ok(())
    }

    async fn url_for(&self, key: &str, expiry: Duration) -> BlobResult<AccessUrl> {
        ensure_key_safe(key)?;
        if !key
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'/' | b'.' | b'-' | b'_'))
        {
            return Err(BlobError::InvalidKey(key.to_string()));
        }

        let window = TimeDelta::from_std(expiry)
            .map_err(|err| io::Error::new(ErrorKind::InvalidInput, err.to_string()))?;
        // URLs carry whole seconds, so issue on a second boundary to keep the
        // window exact.
        let issued_at = Utc::now().trunc_subsecs(0);
        let expires_at = issued_at + window;
        let expires = expires_at.timestamp();
        let signature = URL_SAFE_NO_PAD.encode(self.signature(key, expires).finalize().into_bytes());

        Ok(AccessUrl {
            url: format!(
                "{}/blobs/{}?expires={}&signature={}",
                self.public_base_url, key, expires, signature
            ),
            issued_at,
            expires_at,
        })
    }

    async fn ping(&self) -> BlobResult<()> {
        let tmp_path = self.root.join(format!(".readyz-{}", Uuid::new_v4()));
        fs::write(&tmp_path, b"readyz").await?;
        let read_back = fs::read(&tmp_path).await;
        let _ = fs::remove_file(&tmp_path).await;
        if read_back? != b"readyz" {
            return Err(BlobError::Io(io::Error::new(
                ErrorKind::InvalidData,
                "readiness probe content mismatch",
            )));
        }
        Ok(())
    }
}

fn sidecar_path(blob_path: &Path) -> PathBuf {
    let mut path = blob_path.as_os_str().to_owned();
    path.push(META_SUFFIX);
    PathBuf::from(path)
}

/// Create `path` inside `dir`, recreating `dir` if a concurrent delete pruned
/// it between `create_dir_all` and the create.
async fn create_in_dir(dir: &Path, path: &Path) -> io::Result<File> {
    let mut attempt = 1;
    loop {
        let created = match fs::create_dir_all(dir).await {
            Ok(()) => File::create(path).await,
            Err(err) => Err(err),
        };
        match created {
            Err(err) if err.kind() == ErrorKind::NotFound && attempt < MAX_CREATE_ATTEMPTS => {
                debug!(dir = %dir.display(), attempt, "shard directory pruned during create, retrying");
                attempt += 1;
            }
            result => return result,
        }
    }
}

/// Drain `content` into `file`, fsyncing before returning.
async fn write_stream(mut file: File, mut content: ByteStream) -> io::Result<u64> {
    let mut written: u64 = 0;
    while let Some(chunk) = content.try_next().await? {
        written += chunk.len() as u64;
        file.write_all(&chunk).await?;
    }
    file.flush().await?;
    file.sync_all().await?;
    Ok(written)
}

/// Reject keys that could escape the bucket directory.
fn ensure_key_safe(key: &str) -> BlobResult<()> {
    let invalid = key.is_empty()
        || key.len() > MAX_KEY_LEN
        || key.starts_with('/')
        || key.contains("..")
        || key
            .bytes()
            .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0');
    if invalid {
        return Err(BlobError::InvalidKey(key.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use futures::stream;
    use tempfile::TempDir;

    async fn store(dir: &TempDir) -> FsBlobRepository {
        FsBlobRepository::new(dir.path(), "photos-test", "http://localhost:3000/", b"secret")
            .await
            .unwrap()
    }

    fn chunks(parts: &[&'static [u8]]) -> ByteStream {
        stream::iter(
            parts
                .iter()
                .map(|p| Ok::<_, io::Error>(Bytes::from_static(*p)))
                .collect::<Vec<_>>(),
        )
        .boxed()
    }

    async fn collect(stream: ByteStream) -> Vec<u8> {
        stream
            .try_fold(Vec::new(), |mut acc, chunk| async move {
                acc.extend_from_slice(&chunk);
                Ok(acc)
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn put_then_get_streams_same_bytes() {
        let dir = TempDir::new().unwrap();
        let blobs = store(&dir).await;

        let written = blobs
            .put("photos/2025/01/02/abc.png", chunks(&[b"hello ", b"world"]), "image/png")
            .await
            .unwrap();
        assert_eq!(written, 11);

        let blob = blobs.get("photos/2025/01/02/abc.png").await.unwrap();
        assert_eq!(blob.content_type, "image/png");
        assert_eq!(collect(blob.content).await, b"hello world");
    }

    #[tokio::test]
    async fn failed_stream_leaves_nothing_behind() {
        let dir = TempDir::new().unwrap();
        let blobs = store(&dir).await;
        let broken = stream::iter(vec![
            Ok(Bytes::from_static(b"partial")),
            Err(io::Error::new(ErrorKind::ConnectionReset, "client went away")),
        ])
        .boxed();

        let err = blobs.put("photos/a.png", broken, "image/png").await.unwrap_err();
        assert!(matches!(err, BlobError::Io(_)));
        assert!(blobs.get("photos/a.png").await.unwrap_err().is_not_found());

        let leftovers = std::fs::read_dir(blobs.root().join("photos")).unwrap().count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn delete_removes_blob_and_prunes_directories() {
        let dir = TempDir::new().unwrap();
        let blobs = store(&dir).await;
        blobs
            .put("photos/2025/01/02/x.png", chunks(&[b"x"]), "image/png")
            .await
            .unwrap();

        blobs.delete("photos/2025/01/02/x.png").await.unwrap();
        assert!(!blobs.root().join("photos").exists());
        assert!(blobs.root().exists());
        assert!(
            blobs
                .delete("photos/2025/01/02/x.png")
                .await
                .unwrap_err()
                .is_not_found()
        );
    }

    #[tokio::test]
    async fn unsafe_keys_are_rejected() {
        let dir = TempDir::new().unwrap();
        let blobs = store(&dir).await;
        for key in [
            "",
            "/etc/passwd",
            "../escape.png",
            "a\\b.png",
            "photos/a.png.meta",
            "photos/.tmp-123",
            "photos/",
        ] {
            assert!(matches!(
                blobs.get(key).await,
                Err(BlobError::InvalidKey(_))
            ));
        }
    }

    #[tokio::test]
    async fn access_url_is_valid_for_exactly_the_window() {
        let dir = TempDir::new().unwrap();
        let blobs = store(&dir).await;
        let key = "photos/2025/01/02/abc.png";
        let access = blobs.url_for(key, Duration::from_secs(900)).await.unwrap();

        assert_eq!(access.expires_at - access.issued_at, TimeDelta::minutes(15));
        assert!(access.url.starts_with("http://localhost:3000/blobs/photos/2025/01/02/abc.png?expires="));

        let expires = access.expires_at.timestamp();
        let signature = access.url.rsplit("signature=").next().unwrap();

        blobs
            .verify_access_at(key, expires, signature, access.issued_at)
            .unwrap();
        blobs
            .verify_access_at(key, expires, signature, access.expires_at - TimeDelta::seconds(1))
            .unwrap();
        assert!(matches!(
            blobs.verify_access_at(key, expires, signature, access.expires_at),
            Err(BlobError::UrlExpired)
        ));
    }

    #[tokio::test]
    async fn tampered_access_url_is_rejected() {
        let dir = TempDir::new().unwrap();
        let blobs = store(&dir).await;
        let key = "photos/2025/01/02/abc.png";
        let access = blobs.url_for(key, Duration::from_secs(60)).await.unwrap();
        let expires = access.expires_at.timestamp();
        let signature = access.url.rsplit("signature=").next().unwrap();

        assert!(matches!(
            blobs.verify_access(key, expires + 3600, signature),
            Err(BlobError::InvalidSignature)
        ));
        assert!(matches!(
            blobs.verify_access("photos/2025/01/02/other.png", expires, signature),
            Err(BlobError::InvalidSignature)
        ));
        assert!(matches!(
            blobs.verify_access(key, expires, "not base64!"),
            Err(BlobError::InvalidSignature)
        ));
    }

    #[tokio::test]
    async fn declared_content_type_is_kept_with_the_blob() {
        let dir = TempDir::new().unwrap();
        let blobs = store(&dir).await;
        let key = "photos/2025/01/02/cat.png";
        blobs.put(key, chunks(&[b"jpeg bytes"]), "image/jpeg").await.unwrap();

        let blob = blobs.get(key).await.unwrap();
        assert_eq!(blob.content_type, "image/jpeg");
        assert_eq!(collect(blob.content).await, b"jpeg bytes");

        blobs.delete(key).await.unwrap();
        assert!(!blobs.root().join("photos").exists());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn put_survives_delete_pruning_the_same_shard() {
        let dir = TempDir::new().unwrap();
        let blobs = store(&dir).await;

        for i in 0..200 {
            let shard = format!("photos/2025/01/{:02}", i % 28 + 1);
            let a = format!("{shard}/a{i}.png");
            let b = format!("{shard}/b{i}.png");
            blobs.put(&a, chunks(&[b"a"]), "image/png").await.unwrap();

            let deleter = {
                let blobs = blobs.clone();
                tokio::spawn(async move { blobs.delete(&a).await })
            };
            let writer = {
                let blobs = blobs.clone();
                let b = b.clone();
                tokio::spawn(async move { blobs.put(&b, chunks(&[b"b"]), "image/png").await })
            };

            deleter.await.unwrap().unwrap();
            writer.await.unwrap().unwrap();
            assert_eq!(collect(blobs.get(&b).await.unwrap().content).await, b"b");
            blobs.delete(&b).await.unwrap();
        }
    }

    #[tokio::test]
    async fn ping_succeeds_on_writable_root() {
        let dir = TempDir::new().unwrap();
        store(&dir).await.ping().await.unwrap();
    }
}
