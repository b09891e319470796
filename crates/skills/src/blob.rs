//! Blob storage: key-addressed objects plus a registry of content-addressed
//! ("global") blobs shared across users.

use std::{
    fmt,
    io::Write,
    path::{Component, Path, PathBuf},
};

use {
    async_trait::async_trait,
    serde::{Deserialize, Serialize},
    sha2::{Digest, Sha256},
    sqlx::SqlitePool,
    tracing::debug,
};

use crate::{
    error::{Error, Result},
    store::now_ms,
};

/// Result of an upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedBlob {
    pub key: String,
}

/// Location metadata recorded with a global blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobLocation {
    pub dirname: String,
    pub filename: String,
    pub path: String,
}

impl BlobLocation {
    /// Split a storage key into its directory and file name.
    pub fn from_key(key: &str) -> Self {
        let (dirname, filename) = match key.rsplit_once('/') {
            Some((dir, file)) => (dir.to_string(), file.to_string()),
            None => (String::new(), key.to_string()),
        };
        Self {
            dirname,
            filename,
            path: key.to_string(),
        }
    }
}

/// Registration record for a content-addressed blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalBlob {
    pub file_hash: String,
    pub file_type: String,
    pub url: String,
    pub size: u64,
    pub metadata: BlobLocation,
}

/// A blob materialized on local disk. The release action runs exactly once:
/// on [`LocalFile::release`] or, failing that, on drop.
pub struct LocalFile {
    path: PathBuf,
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl LocalFile {
    pub fn new(path: PathBuf, release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            path,
            release: Some(Box::new(release)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run the cleanup now instead of at end of scope.
    pub fn release(mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl Drop for LocalFile {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl fmt::Debug for LocalFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalFile")
            .field("path", &self.path)
            .field("released", &self.release.is_none())
            .finish()
    }
}

/// Binary storage consumed by the resource store and the importer.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Write `bytes` at `key`, replacing any existing object.
    async fn upload(&self, key: &str, bytes: &[u8], mime_type: &str) -> Result<UploadedBlob>;

    /// Copy a file previously uploaded by `user_id` to local disk. Files
    /// owned by other users are reported as missing.
    async fn download_to_local(&self, user_id: &str, file_id: &str) -> Result<LocalFile>;

    /// Text content of the global blob registered under `hash`.
    async fn read_by_hash(&self, hash: &str) -> Result<String>;

    /// Make an uploaded object addressable by its content hash. Registering
    /// the same hash twice is a no-op.
    async fn register_global_blob(&self, blob: GlobalBlob) -> Result<()>;
}

/// Lowercase hex SHA-256 of `bytes`.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

// ── Filesystem-backed implementation ────────────────────────────────────────

/// Per-user upload record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserFile {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub file_type: String,
    pub file_hash: String,
    pub url: String,
    pub size: i64,
    pub created_at: i64,
}

/// Stores objects as files under `root` and tracks registrations in SQLite.
pub struct FsBlobStore {
    root: PathBuf,
    pool: SqlitePool,
}

impl FsBlobStore {
    /// Both `global_files` and `files` must exist; see [`crate::run_migrations`].
    pub fn new(root: PathBuf, pool: SqlitePool) -> Self {
        Self { root, pool }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, key: &str) -> Result<PathBuf> {
        Ok(self.root.join(validate_key(key)?))
    }

    /// Upload `bytes` on behalf of `user_id` and record it as a user file.
    /// The returned id is what [`BlobStore::download_to_local`] accepts.
    pub async fn create_user_file(
        &self,
        user_id: &str,
        name: &str,
        file_type: &str,
        bytes: &[u8],
    ) -> Result<UserFile> {
        let hash = sha256_hex(bytes);
        let id = uuid::Uuid::new_v4().to_string();
        let key = format!("files/{user_id}/{id}/{}", sanitize_file_name(name));
        self.upload(&key, bytes, file_type).await?;

        let file = UserFile {
            id,
            user_id: user_id.to_string(),
            name: name.to_string(),
            file_type: file_type.to_string(),
            file_hash: hash,
            url: key,
            size: bytes.len() as i64,
            created_at: now_ms() as i64,
        };
        sqlx::query(
            "INSERT INTO files (id, user_id, name, file_type, file_hash, url, size, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&file.id)
        .bind(&file.user_id)
        .bind(&file.name)
        .bind(&file.file_type)
        .bind(&file.file_hash)
        .bind(&file.url)
        .bind(file.size)
        .bind(file.created_at)
        .execute(&self.pool)
        .await?;
        Ok(file)
    }

    /// Look up the registration for a content hash.
    pub async fn find_global_blob(&self, hash: &str) -> Result<Option<GlobalBlob>> {
        let row: Option<(String, String, String, i64, Option<String>)> = sqlx::query_as(
            "SELECT hash_id, file_type, url, size, metadata FROM global_files WHERE hash_id = ?",
        )
        .bind(hash)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|(file_hash, file_type, url, size, metadata)| -> Result<GlobalBlob> {
            let metadata = match metadata {
                Some(raw) => serde_json::from_str(&raw)?,
                None => BlobLocation::from_key(&url),
            };
            Ok(GlobalBlob {
                file_hash,
                file_type,
                url,
                size: size as u64,
                metadata,
            })
        })
        .transpose()
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn upload(&self, key: &str, bytes: &[u8], mime_type: &str) -> Result<UploadedBlob> {
        let path = self.object_path(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        // Write-then-rename so readers never observe a partial object.
        let mut tmp = path.clone().into_os_string();
        tmp.push(".part");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;
        debug!(%key, size = bytes.len(), %mime_type, "uploaded blob");
        Ok(UploadedBlob {
            key: key.to_string(),
        })
    }

    async fn download_to_local(&self, user_id: &str, file_id: &str) -> Result<LocalFile> {
        let url: Option<String> =
            sqlx::query_scalar("SELECT url FROM files WHERE id = ? AND user_id = ?")
                .bind(file_id)
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;
        let url = url.ok_or_else(|| Error::invalid_input(format!("file not found: {file_id}")))?;
        let bytes = tokio::fs::read(self.object_path(&url)?).await?;

        let temp_path = tokio::task::spawn_blocking(move || -> Result<tempfile::TempPath> {
            let mut file = tempfile::Builder::new()
                .prefix("skillport-")
                .suffix(".zip")
                .tempfile()?;
            file.write_all(&bytes)?;
            file.flush()?;
            Ok(file.into_temp_path())
        })
        .await??;

        let path = temp_path.to_path_buf();
        debug!(%user_id, %file_id, path = %path.display(), "downloaded file to local temp");
        Ok(LocalFile::new(path, move || {
            if let Err(e) = temp_path.close() {
                tracing::warn!(error = %e, "failed to remove temp file");
            }
        }))
    }

    async fn read_by_hash(&self, hash: &str) -> Result<String> {
        let blob = self
            .find_global_blob(hash)
            .await?
            .ok_or_else(|| Error::invalid_input(format!("no blob registered for hash {hash}")))?;
        let bytes = tokio::fs::read(self.object_path(&blob.url)?).await?;
        String::from_utf8(bytes).map_err(|e| Error::external(format!("blob {hash}"), e))
    }

    async fn register_global_blob(&self, blob: GlobalBlob) -> Result<()> {
        let metadata = serde_json::to_string(&blob.metadata)?;
        sqlx::query(
            "INSERT INTO global_files (hash_id, file_type, url, size, metadata, created_at)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(hash_id) DO NOTHING",
        )
        .bind(&blob.file_hash)
        .bind(&blob.file_type)
        .bind(&blob.url)
        .bind(blob.size as i64)
        .bind(&metadata)
        .bind(now_ms() as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// Reject keys that could escape the blob root.
fn validate_key(key: &str) -> Result<&Path> {
    let path = Path::new(key);
    if key.is_empty()
        || !path
            .components()
            .all(|c| matches!(c, Component::Normal(_)))
    {
        return Err(Error::invalid_input(format!("invalid blob key: {key}")));
    }
    Ok(path)
}

fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    match cleaned.trim_matches('.') {
        "" => "upload".to_string(),
        trimmed => trimmed.to_string(),
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        std::sync::{
            Arc,
            atomic::{AtomicUsize, Ordering},
        },
    };

    async fn store() -> (tempfile::TempDir, FsBlobStore) {
        let dir = tempfile::tempdir().unwrap();
        let pool = crate::store::memory_pool().await.unwrap();
        let store = FsBlobStore::new(dir.path().to_path_buf(), pool);
        (dir, store)
    }

    #[test]
    fn sha256_hex_is_64_lowercase_chars() {
        let h = sha256_hex(b"hello");
        assert_eq!(
            h,
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn blob_location_splits_key() {
        let loc = BlobLocation::from_key("skills/zip/abc.zip");
        assert_eq!(loc.dirname, "skills/zip");
        assert_eq!(loc.filename, "abc.zip");
        assert_eq!(loc.path, "skills/zip/abc.zip");
    }

    #[test]
    fn validate_key_rejects_escapes() {
        assert!(validate_key("../etc/passwd").is_err());
        assert!(validate_key("/abs/path").is_err());
        assert!(validate_key("").is_err());
        assert!(validate_key("skills/source_files/z1/a.md").is_ok());
    }

    #[test]
    fn sanitize_file_name_strips_directories() {
        assert_eq!(sanitize_file_name("../../evil zip.zip"), "evil_zip.zip");
        assert_eq!(sanitize_file_name(".."), "upload");
    }

    #[test]
    fn local_file_releases_exactly_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let file = LocalFile::new(PathBuf::from("/tmp/x"), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        file.release();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let counter = Arc::clone(&calls);
        {
            let _file = LocalFile::new(PathBuf::from("/tmp/y"), move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn global_blob_round_trip() {
        let (_dir, store) = store().await;
        let bytes = b"# Guide\n";
        let hash = sha256_hex(bytes);
        let key = "skills/source_files/z1/docs/guide.md";

        store.upload(key, bytes, "text/markdown").await.unwrap();
        let blob = GlobalBlob {
            file_hash: hash.clone(),
            file_type: "text/markdown".into(),
            url: key.into(),
            size: bytes.len() as u64,
            metadata: BlobLocation::from_key(key),
        };
        store.register_global_blob(blob.clone()).await.unwrap();
        // Second registration is ignored.
        store.register_global_blob(blob.clone()).await.unwrap();

        assert_eq!(store.find_global_blob(&hash).await.unwrap(), Some(blob));
        assert_eq!(store.read_by_hash(&hash).await.unwrap(), "# Guide\n");
    }

    #[tokio::test]
    async fn download_to_local_copies_and_cleans_up() {
        let (_dir, store) = store().await;
        let file = store
            .create_user_file("user-1", "my skill.zip", "application/zip", b"PK-bytes")
            .await
            .unwrap();
        assert!(file.url.starts_with("files/user-1/"));
        assert!(file.url.ends_with("/my_skill.zip"));

        let local = store.download_to_local("user-1", &file.id).await.unwrap();
        let path = local.path().to_path_buf();
        assert_eq!(std::fs::read(&path).unwrap(), b"PK-bytes");

        drop(local);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn download_unknown_file_fails() {
        let (_dir, store) = store().await;
        assert!(store.download_to_local("user-1", "missing").await.is_err());
    }

    #[tokio::test]
    async fn download_is_scoped_to_the_uploader() {
        let (_dir, store) = store().await;
        let file = store
            .create_user_file("alice", "secret.zip", "application/zip", b"alice secret")
            .await
            .unwrap();

        let err = store.download_to_local("mallory", &file.id).await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput { .. }), "{err:?}");
        assert!(store.download_to_local("alice", &file.id).await.is_ok());
    }
}
