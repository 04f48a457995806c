//! Blob storage for rehosted media (generated videos).
//!
//! Assets are written under a key and served back by the API at
//! `{public_base_url}/api/v1/media/{key}`.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

use clearview_core::{defaults, Error, Result};

/// Route prefix the API serves blobs under.
pub const MEDIA_ROUTE_PREFIX: &str = "/api/v1/media";

/// Blob store settings.
#[derive(Debug, Clone)]
pub struct BlobStoreConfig {
    pub storage_path: PathBuf,
    /// Externally reachable base URL, without a trailing slash.
    pub public_base_url: String,
}

impl BlobStoreConfig {
    /// Read `MEDIA_STORAGE_PATH` and `PUBLIC_BASE_URL`.
    pub fn from_env() -> Self {
        let storage_path = std::env::var("MEDIA_STORAGE_PATH")
            .unwrap_or_else(|_| defaults::MEDIA_STORAGE_PATH.to_string());
        let public_base_url = std::env::var("PUBLIC_BASE_URL").unwrap_or_else(|_| {
            format!("http://localhost:{}", defaults::SERVER_PORT)
        });
        Self {
            storage_path: PathBuf::from(storage_path),
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
        }
    }
}

/// A stored blob read back.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredBlob {
    pub data: Vec<u8>,
    pub content_type: String,
}

/// Byte store returning stable URLs.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `data` under `key`, replacing any previous blob. Returns its URL.
    async fn put(&self, key: &str, data: &[u8], content_type: &str) -> Result<String>;

    /// Read a blob; `None` if the key is unknown.
    async fn get(&self, key: &str) -> Result<Option<StoredBlob>>;

    /// Public URL for a key.
    fn url_for(&self, key: &str) -> String;
}

/// Reject keys that could escape the storage root.
pub fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() || key.starts_with('/') || key.contains('\\') {
        return Err(Error::InvalidInput(format!("invalid blob key: {key}")));
    }
    let safe = Path::new(key)
        .components()
        .all(|c| matches!(c, Component::Normal(_)));
    if !safe {
        return Err(Error::InvalidInput(format!("invalid blob key: {key}")));
    }
    Ok(())
}

/// Compute BLAKE3 hash of data with "blake3:" prefix.
pub fn compute_content_hash(data: &[u8]) -> String {
    format!("blake3:{}", blake3::hash(data).to_hex())
}

/// Key for a call's generated video: `videos/{call_id}/{hash-prefix}.mp4`.
/// Identical bytes map to the same key.
pub fn video_key(call_id: Uuid, data: &[u8]) -> String {
    let hash = blake3::hash(data).to_hex();
    format!("videos/{}/{}.mp4", call_id, &hash.as_str()[..16])
}

/// Content type from the key's extension.
pub fn content_type_for_key(key: &str) -> &'static str {
    match Path::new(key)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("mp4") => "video/mp4",
        Some("webm") => "video/webm",
        Some("pdf") => "application/pdf",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        _ => "application/octet-stream",
    }
}

fn media_url(base: &str, key: &str) -> String {
    format!("{}{}/{}", base.trim_end_matches('/'), MEDIA_ROUTE_PREFIX, key)
}

/// Filesystem blob store. Writes go to a temp file and are renamed into place.
pub struct FilesystemBlobStore {
    base_path: PathBuf,
    public_base_url: String,
}

impl FilesystemBlobStore {
    pub fn new(config: &BlobStoreConfig) -> Self {
        Self {
            base_path: config.storage_path.clone(),
            public_base_url: config.public_base_url.clone(),
        }
    }

    fn full_path(&self, key: &str) -> PathBuf {
        self.base_path.join(key)
    }

    /// Write, read back, and delete a check file so misconfigured storage
    /// fails at startup instead of at the end of a ten-minute video run.
    pub async fn validate(&self) -> Result<()> {
        let check_path = self.base_path.join(".health-check");
        fs::create_dir_all(&self.base_path).await?;
        fs::write(&check_path, b"ok").await?;
        let read = fs::read(&check_path).await?;
        let _ = fs::remove_file(&check_path).await;
        if read != b"ok" {
            return Err(Error::Storage("read-back mismatch".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl BlobStore for FilesystemBlobStore {
    async fn put(&self, key: &str, data: &[u8], content_type: &str) -> Result<String> {
        validate_key(key)?;
        let full_path = self.full_path(key);
        debug!(
            subsystem = "db",
            component = "blob_storage",
            op = "put",
            key,
            content_type,
            size_bytes = data.len(),
            "Writing blob"
        );

        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| {
                warn!(parent = %parent.display(), error = %e, "blob_storage: create_dir_all failed");
                e
            })?;
        }

        let temp_path = full_path.with_extension("tmp");
        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(data).await?;
        file.sync_all().await?;
        drop(file);

        fs::rename(&temp_path, &full_path).await.map_err(|e| {
            warn!(from = %temp_path.display(), to = %full_path.display(), error = %e, "blob_storage: rename failed");
            e
        })?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&full_path, std::fs::Permissions::from_mode(0o644)).await?;
        }

        Ok(self.url_for(key))
    }

    async fn get(&self, key: &str) -> Result<Option<StoredBlob>> {
        validate_key(key)?;
        let full_path = self.full_path(key);
        if !fs::try_exists(&full_path).await? {
            return Ok(None);
        }
        Ok(Some(StoredBlob {
            data: fs::read(full_path).await?,
            content_type: content_type_for_key(key).to_string(),
        }))
    }

    fn url_for(&self, key: &str) -> String {
        media_url(&self.public_base_url, key)
    }
}

/// In-memory blob store for tests.
#[derive(Clone)]
pub struct MemoryBlobStore {
    public_base_url: String,
    blobs: Arc<RwLock<HashMap<String, StoredBlob>>>,
}

impl MemoryBlobStore {
    pub fn new(public_base_url: impl Into<String>) -> Self {
        Self {
            public_base_url: public_base_url.into(),
            blobs: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn keys(&self) -> Vec<String> {
        self.blobs.read().await.keys().cloned().collect()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, key: &str, data: &[u8], content_type: &str) -> Result<String> {
        validate_key(key)?;
        self.blobs.write().await.insert(
            key.to_string(),
            StoredBlob {
                data: data.to_vec(),
                content_type: content_type.to_string(),
            },
        );
        Ok(self.url_for(key))
    }

    async fn get(&self, key: &str) -> Result<Option<StoredBlob>> {
        validate_key(key)?;
        Ok(self.blobs.read().await.get(key).cloned())
    }

    fn url_for(&self, key: &str) -> String {
        media_url(&self.public_base_url, key)
    }
}
