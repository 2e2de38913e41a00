//! Local content-addressed blob storage
//!
//! Blobs are files named by their CID, spread over subdirectories keyed by
//! the first four hex characters of the sha2-256 digest:
//!
//! ```text
//! <root>/blobs/9f86/bafkrei...
//! ```
//!
//! Reads re-hash the file and refuse to return bytes that no longer match
//! their name. Writes go to a temporary file in the target directory and
//! are renamed into place, so a blob path only ever holds complete content.

use crate::content_store::{compute_cid, lookup_cid, verify, ContentStore};
use crate::error::StorageError;
use async_trait::async_trait;
use cid::Cid;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Filesystem blob store
pub struct BlobStore {
    root_dir: PathBuf,
}

impl BlobStore {
    /// Create a blob store rooted at the given directory
    pub async fn new<P: AsRef<Path>>(root_dir: P) -> Result<Self, StorageError> {
        let root_dir = root_dir.as_ref().to_path_buf();
        fs::create_dir_all(root_dir.join("blobs")).await?;

        info!(path = %root_dir.display(), "Initialized blob store");

        Ok(Self { root_dir })
    }

    fn blob_path(&self, cid: &Cid) -> PathBuf {
        let digest = hex::encode(cid.hash().digest());
        let subdir = &digest[..4.min(digest.len())];
        self.root_dir.join("blobs").join(subdir).join(cid.to_string())
    }

    /// Store a blob, returning its CID. Storing the same bytes twice is a no-op.
    ///
    /// An existing file that fails verification is replaced.
    pub async fn store(&self, data: &[u8]) -> Result<StoreResult, StorageError> {
        let cid = compute_cid(data);
        let blob_path = self.blob_path(&cid);

        match fs::read(&blob_path).await {
            Ok(existing) if verify(&cid, &existing).is_ok() => {
                debug!(cid = %cid, "Blob already exists");
                return Ok(StoreResult {
                    content_ref: cid.to_string(),
                    size_bytes: data.len() as u64,
                    already_existed: true,
                });
            }
            Ok(_) => warn!(cid = %cid, "Replacing blob that failed verification"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let parent = blob_path
            .parent()
            .ok_or_else(|| StorageError::Internal(format!("No parent for {}", blob_path.display())))?;
        fs::create_dir_all(parent).await?;

        let temp_path = parent.join(format!(
            ".{}.{}.{}.tmp",
            cid,
            std::process::id(),
            TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        if let Err(e) = fs::write(&temp_path, data).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e.into());
        }
        if let Err(e) = fs::rename(&temp_path, &blob_path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e.into());
        }

        info!(cid = %cid, size = data.len(), "Stored blob");

        Ok(StoreResult {
            content_ref: cid.to_string(),
            size_bytes: data.len() as u64,
            already_existed: false,
        })
    }

    /// Retrieve a blob by reference
    pub async fn fetch(&self, content_ref: &str) -> Result<Vec<u8>, StorageError> {
        let cid = lookup_cid(content_ref)?;
        let data = match fs::read(self.blob_path(&cid)).await {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StorageError::NotFound(content_ref.to_string()))
            }
            Err(e) => return Err(e.into()),
        };

        verify(&cid, &data)?;
        Ok(data)
    }

    /// Get storage statistics
    pub async fn stats(&self) -> Result<StorageStats, StorageError> {
        let mut total_blobs = 0u64;
        let mut total_bytes = 0u64;

        let mut subdirs = fs::read_dir(self.root_dir.join("blobs")).await?;
        while let Some(subdir) = subdirs.next_entry().await? {
            if !subdir.file_type().await?.is_dir() {
                continue;
            }
            let mut entries = fs::read_dir(subdir.path()).await?;
            while let Some(entry) = entries.next_entry().await? {
                if entry.file_name().to_string_lossy().starts_with('.') {
                    continue;
                }
                total_blobs += 1;
                total_bytes += entry.metadata().await?.len();
            }
        }

        Ok(StorageStats {
            total_blobs,
            total_bytes,
        })
    }
}

#[async_trait]
impl ContentStore for BlobStore {
    async fn put(&self, data: &[u8]) -> Result<String, StorageError> {
        Ok(self.store(data).await?.content_ref)
    }

    async fn get(&self, content_ref: &str) -> Result<Vec<u8>, StorageError> {
        self.fetch(content_ref).await
    }

    async fn exists(&self, content_ref: &str) -> Result<bool, StorageError> {
        let Ok(cid) = lookup_cid(content_ref) else {
            return Ok(false);
        };
        Ok(fs::metadata(self.blob_path(&cid)).await.is_ok())
    }
}

/// Result of storing a blob
#[derive(Debug, Clone)]
pub struct StoreResult {
    pub content_ref: String,
    pub size_bytes: u64,
    pub already_existed: bool,
}

/// Storage statistics
#[derive(Debug, Clone)]
pub struct StorageStats {
    pub total_blobs: u64,
    pub total_bytes: u64,
}
