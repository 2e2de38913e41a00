//! Content-addressed storage contract
//!
//! The ledger only ever records references; the bytes live behind a
//! [`ContentStore`]. Two rules hold for every implementation:
//!
//! - the same bytes always produce the same reference
//! - nothing is ever deleted
//!
//! References are CIDv1 strings (raw codec, sha2-256, base32), which is also
//! what an IPFS node returns for small files added with `cid-version=1`.

use crate::error::StorageError;
use async_trait::async_trait;
use cid::Cid;
use multihash_codetable::{Code, MultihashDigest};
use std::collections::HashMap;
use std::str::FromStr;
use tokio::sync::RwLock;

/// Multicodec for raw bytes
pub const RAW_CODEC: u64 = 0x55;

#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Store bytes, returning their reference
    async fn put(&self, data: &[u8]) -> Result<String, StorageError>;

    /// Fetch bytes by reference
    async fn get(&self, content_ref: &str) -> Result<Vec<u8>, StorageError>;

    /// Whether the reference resolves
    async fn exists(&self, content_ref: &str) -> Result<bool, StorageError>;
}

/// CID of `data`
pub fn compute_cid(data: &[u8]) -> Cid {
    Cid::new_v1(RAW_CODEC, Code::Sha2_256.digest(data))
}

/// Parse a reference that is being looked up.
///
/// A reference that is not a CID can never resolve, so it reads as absent.
pub fn lookup_cid(content_ref: &str) -> Result<Cid, StorageError> {
    Cid::from_str(content_ref).map_err(|_| StorageError::NotFound(content_ref.to_string()))
}

/// Check that `data` is what `content_ref` names
pub fn verify(content_ref: &Cid, data: &[u8]) -> Result<(), StorageError> {
    let actual = compute_cid(data);
    if actual != *content_ref {
        return Err(StorageError::HashMismatch {
            expected: content_ref.to_string(),
            actual: actual.to_string(),
        });
    }
    Ok(())
}

/// Process-local store for tests and `--in-memory` runs
#[derive(Default)]
pub struct MemoryContentStore {
    blobs: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.blobs.read().await.len()
    }
}

#[async_trait]
impl ContentStore for MemoryContentStore {
    async fn put(&self, data: &[u8]) -> Result<String, StorageError> {
        let content_ref = compute_cid(data).to_string();
        self.blobs
            .write()
            .await
            .entry(content_ref.clone())
            .or_insert_with(|| data.to_vec());
        Ok(content_ref)
    }

    async fn get(&self, content_ref: &str) -> Result<Vec<u8>, StorageError> {
        let cid = lookup_cid(content_ref)?;
        self.blobs
            .read()
            .await
            .get(&cid.to_string())
            .cloned()
            .ok_or_else(|| StorageError::NotFound(content_ref.to_string()))
    }

    async fn exists(&self, content_ref: &str) -> Result<bool, StorageError> {
        let Ok(cid) = lookup_cid(content_ref) else {
            return Ok(false);
        };
        Ok(self.blobs.read().await.contains_key(&cid.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cid_is_stable() {
        let a = compute_cid(b"Hello, permapost!");
        let b = compute_cid(b"Hello, permapost!");
        assert_eq!(a, b);
        assert!(a.to_string().starts_with("bafkrei"));
        assert_ne!(a, compute_cid(b"something else"));
    }

    #[test]
    fn test_lookup_cid_parses_and_treats_garbage_as_absent() {
        let cid = compute_cid(b"data");
        assert_eq!(lookup_cid(&cid.to_string()).unwrap(), cid);
        assert!(matches!(lookup_cid("not-a-cid"), Err(StorageError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_memory_store_opaque_ref_is_absent() {
        let store = MemoryContentStore::new();
        store.put(b"something").await.unwrap();
        assert!(matches!(store.get("opaque-ref").await, Err(StorageError::NotFound(_))));
        assert!(!store.exists("opaque-ref").await.unwrap());
    }

    #[test]
    fn test_verify_detects_mismatch() {
        let cid = compute_cid(b"original");
        assert!(verify(&cid, b"original").is_ok());
        assert!(matches!(
            verify(&cid, b"tampered"),
            Err(StorageError::HashMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn test_memory_store() {
        let store = MemoryContentStore::new();
        let r1 = store.put(b"blob").await.unwrap();
        let r2 = store.put(b"blob").await.unwrap();
        assert_eq!(r1, r2);
        assert_eq!(store.len().await, 1);
        assert_eq!(store.get(&r1).await.unwrap(), b"blob");
        assert!(store.exists(&r1).await.unwrap());

        let missing = compute_cid(b"never stored").to_string();
        assert!(!store.exists(&missing).await.unwrap());
        assert!(matches!(store.get(&missing).await, Err(StorageError::NotFound(_))));
    }
}
