//! Ingestion relay
//!
//! Turns raw submissions into content-addressed metadata blobs:
//!
//! - text: tags are extracted, the raw text (markers included) becomes the
//!   blob's `content`
//! - image/video: the file is stored first, its reference becomes the
//!   blob's `content`, and no tags are attached
//!
//! The caller receives `{hash, url, tags}` and records `hash` in the ledger
//! with `create_post`. The relay never touches the ledger itself.

use crate::content_store::ContentStore;
use crate::error::StorageError;
use crate::ledger::ContentType;
use crate::service::Clock;
use crate::tags::extract_tags;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

/// Metadata stored alongside every upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostData {
    #[serde(rename = "type")]
    pub kind: ContentType,
    pub content: String,
    pub timestamp: i64,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub metadata: PostMetadata,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostMetadata {
    #[serde(rename = "mimeType", default)]
    pub mime_type: String,
}

/// A metadata blob matched by [`Relay::search_content`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchHit {
    pub hash: String,
    pub data: PostData,
}

/// What the uploader gets back
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadResponse {
    pub hash: String,
    pub url: String,
    pub tags: Vec<String>,
}

pub struct Relay {
    store: Arc<dyn ContentStore>,
    gateway_url: String,
    clock: Arc<dyn Clock>,
}

impl Relay {
    pub fn new(store: Arc<dyn ContentStore>, gateway_url: &str, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            gateway_url: gateway_url.trim_end_matches('/').to_string(),
            clock,
        }
    }

    /// Public URL for a reference
    pub fn url_for(&self, hash: &str) -> String {
        format!("{}/{}", self.gateway_url, hash)
    }

    async fn store_metadata(&self, data: &PostData) -> Result<String, StorageError> {
        let json = serde_json::to_vec(data)?;
        self.store.put(&json).await
    }

    /// Store a text post
    pub async fn upload_text(&self, text: &str) -> Result<UploadResponse, StorageError> {
        if text.is_empty() {
            return Err(StorageError::InvalidInput("text is required".into()));
        }

        let tags = extract_tags(text);
        let data = PostData {
            kind: ContentType::Text,
            content: text.to_string(),
            timestamp: self.clock.now(),
            tags: tags.clone(),
            metadata: PostMetadata {
                mime_type: "text/plain".into(),
            },
        };

        let hash = self.store_metadata(&data).await?;
        info!(hash = %hash, tags = ?tags, "Uploaded text");

        Ok(UploadResponse {
            url: self.url_for(&hash),
            hash,
            tags,
        })
    }

    /// Store an image or video, then its metadata blob
    pub async fn upload_file(
        &self,
        file: &[u8],
        mime_type: &str,
        kind: ContentType,
    ) -> Result<UploadResponse, StorageError> {
        if kind == ContentType::Text {
            return Err(StorageError::InvalidInput("Invalid file type".into()));
        }
        if file.is_empty() {
            return Err(StorageError::InvalidInput("No file uploaded".into()));
        }

        let file_hash = self.store.put(file).await?;
        debug!(hash = %file_hash, size = file.len(), "Stored file body");

        let data = PostData {
            kind,
            content: file_hash,
            timestamp: self.clock.now(),
            tags: Vec::new(),
            metadata: PostMetadata {
                mime_type: mime_type.to_string(),
            },
        };

        let hash = self.store_metadata(&data).await?;
        info!(hash = %hash, kind = %kind, mime = %mime_type, "Uploaded file");

        Ok(UploadResponse {
            url: self.url_for(&hash),
            hash,
            tags: Vec::new(),
        })
    }

    /// Fetch and decode a metadata blob
    pub async fn get_content(&self, hash: &str) -> Result<PostData, StorageError> {
        let bytes = self.store.get(hash).await?;
        serde_json::from_slice(&bytes).map_err(|e| StorageError::InvalidContent(e.to_string()))
    }

    pub async fn content_exists(&self, hash: &str) -> Result<bool, StorageError> {
        self.store.exists(hash).await
    }

    /// Raw bytes behind a reference (file bodies)
    pub async fn get_raw(&self, hash: &str) -> Result<Vec<u8>, StorageError> {
        self.store.get(hash).await
    }

    /// Case-insensitive substring search over metadata blobs.
    ///
    /// Matches on `content` or on any tag. Hashes that cannot be fetched or
    /// decoded are skipped.
    pub async fn search_content(&self, query: &str, hashes: &[String]) -> Vec<SearchHit> {
        let query = query.to_lowercase();
        let mut results = Vec::new();

        for hash in hashes {
            let data = match self.get_content(hash).await {
                Ok(data) => data,
                Err(e) => {
                    debug!(hash = %hash, error = %e, "Skipping unreadable content");
                    continue;
                }
            };

            let matches = data.content.to_lowercase().contains(&query)
                || data.tags.iter().any(|t| t.to_lowercase().contains(&query));
            if matches {
                results.push(SearchHit {
                    hash: hash.clone(),
                    data,
                });
            }
        }

        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content_store::MemoryContentStore;

    struct StaticClock;

    impl Clock for StaticClock {
        fn now(&self) -> i64 {
            1_700_000_000
        }
    }

    fn relay() -> (Relay, Arc<MemoryContentStore>) {
        let store = Arc::new(MemoryContentStore::new());
        let relay = Relay::new(store.clone(), "https://ipfs.io/ipfs/", Arc::new(StaticClock));
        (relay, store)
    }

    #[tokio::test]
    async fn test_upload_text_extracts_tags() {
        let (relay, _) = relay();
        let resp = relay.upload_text("gm #web3 #区块链 #web3").await.unwrap();

        assert_eq!(resp.tags, vec!["web3", "区块链"]);
        assert_eq!(resp.url, format!("https://ipfs.io/ipfs/{}", resp.hash));

        let data = relay.get_content(&resp.hash).await.unwrap();
        assert_eq!(data.kind, ContentType::Text);
        assert_eq!(data.content, "gm #web3 #区块链 #web3");
        assert_eq!(data.timestamp, 1_700_000_000);
        assert_eq!(data.metadata.mime_type, "text/plain");
    }

    #[tokio::test]
    async fn test_metadata_blob_layout() {
        let (relay, store) = relay();
        let resp = relay.upload_text("#a").await.unwrap();

        let raw = store.get(&resp.hash).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&raw).unwrap();
        assert_eq!(json["type"], "text");
        assert_eq!(json["content"], "#a");
        assert_eq!(json["timestamp"], 1_700_000_000);
        assert_eq!(json["tags"], serde_json::json!(["a"]));
        assert_eq!(json["metadata"]["mimeType"], "text/plain");
    }

    #[tokio::test]
    async fn test_upload_file_stores_body_then_metadata() {
        let (relay, store) = relay();
        let resp = relay
            .upload_file(b"\x89PNG fake", "image/png", ContentType::Image)
            .await
            .unwrap();

        assert!(resp.tags.is_empty());
        assert_eq!(store.len().await, 2);

        let data = relay.get_content(&resp.hash).await.unwrap();
        assert_eq!(data.kind, ContentType::Image);
        assert_eq!(data.metadata.mime_type, "image/png");
        assert_eq!(relay.get_raw(&data.content).await.unwrap(), b"\x89PNG fake");
    }

    #[tokio::test]
    async fn test_rejects_bad_uploads() {
        let (relay, _) = relay();
        assert!(matches!(relay.upload_text("").await, Err(StorageError::InvalidInput(_))));
        assert!(matches!(
            relay.upload_file(b"x", "text/plain", ContentType::Text).await,
            Err(StorageError::InvalidInput(_))
        ));
        assert!(matches!(
            relay.upload_file(b"", "video/mp4", ContentType::Video).await,
            Err(StorageError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_get_content_rejects_non_metadata() {
        let (relay, store) = relay();
        let hash = store.put(b"not json").await.unwrap();
        assert!(matches!(
            relay.get_content(&hash).await,
            Err(StorageError::InvalidContent(_))
        ));
    }

    #[tokio::test]
    async fn test_search_matches_content_and_tags() {
        let (relay, store) = relay();
        let a = relay.upload_text("Learning Rust today").await.unwrap().hash;
        let b = relay.upload_text("gm #RustLang").await.unwrap().hash;
        let c = relay.upload_text("nothing here").await.unwrap().hash;
        let junk = store.put(b"junk").await.unwrap();

        let hits = relay
            .search_content("RUST", &[a.clone(), b.clone(), c, junk])
            .await;
        let contents: Vec<&str> = hits.iter().map(|h| h.data.content.as_str()).collect();
        assert_eq!(contents, vec!["Learning Rust today", "gm #RustLang"]);
        assert_eq!(hits[0].hash, a);
        assert_eq!(hits[1].hash, b);
    }
}
