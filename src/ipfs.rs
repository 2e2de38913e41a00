//! IPFS (Kubo) HTTP API client
//!
//! Uses the RPC endpoints under `/api/v0`, all of which are POST:
//!
//! - `add?cid-version=1` - store a file, returns `{"Hash": ...}`
//! - `cat?arg=<cid>&offline=true` - read a file the node already holds
//! - `block/stat?arg=<cid>` - check presence
//! - `id` - node identity, used as a connectivity check at startup
//!
//! With `cid-version=1` a single-chunk file is stored as a raw leaf, so its
//! CID equals the one [`crate::content_store::compute_cid`] produces.
//!
//! Reads are offline: content this node does not hold is `NotFound` right
//! away instead of a network lookup that runs into the request timeout.

use crate::content_store::{lookup_cid, ContentStore};
use crate::error::StorageError;
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Deserialize)]
struct AddResponse {
    #[serde(rename = "Hash")]
    hash: String,
}

#[derive(Debug, Deserialize)]
struct IdResponse {
    #[serde(rename = "ID")]
    id: String,
}

/// Accept `host:port` as well as full URLs, like the Kubo CLI does.
pub fn normalize_api_url(api_url: &str) -> String {
    let trimmed = api_url.trim().trim_end_matches('/');
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("http://{}", trimmed)
    }
}

pub struct IpfsClient {
    client: Client,
    api_url: String,
}

impl IpfsClient {
    pub fn new(api_url: &str, timeout: Duration) -> Result<Self, StorageError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| StorageError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_url: normalize_api_url(api_url),
        })
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    fn endpoint(&self, command: &str) -> String {
        format!("{}/api/v0/{}", self.api_url, command)
    }

    /// Node peer ID; fails if the node is unreachable
    pub async fn id(&self) -> Result<String, StorageError> {
        let response = self.client.post(self.endpoint("id")).send().await?;
        let response = response.error_for_status()?;
        let body: IdResponse = response.json().await?;
        info!(peer_id = %body.id, api = %self.api_url, "Connected to IPFS node");
        Ok(body.id)
    }
}

#[async_trait]
impl ContentStore for IpfsClient {
    async fn put(&self, data: &[u8]) -> Result<String, StorageError> {
        let form = Form::new().part("file", Part::bytes(data.to_vec()).file_name("blob"));

        let response = self
            .client
            .post(self.endpoint("add"))
            .query(&[("cid-version", "1"), ("pin", "true")])
            .multipart(form)
            .send()
            .await?
            .error_for_status()?;

        let body: AddResponse = response.json().await?;
        debug!(cid = %body.hash, size = data.len(), "Added content to IPFS");
        Ok(body.hash)
    }

    async fn get(&self, content_ref: &str) -> Result<Vec<u8>, StorageError> {
        lookup_cid(content_ref)?;
        let response = self
            .client
            .post(self.endpoint("cat"))
            .query(&[("arg", content_ref), ("offline", "true")])
            .send()
            .await?;

        // Kubo answers unknown or malformed paths with 500 and a message body
        if response.status() == StatusCode::INTERNAL_SERVER_ERROR {
            let message = response.text().await.unwrap_or_default();
            debug!(cid = %content_ref, message = %message, "IPFS cat failed");
            return Err(StorageError::NotFound(content_ref.to_string()));
        }

        let bytes = response.error_for_status()?.bytes().await?;
        Ok(bytes.to_vec())
    }

    async fn exists(&self, content_ref: &str) -> Result<bool, StorageError> {
        if lookup_cid(content_ref).is_err() {
            return Ok(false);
        }
        let response = self
            .client
            .post(self.endpoint("block/stat"))
            .query(&[("arg", content_ref), ("offline", "true")])
            .send()
            .await?;
        Ok(response.status().is_success())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_api_url() {
        assert_eq!(normalize_api_url("localhost:5001"), "http://localhost:5001");
        assert_eq!(normalize_api_url("http://ipfs:5001/"), "http://ipfs:5001");
        assert_eq!(normalize_api_url(" https://node.example "), "https://node.example");
    }

    #[test]
    fn test_endpoint() {
        let client = IpfsClient::new("127.0.0.1:5001", Duration::from_secs(5)).unwrap();
        assert_eq!(client.endpoint("add"), "http://127.0.0.1:5001/api/v0/add");
        assert_eq!(client.api_url(), "http://127.0.0.1:5001");
    }

    #[tokio::test]
    async fn test_opaque_ref_never_reaches_node() {
        // Port 9 (discard) is not a Kubo node; a request would fail as Upstream
        let client = IpfsClient::new("127.0.0.1:9", Duration::from_millis(200)).unwrap();
        assert!(matches!(client.get("opaque-ref").await, Err(StorageError::NotFound(_))));
        assert!(!client.exists("opaque-ref").await.unwrap());
    }
}
