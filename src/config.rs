//! Configuration for permapost

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default storage directory
pub fn default_storage_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("permapost")
}

/// Configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Storage directory for the ledger database and local blobs
    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,

    /// HTTP API port
    #[serde(default = "default_http_port")]
    pub http_port: u16,

    /// Kubo RPC endpoint (`host:port` or URL). Unset means local blob storage.
    #[serde(default)]
    pub ipfs_api_url: Option<String>,

    /// Timeout for each IPFS request
    #[serde(default = "default_ipfs_timeout")]
    pub ipfs_timeout_secs: u64,

    /// Public gateway prefix for the `url` returned on upload
    #[serde(default = "default_gateway_url")]
    pub gateway_url: String,

    /// Origins allowed by CORS; `"*"` allows any
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: Vec<String>,

    /// Ledger event buffer per subscriber
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,

    /// Largest accepted request body
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

fn default_http_port() -> u16 {
    8080
}

fn default_ipfs_timeout() -> u64 {
    30
}

fn default_gateway_url() -> String {
    "https://ipfs.io/ipfs".to_string()
}

fn default_allowed_origins() -> Vec<String> {
    vec![
        "http://localhost:3000".to_string(),
        "http://localhost:5173".to_string(),
    ]
}

fn default_event_capacity() -> usize {
    1024
}

fn default_max_body_bytes() -> usize {
    50 * 1024 * 1024
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage_dir: default_storage_dir(),
            http_port: default_http_port(),
            ipfs_api_url: None,
            ipfs_timeout_secs: default_ipfs_timeout(),
            gateway_url: default_gateway_url(),
            allowed_origins: default_allowed_origins(),
            event_capacity: default_event_capacity(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

impl Config {
    /// Load config from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, std::io::Error> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    /// Save config to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), std::io::Error> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, content)
    }

    /// Get blobs directory
    pub fn blobs_dir(&self) -> PathBuf {
        self.storage_dir.join("content")
    }

    /// Get ledger database path
    pub fn ledger_db_path(&self) -> PathBuf {
        self.storage_dir.join("ledger.sled")
    }

    /// Get config file path
    pub fn config_path(&self) -> PathBuf {
        self.storage_dir.join("config.toml")
    }

    pub fn ipfs_timeout(&self) -> Duration {
        Duration::from_secs(self.ipfs_timeout_secs)
    }
}
