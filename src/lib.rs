//! Permapost - append-only posting ledger with content-addressed storage
//!
//! Posts are never edited or deleted. Each post records a reference to
//! content kept in a content-addressed store, the publisher who created it,
//! and up to ten tags.
//!
//! ## Architecture
//!
//! - **Relay**: stores uploaded text and files, returns their references
//! - **Ledger**: assigns ids, indexes tags, answers queries
//! - **Ranking**: most-used tags, derived from the tag index
//! - **HTTP API**: hyper server in front of both
//!
//! A client uploads through the relay first, then records the returned
//! reference with `POST /api/posts`.
//!
//! ## Storage Layout
//!
//! ```text
//! ~/.local/share/permapost/
//! ├── content/               # Local blobs when no IPFS node is configured
//! │   └── blobs/9f86/bafkrei...
//! ├── ledger.sled/           # Posts, tag index, tag registry
//! └── config.toml            # Configuration
//! ```

pub mod blob_store;
pub mod config;
pub mod content_store;
pub mod error;
pub mod events;
pub mod events_ws;
pub mod http;
pub mod ipfs;
pub mod ledger;
pub mod relay;
pub mod response;
pub mod service;
pub mod tags;

// Re-exports
pub use blob_store::BlobStore;
pub use config::Config;
pub use content_store::{ContentStore, MemoryContentStore};
pub use error::{LedgerError, StorageError};
pub use events::{EventBus, LedgerEvent};
pub use http::HttpServer;
pub use ipfs::IpfsClient;
pub use ledger::{ContentType, Ledger, LedgerStore, Origin, Post, PostStore, TagCount};
pub use relay::{PostData, Relay, UploadResponse};
pub use service::{Clock, LedgerService, SystemClock};
pub use tags::{extract_tags, remove_tag_markers};
