//! Persistent mirror of the ledger
//!
//! Layout (single sled tree, prefixed keys):
//!
//! ```text
//! post/<id u64 BE>   → Post (MessagePack)
//! tag/<tag utf-8>    → Vec<u64> ids carrying the tag
//! reg/<seq u64 BE>   → tag, registry position seq
//! meta/total         → u64 post counter
//! ```
//!
//! Every append is a single `sled::Batch`, so a post and its index
//! entries land together or not at all. On open the posts are replayed
//! into a fresh [`Ledger`] and the stored index and registry are checked
//! against the replay.

use super::{Ledger, Post};
use crate::error::StorageError;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sled::{Batch, Db};
use std::path::Path;
use tracing::{debug, info};

const POST_PREFIX: &[u8] = b"post/";
const TAG_PREFIX: &[u8] = b"tag/";
const REGISTRY_PREFIX: &[u8] = b"reg/";
const TOTAL_KEY: &[u8] = b"meta/total";

fn prefixed(prefix: &[u8], rest: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(prefix.len() + rest.len());
    key.extend_from_slice(prefix);
    key.extend_from_slice(rest);
    key
}

fn post_key(id: u64) -> Vec<u8> {
    prefixed(POST_PREFIX, &id.to_be_bytes())
}

fn tag_key(tag: &str) -> Vec<u8> {
    prefixed(TAG_PREFIX, tag.as_bytes())
}

fn registry_key(seq: u64) -> Vec<u8> {
    prefixed(REGISTRY_PREFIX, &seq.to_be_bytes())
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, StorageError> {
    rmp_serde::to_vec(value).map_err(|e| StorageError::Codec(format!("Serialization error: {}", e)))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StorageError> {
    rmp_serde::from_slice(bytes)
        .map_err(|e| StorageError::Codec(format!("Deserialization error: {}", e)))
}

/// Durable home of a ledger's history
#[async_trait]
pub trait PostStore: Send + Sync {
    /// Rebuild the ledger from stored history
    fn load(&self) -> Result<Ledger, StorageError>;

    /// Persist `post` atomically; `ledger` is the state before commit
    fn append(&self, post: &Post, ledger: &Ledger) -> Result<(), StorageError>;

    async fn flush(&self) -> Result<(), StorageError>;
}

/// sled-backed ledger persistence
pub struct LedgerStore {
    db: Db,
}

impl LedgerStore {
    /// Open or create the store at `path`
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let db = sled::open(path.as_ref())?;
        info!(path = %path.as_ref().display(), "Opened ledger store");
        Ok(Self { db })
    }

    /// Store that lives only as long as the process (for tests)
    pub fn temporary() -> Result<Self, StorageError> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self { db })
    }

    /// Persist `post`, which must be the next post for `ledger`.
    ///
    /// `ledger` is the state *before* the post is committed; it tells us
    /// which tags are new and where they go in the registry. The caller
    /// must hold the ledger's write lock across append and commit.
    pub fn append(&self, post: &Post, ledger: &Ledger) -> Result<(), StorageError> {
        if post.id != ledger.next_id() {
            return Err(StorageError::Internal(format!(
                "append out of order: post {} but next id is {}",
                post.id,
                ledger.next_id()
            )));
        }

        let mut batch = Batch::default();
        batch.insert(post_key(post.id), encode(post)?);

        let mut next_seq = ledger.get_all_tags().len() as u64;
        for tag in &post.tags {
            let mut ids = ledger.tag_ids(tag).to_vec();
            ids.push(post.id);
            batch.insert(tag_key(tag), encode(&ids)?);

            if !ledger.has_tag(tag) {
                batch.insert(registry_key(next_seq), encode(tag)?);
                next_seq += 1;
            }
        }

        batch.insert(TOTAL_KEY, encode(&post.id)?);
        self.db.apply_batch(batch)?;

        debug!(id = post.id, tags = post.tags.len(), "Persisted post");
        Ok(())
    }

    /// Rebuild the ledger from disk.
    pub fn load(&self) -> Result<Ledger, StorageError> {
        let mut ledger = Ledger::new();

        for item in self.db.scan_prefix(POST_PREFIX) {
            let (_, value) = item?;
            let post: Post = decode(&value)?;
            let id = post.id;
            ledger
                .commit(post)
                .map_err(|e| StorageError::Corrupt(format!("post {}: {}", id, e)))?;
        }

        self.verify(&ledger)?;

        info!(
            posts = ledger.total_posts(),
            tags = ledger.get_all_tags().len(),
            "Loaded ledger from store"
        );
        Ok(ledger)
    }

    /// Check the stored counter, index and registry against a replayed ledger.
    fn verify(&self, ledger: &Ledger) -> Result<(), StorageError> {
        let total: u64 = match self.db.get(TOTAL_KEY)? {
            Some(value) => decode(&value)?,
            None => 0,
        };
        if total != ledger.total_posts() {
            return Err(StorageError::Corrupt(format!(
                "counter says {} posts, found {}",
                total,
                ledger.total_posts()
            )));
        }

        let mut registry = Vec::new();
        for item in self.db.scan_prefix(REGISTRY_PREFIX) {
            let (_, value) = item?;
            registry.push(decode::<String>(&value)?);
        }
        if registry.as_slice() != ledger.get_all_tags() {
            return Err(StorageError::Corrupt(
                "tag registry does not match post history".to_string(),
            ));
        }

        let mut indexed = 0usize;
        for item in self.db.scan_prefix(TAG_PREFIX) {
            let (key, value) = item?;
            let tag = std::str::from_utf8(&key[TAG_PREFIX.len()..])
                .map_err(|e| StorageError::Corrupt(format!("tag key: {}", e)))?;
            let ids: Vec<u64> = decode(&value)?;
            if ids.as_slice() != ledger.tag_ids(tag) {
                return Err(StorageError::Corrupt(format!(
                    "index for tag '{}' does not match post history",
                    tag
                )));
            }
            indexed += 1;
        }
        if indexed != registry.len() {
            return Err(StorageError::Corrupt(format!(
                "{} indexed tags but {} registered",
                indexed,
                registry.len()
            )));
        }

        Ok(())
    }

    /// Flush pending writes to disk
    pub async fn flush(&self) -> Result<(), StorageError> {
        self.db.flush_async().await?;
        Ok(())
    }
}

#[async_trait]
impl PostStore for LedgerStore {
    fn load(&self) -> Result<Ledger, StorageError> {
        LedgerStore::load(self)
    }

    fn append(&self, post: &Post, ledger: &Ledger) -> Result<(), StorageError> {
        LedgerStore::append(self, post, ledger)
    }

    async fn flush(&self) -> Result<(), StorageError> {
        LedgerStore::flush(self).await
    }
}
