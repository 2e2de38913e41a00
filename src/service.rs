//! Ledger hosting
//!
//! `LedgerService` owns the one `Ledger` of the process. Writers are
//! serialized through a single `RwLock` write guard, which gives every
//! `create_post` a place in one total order; readers share the read guard
//! and always see a state between two whole posts.
//!
//! With a [`PostStore`] attached, a post is written to disk before it is
//! committed in memory, both under the write guard. If the disk write fails
//! the in-memory ledger is untouched.

use crate::error::{LedgerError, StorageError};
use crate::events::{EventBus, LedgerEvent};
use crate::ledger::{ContentType, Ledger, Origin, Post, PostStore, TagCount};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Source of creation timestamps
pub trait Clock: Send + Sync {
    /// Unix seconds
    fn now(&self) -> i64;
}

/// Wall clock
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }
}

/// Read-only snapshot of ledger size
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerStats {
    pub total_posts: u64,
    pub distinct_tags: usize,
}

pub struct LedgerService {
    ledger: RwLock<Ledger>,
    store: Option<Box<dyn PostStore>>,
    events: Arc<EventBus>,
    clock: Arc<dyn Clock>,
}

impl LedgerService {
    /// Memory-only ledger, lost on exit
    pub fn in_memory(events: Arc<EventBus>) -> Self {
        Self {
            ledger: RwLock::new(Ledger::new()),
            store: None,
            events,
            clock: Arc::new(SystemClock),
        }
    }

    /// Ledger restored from, and persisted to, `store`
    pub fn open<S>(store: S, events: Arc<EventBus>) -> Result<Self, StorageError>
    where
        S: PostStore + 'static,
    {
        let ledger = store.load()?;
        Ok(Self {
            ledger: RwLock::new(ledger),
            store: Some(Box::new(store)),
            events,
            clock: Arc::new(SystemClock),
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    // =========================================================================
    // Write Operations
    // =========================================================================

    /// Append a post on behalf of `publisher`.
    pub async fn create_post(
        &self,
        publisher: &str,
        content_ref: &str,
        content_type: ContentType,
        tags: &[String],
    ) -> Result<Post, StorageError> {
        let mut ledger = self.ledger.write().await;

        let origin = Origin::new(publisher, self.clock.now());
        let post = ledger.prepare_post(&origin, content_ref, content_type, tags)?;
        let new_tags: Vec<String> = post
            .tags
            .iter()
            .filter(|t| !ledger.has_tag(t))
            .cloned()
            .collect();

        if let Some(store) = &self.store {
            if let Err(e) = store.append(&post, &ledger) {
                warn!(id = post.id, error = %e, "Failed to persist post");
                return Err(e);
            }
        }

        let post = ledger.commit(post)?.clone();

        info!(
            id = post.id,
            content_ref = %post.content_ref,
            "Appended post"
        );

        // Emitted under the write guard so subscribers see ledger order
        for tag in new_tags {
            self.events.emit(LedgerEvent::TagRegistered {
                tag,
                first_post: post.id,
            });
        }
        self.events.emit(LedgerEvent::PostCreated { post: post.clone() });
        drop(ledger);

        Ok(post)
    }

    /// Flush persisted state, if any
    pub async fn flush(&self) -> Result<(), StorageError> {
        match &self.store {
            Some(store) => store.flush().await,
            None => Ok(()),
        }
    }

    // =========================================================================
    // Read Operations
    // =========================================================================

    pub async fn get_post(&self, id: u64) -> Result<Post, LedgerError> {
        self.ledger.read().await.get_post(id).cloned()
    }

    pub async fn get_latest(&self, count: i64) -> Result<Vec<Post>, LedgerError> {
        let ledger = self.ledger.read().await;
        Ok(ledger.get_latest(count)?.into_iter().cloned().collect())
    }

    pub async fn get_range(&self, start_id: u64, end_id: u64) -> Result<Vec<Post>, LedgerError> {
        let ledger = self.ledger.read().await;
        Ok(ledger.get_range(start_id, end_id)?.into_iter().cloned().collect())
    }

    pub async fn get_posts_by_tag(&self, tag: &str) -> Vec<Post> {
        let ledger = self.ledger.read().await;
        ledger.get_posts_by_tag(tag).into_iter().cloned().collect()
    }

    pub async fn get_post_count_by_tag(&self, tag: &str) -> usize {
        self.ledger.read().await.get_post_count_by_tag(tag)
    }

    pub async fn get_all_tags(&self) -> Vec<String> {
        self.ledger.read().await.get_all_tags().to_vec()
    }

    pub async fn get_top_tags(&self, count: i64) -> Result<Vec<TagCount>, LedgerError> {
        self.ledger.read().await.get_top_tags(count)
    }

    pub async fn total_posts(&self) -> u64 {
        self.ledger.read().await.total_posts()
    }

    pub async fn post_exists(&self, id: u64) -> bool {
        self.ledger.read().await.post_exists(id)
    }

    pub async fn get_post_count_by_publisher(&self, publisher: &str) -> usize {
        self.ledger.read().await.get_post_count_by_publisher(publisher)
    }

    /// Distinct content references, in order of first use
    pub async fn content_refs(&self) -> Vec<String> {
        let ledger = self.ledger.read().await;
        let mut seen = HashSet::new();
        ledger
            .posts()
            .iter()
            .filter(|p| seen.insert(p.content_ref.as_str()))
            .map(|p| p.content_ref.clone())
            .collect()
    }

    /// Posts whose reference is in `refs`, ascending by id
    pub async fn get_posts_by_content_refs(&self, refs: &HashSet<String>) -> Vec<Post> {
        let ledger = self.ledger.read().await;
        ledger
            .posts()
            .iter()
            .filter(|p| refs.contains(&p.content_ref))
            .cloned()
            .collect()
    }

    pub async fn stats(&self) -> LedgerStats {
        let ledger = self.ledger.read().await;
        LedgerStats {
            total_posts: ledger.total_posts(),
            distinct_tags: ledger.get_all_tags().len(),
        }
    }
}
