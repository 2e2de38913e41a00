//! Append-only post ledger
//!
//! Posts are stored in creation order and never change afterwards. Everything
//! else is derived from them incrementally on every append:
//!
//! - the **tag index**: tag → ids of the posts carrying it, ascending
//! - the **tag registry**: every distinct tag, in first-seen order
//! - the tag ranking behind [`Ledger::get_top_tags`]
//! - post counts per publisher
//!
//! `Ledger` itself is a plain owned struct: mutation takes `&mut self`, and
//! whoever hosts it decides how writers are serialized (see
//! [`crate::service::LedgerService`]). The creation timestamp and the
//! publisher identity come from an [`Origin`] supplied by the host, never
//! from the caller's payload.

pub mod ranking;
pub mod store;

pub use ranking::TagCount;
pub use store::{LedgerStore, PostStore};

use crate::error::LedgerError;
use ranking::TagRanking;
use crate::tags::{tag_len, MAX_TAGS_PER_POST, MAX_TAG_CHARS};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

/// Kind of content a post refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Text,
    Image,
    Video,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Text => "text",
            ContentType::Image => "image",
            ContentType::Video => "video",
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContentType {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(ContentType::Text),
            "image" => Ok(ContentType::Image),
            "video" => Ok(ContentType::Video),
            other => Err(LedgerError::InvalidArgument(format!(
                "unknown content type '{}'",
                other
            ))),
        }
    }
}

/// One immutable ledger record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub id: u64,
    pub content_ref: String,
    pub content_type: ContentType,
    /// Unix seconds, assigned by the host at creation
    pub created_at: i64,
    pub publisher: String,
    pub tags: Vec<String>,
}

/// Who is calling and when, as seen by the hosting environment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Origin {
    pub publisher: String,
    pub timestamp: i64,
}

impl Origin {
    pub fn new(publisher: impl Into<String>, timestamp: i64) -> Self {
        Self {
            publisher: publisher.into(),
            timestamp,
        }
    }
}

/// Convert a caller-supplied count into a usable limit.
pub(crate) fn positive_count(count: i64) -> Result<usize, LedgerError> {
    if count <= 0 {
        return Err(LedgerError::InvalidArgument(format!(
            "count must be positive, got {}",
            count
        )));
    }
    Ok(usize::try_from(count).unwrap_or(usize::MAX))
}

/// The ledger state.
///
/// `posts[i].id == i + 1` always holds, so the post counter is simply
/// `posts.len()` and the id range can never develop gaps.
#[derive(Debug, Default, Clone)]
pub struct Ledger {
    posts: Vec<Post>,
    tag_index: HashMap<String, TagEntry>,
    tag_registry: Vec<String>,
    ranking: TagRanking,
    publisher_counts: HashMap<String, usize>,
}

#[derive(Debug, Clone)]
struct TagEntry {
    /// Position in the registry
    position: usize,
    ids: Vec<u64>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    // =========================================================================
    // Write Operations
    // =========================================================================

    /// Validate a submission and build the post it would become.
    ///
    /// Nothing is modified; pair with [`Ledger::commit`]. Hosts that persist
    /// state write the returned post to disk between the two calls.
    pub fn prepare_post(
        &self,
        origin: &Origin,
        content_ref: &str,
        content_type: ContentType,
        tags: &[String],
    ) -> Result<Post, LedgerError> {
        if content_ref.is_empty() {
            return Err(LedgerError::InvalidReference);
        }
        if tags.len() > MAX_TAGS_PER_POST {
            return Err(LedgerError::TooManyTags(tags.len()));
        }
        for (i, tag) in tags.iter().enumerate() {
            if tag.is_empty() {
                return Err(LedgerError::EmptyTag(i));
            }
            if tag_len(tag) > MAX_TAG_CHARS {
                return Err(LedgerError::TagTooLong(tag.clone()));
            }
        }

        // Repeats within one submission collapse, first position wins
        let mut seen = HashSet::with_capacity(tags.len());
        let tags: Vec<String> = tags
            .iter()
            .filter(|t| seen.insert(t.as_str()))
            .cloned()
            .collect();

        Ok(Post {
            id: self.next_id(),
            content_ref: content_ref.to_string(),
            content_type,
            created_at: origin.timestamp,
            publisher: origin.publisher.clone(),
            tags,
        })
    }

    /// Append a prepared post and index its tags.
    ///
    /// Fails if the post does not carry the next id, which happens when a
    /// prepared post is committed twice or posts are replayed out of order.
    pub fn commit(&mut self, post: Post) -> Result<&Post, LedgerError> {
        let expected = self.next_id();
        if post.id != expected {
            return Err(LedgerError::InvalidArgument(format!(
                "expected post id {}, got {}",
                expected, post.id
            )));
        }

        for tag in &post.tags {
            match self.tag_index.get_mut(tag) {
                Some(entry) => {
                    self.ranking.bump(entry.position, entry.ids.len());
                    entry.ids.push(post.id);
                }
                None => {
                    let position = self.tag_registry.len();
                    self.tag_index.insert(
                        tag.clone(),
                        TagEntry {
                            position,
                            ids: vec![post.id],
                        },
                    );
                    self.tag_registry.push(tag.clone());
                    self.ranking.bump(position, 0);
                }
            }
        }

        *self
            .publisher_counts
            .entry(post.publisher.clone())
            .or_insert(0) += 1;
        self.posts.push(post);
        Ok(&self.posts[self.posts.len() - 1])
    }

    /// Validate and append in one step.
    pub fn create_post(
        &mut self,
        origin: &Origin,
        content_ref: &str,
        content_type: ContentType,
        tags: &[String],
    ) -> Result<&Post, LedgerError> {
        let post = self.prepare_post(origin, content_ref, content_type, tags)?;
        self.commit(post)
    }

    // =========================================================================
    // Read Operations
    // =========================================================================

    pub fn next_id(&self) -> u64 {
        self.posts.len() as u64 + 1
    }

    pub fn total_posts(&self) -> u64 {
        self.posts.len() as u64
    }

    pub fn post_exists(&self, id: u64) -> bool {
        id >= 1 && id <= self.total_posts()
    }

    pub fn get_post(&self, id: u64) -> Result<&Post, LedgerError> {
        if !self.post_exists(id) {
            return Err(LedgerError::NotFound(id));
        }
        Ok(&self.posts[(id - 1) as usize])
    }

    /// Up to `count` most recent posts, newest first.
    pub fn get_latest(&self, count: i64) -> Result<Vec<&Post>, LedgerError> {
        let limit = positive_count(count)?;
        Ok(self.posts.iter().rev().take(limit).collect())
    }

    /// Posts with ids in `[start_id, end_id]`, ascending.
    pub fn get_range(&self, start_id: u64, end_id: u64) -> Result<Vec<&Post>, LedgerError> {
        if end_id < start_id {
            return Err(LedgerError::InvalidArgument(format!(
                "end id {} is before start id {}",
                end_id, start_id
            )));
        }
        if !self.post_exists(start_id) || !self.post_exists(end_id) {
            return Err(LedgerError::InvalidArgument(format!(
                "range [{}, {}] is outside [1, {}]",
                start_id,
                end_id,
                self.total_posts()
            )));
        }
        Ok(self.posts[(start_id - 1) as usize..end_id as usize].iter().collect())
    }

    /// Posts carrying `tag`, oldest first. Unknown tags yield nothing.
    pub fn get_posts_by_tag(&self, tag: &str) -> Vec<&Post> {
        self.tag_ids(tag)
            .iter()
            .map(|id| &self.posts[(*id - 1) as usize])
            .collect()
    }

    pub fn get_post_count_by_tag(&self, tag: &str) -> usize {
        self.tag_ids(tag).len()
    }

    /// Distinct tags in first-seen order
    pub fn get_all_tags(&self) -> &[String] {
        &self.tag_registry
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tag_index.contains_key(tag)
    }

    /// Ids indexed under `tag`, ascending
    pub fn tag_ids(&self, tag: &str) -> &[u64] {
        self.tag_index.get(tag).map_or(&[], |entry| entry.ids.as_slice())
    }

    /// Number of posts created by `publisher`
    pub fn get_post_count_by_publisher(&self, publisher: &str) -> usize {
        self.publisher_counts.get(publisher).copied().unwrap_or(0)
    }

    /// All posts, ascending by id
    pub fn posts(&self) -> &[Post] {
        &self.posts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(list: &[&str]) -> Vec<String> {
        list.iter().map(|t| t.to_string()).collect()
    }

    fn origin() -> Origin {
        Origin::new("0xabc", 1_700_000_000)
    }

    fn ledger_with(posts: &[&[&str]]) -> Ledger {
        let mut ledger = Ledger::new();
        for (i, post_tags) in posts.iter().enumerate() {
            ledger
                .create_post(&origin(), &format!("ref-{}", i + 1), ContentType::Text, &tags(post_tags))
                .unwrap();
        }
        ledger
    }

    #[test]
    fn test_ids_are_contiguous_from_one() {
        let ledger = ledger_with(&[&[], &["a"], &[]]);
        assert_eq!(ledger.total_posts(), 3);
        for id in 1..=3 {
            assert_eq!(ledger.get_post(id).unwrap().id, id);
        }
        assert_eq!(ledger.get_post(0), Err(LedgerError::NotFound(0)));
        assert_eq!(ledger.get_post(4), Err(LedgerError::NotFound(4)));
    }

    #[test]
    fn test_post_records_origin() {
        let mut ledger = Ledger::new();
        let post = ledger
            .create_post(&Origin::new("alice", 42), "bafyref", ContentType::Image, &tags(&["cat"]))
            .unwrap();
        assert_eq!(post.publisher, "alice");
        assert_eq!(post.created_at, 42);
        assert_eq!(post.content_type, ContentType::Image);
        assert_eq!(post.content_ref, "bafyref");
    }

    #[test]
    fn test_validation_errors() {
        let mut ledger = Ledger::new();
        let o = origin();

        assert_eq!(
            ledger.create_post(&o, "", ContentType::Text, &[]).unwrap_err(),
            LedgerError::InvalidReference
        );
        assert_eq!(
            ledger
                .create_post(&o, "h", ContentType::Text, &vec!["x".to_string(); 11])
                .unwrap_err(),
            LedgerError::TooManyTags(11)
        );
        assert_eq!(
            ledger.create_post(&o, "h", ContentType::Text, &tags(&[""])).unwrap_err(),
            LedgerError::EmptyTag(0)
        );
        let long = "a".repeat(51);
        assert_eq!(
            ledger
                .create_post(&o, "h", ContentType::Text, &[long.clone()])
                .unwrap_err(),
            LedgerError::TagTooLong(long)
        );

        assert_eq!(ledger.total_posts(), 0);
        assert!(ledger.get_all_tags().is_empty());
    }

    #[test]
    fn test_rejection_leaves_index_untouched() {
        let mut ledger = ledger_with(&[&["a"]]);
        let bad = tags(&["a", "new", ""]);
        assert!(ledger.create_post(&origin(), "h", ContentType::Text, &bad).is_err());
        assert_eq!(ledger.get_post_count_by_tag("a"), 1);
        assert!(!ledger.has_tag("new"));
        assert_eq!(ledger.next_id(), 2);
    }

    #[test]
    fn test_boundary_values_accepted() {
        let mut ledger = Ledger::new();
        let ten: Vec<String> = (0..10).map(|i| format!("t{}", i)).collect();
        ledger.create_post(&origin(), "h", ContentType::Text, &ten).unwrap();
        ledger
            .create_post(&origin(), "h", ContentType::Text, &["a".repeat(50)])
            .unwrap();
        assert_eq!(ledger.total_posts(), 2);
    }

    #[test]
    fn test_tag_index_in_creation_order() {
        let ledger = ledger_with(&[&["t1", "t2"], &["t1"]]);
        let ids: Vec<u64> = ledger.get_posts_by_tag("t1").iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![1, 2]);
        assert_eq!(ledger.get_post_count_by_tag("t1"), 2);
        assert_eq!(ledger.get_post_count_by_tag("t2"), 1);
    }

    #[test]
    fn test_unknown_tag_is_empty() {
        let ledger = ledger_with(&[&["a"]]);
        assert!(ledger.get_posts_by_tag("missing").is_empty());
        assert_eq!(ledger.get_post_count_by_tag("missing"), 0);
    }

    #[test]
    fn test_registry_first_seen_without_duplicates() {
        let ledger = ledger_with(&[&["b", "a"], &["a", "c"], &["b"], &["c", "d"]]);
        assert_eq!(ledger.get_all_tags(), &tags(&["b", "a", "c", "d"])[..]);
    }

    #[test]
    fn test_duplicate_tags_in_one_post_collapse() {
        let ledger = ledger_with(&[&["x", "y", "x"]]);
        assert_eq!(ledger.get_post(1).unwrap().tags, tags(&["x", "y"]));
        assert_eq!(ledger.tag_ids("x"), &[1]);
    }

    #[test]
    fn test_latest_newest_first() {
        let ledger = ledger_with(&[&[], &[], &[]]);
        let ids: Vec<u64> = ledger.get_latest(2).unwrap().iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![3, 2]);

        let all: Vec<u64> = ledger.get_latest(10).unwrap().iter().map(|p| p.id).collect();
        assert_eq!(all, vec![3, 2, 1]);

        assert!(matches!(ledger.get_latest(0), Err(LedgerError::InvalidArgument(_))));
        assert!(matches!(ledger.get_latest(-1), Err(LedgerError::InvalidArgument(_))));
        assert!(Ledger::new().get_latest(5).unwrap().is_empty());
    }

    #[test]
    fn test_range() {
        let ledger = ledger_with(&[&[], &[], &[], &[]]);
        let ids: Vec<u64> = ledger.get_range(2, 4).unwrap().iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![2, 3, 4]);
        assert_eq!(ledger.get_range(3, 3).unwrap().len(), 1);

        assert!(matches!(ledger.get_range(3, 2), Err(LedgerError::InvalidArgument(_))));
        assert!(matches!(ledger.get_range(0, 2), Err(LedgerError::InvalidArgument(_))));
        assert!(matches!(ledger.get_range(1, 5), Err(LedgerError::InvalidArgument(_))));
    }

    #[test]
    fn test_post_exists() {
        let ledger = ledger_with(&[&[]]);
        assert!(!ledger.post_exists(0));
        assert!(ledger.post_exists(1));
        assert!(!ledger.post_exists(2));
    }

    #[test]
    fn test_count_by_publisher() {
        let mut ledger = Ledger::new();
        for who in ["alice", "bob", "alice"] {
            ledger
                .create_post(&Origin::new(who, 0), "h", ContentType::Text, &[])
                .unwrap();
        }
        assert_eq!(ledger.get_post_count_by_publisher("alice"), 2);
        assert_eq!(ledger.get_post_count_by_publisher("bob"), 1);
        assert_eq!(ledger.get_post_count_by_publisher("carol"), 0);
    }

    #[test]
    fn test_commit_rejects_wrong_id() {
        let mut ledger = Ledger::new();
        let post = ledger
            .prepare_post(&origin(), "h", ContentType::Text, &[])
            .unwrap();
        ledger.commit(post.clone()).unwrap();
        assert!(matches!(ledger.commit(post), Err(LedgerError::InvalidArgument(_))));
        assert_eq!(ledger.total_posts(), 1);
    }

    #[test]
    fn test_content_type_parsing() {
        assert_eq!("IMAGE".parse::<ContentType>().unwrap(), ContentType::Image);
        assert_eq!(ContentType::Video.to_string(), "video");
        assert!("audio".parse::<ContentType>().is_err());
    }
}
