//! Error types for permapost

use crate::tags::{MAX_TAGS_PER_POST, MAX_TAG_CHARS};
use thiserror::Error;

/// Rejections raised by the post ledger.
///
/// Every variant is produced before any state is touched, so a failed
/// call never leaves a partially applied post behind.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("Invalid content reference: must not be empty")]
    InvalidReference,

    #[error("Too many tags: {0} given, at most {max} allowed", max = MAX_TAGS_PER_POST)]
    TooManyTags(usize),

    #[error("Empty tag at position {0}")]
    EmptyTag(usize),

    #[error("Tag too long: '{0}' exceeds {max} characters", max = MAX_TAG_CHARS)]
    TagTooLong(String),

    #[error("Post not found: {0}")]
    NotFound(u64),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("Content not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid content format: {0}")]
    InvalidContent(String),

    #[error("Hash mismatch: expected {expected}, got {actual}")]
    HashMismatch { expected: String, actual: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] sled::Error),

    #[error("Codec error: {0}")]
    Codec(String),

    #[error("Persisted ledger is inconsistent: {0}")]
    Corrupt(String),

    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<reqwest::Error> for StorageError {
    fn from(e: reqwest::Error) -> Self {
        StorageError::Upstream(e.to_string())
    }
}
