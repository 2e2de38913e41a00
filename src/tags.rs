//! Hashtag extraction
//!
//! A tag is a `#` marker immediately followed by a run of ASCII letters,
//! ASCII digits or Han ideographs. Runs longer than [`MAX_TAG_CHARS`] are
//! not tags at all: the extractor skips them and the ledger rejects them,
//! so anything produced here is accepted by `Ledger::create_post` as far
//! as tag length goes.
//!
//! Both the relay and the HTTP search path call into this module; there is
//! no second copy of the pattern anywhere else.

use regex::{Captures, Regex};
use std::collections::HashSet;
use std::sync::OnceLock;

/// Longest tag accepted, in characters (not bytes).
pub const MAX_TAG_CHARS: usize = 50;

/// Most tags a single post may carry.
pub const MAX_TAGS_PER_POST: usize = 10;

/// Marker run in group 1, token in group 2.
///
/// Consecutive markers (`##rust`) belong to the same match so that
/// stripping them can never leave a fresh `#` in front of a token.
fn tag_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(#+)([A-Za-z0-9\p{Han}]+)").expect("tag pattern compiles")
    })
}

/// Tag length in characters
pub fn tag_len(tag: &str) -> usize {
    tag.chars().count()
}

fn within_limit(token: &str) -> bool {
    tag_len(token) <= MAX_TAG_CHARS
}

/// Extract distinct tags from text, in first-occurrence order.
///
/// Never fails; text without tags yields an empty vector.
pub fn extract_tags(text: &str) -> Vec<String> {
    let mut seen: HashSet<&str> = HashSet::new();

    tag_pattern()
        .captures_iter(text)
        .filter_map(|caps| caps.get(2))
        .map(|m| m.as_str())
        .filter(|token| within_limit(token))
        .filter(|token| seen.insert(*token))
        .map(str::to_owned)
        .collect()
}

/// Strip the `#` markers in front of every tag, keeping the tag text.
///
/// Over-long runs are left untouched since they are not tags.
pub fn remove_tag_markers(text: &str) -> String {
    tag_pattern()
        .replace_all(text, |caps: &Captures<'_>| {
            let token = &caps[2];
            if within_limit(token) {
                token.to_string()
            } else {
                caps[0].to_string()
            }
        })
        .into_owned()
}
