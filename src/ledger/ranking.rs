//! Top-K tag ranking
//!
//! Counts are kept in an ordered set updated on every append, so a query
//! walks only the first `k` entries. Entries are ordered by count
//! descending, then by the tag's position in the registry, which makes
//! ties resolve to first-seen order.

use super::{positive_count, Ledger};
use crate::error::LedgerError;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::BTreeSet;

/// A tag and the number of posts carrying it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagCount {
    pub tag: String,
    pub count: usize,
}

/// Tags ordered by (count desc, registry position asc)
#[derive(Debug, Default, Clone)]
pub(crate) struct TagRanking {
    order: BTreeSet<(Reverse<usize>, usize)>,
}

impl TagRanking {
    /// Record one more post for the tag at `position`, which had `previous` posts.
    pub(crate) fn bump(&mut self, position: usize, previous: usize) {
        if previous > 0 {
            self.order.remove(&(Reverse(previous), position));
        }
        self.order.insert((Reverse(previous + 1), position));
    }

    /// `(position, count)` pairs, best first
    pub(crate) fn top(&self, limit: usize) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.order
            .iter()
            .take(limit)
            .map(|(Reverse(count), position)| (*position, *count))
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.order.len()
    }
}

impl Ledger {
    /// The `count` most used tags, most used first.
    ///
    /// Asking for more tags than exist returns all of them.
    pub fn get_top_tags(&self, count: i64) -> Result<Vec<TagCount>, LedgerError> {
        let limit = positive_count(count)?;
        let registry = self.get_all_tags();

        Ok(self
            .ranking
            .top(limit)
            .map(|(position, count)| TagCount {
                tag: registry[position].clone(),
                count,
            })
            .collect())
    }
}
