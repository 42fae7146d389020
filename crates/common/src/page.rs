//! Search result pages.

use serde::{Deserialize, Serialize};

/// One page of search results plus the total number of matches.
///
/// `total` counts every match, even when `items` was truncated to a limit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchPage<T> {
    pub items: Vec<T>,
    pub total: u64,
}

impl<T> SearchPage<T> {
    pub fn new(items: Vec<T>, total: u64) -> Self {
        Self { items, total }
    }

    pub fn empty() -> Self {
        Self {
            items: Vec::new(),
            total: 0,
        }
    }
}

impl<T> Default for SearchPage<T> {
    fn default() -> Self {
        Self::empty()
    }
}
