use std::time::Duration;

use async_trait::async_trait;

use crate::{CacheFamily, CacheKey, Result};

/// Invalidation counter of a cache family.
///
/// Every invalidation touching a family moves its generation forward. A
/// reader that samples the generation before loading from the source of
/// truth can tell whether its result went stale while in flight.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Generation(u64);

impl Generation {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for Generation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A short-lived key/value cache with family invalidation.
#[async_trait]
pub trait Cache: Send + Sync {
    /// Returns the cached value, or None if absent or expired.
    async fn get(&self, key: &CacheKey) -> Result<Option<Vec<u8>>>;

    /// Stores a value for `ttl` and registers the key with its family.
    async fn set(&self, key: &CacheKey, value: Vec<u8>, ttl: Duration) -> Result<()>;

    /// Current generation of `family`.
    async fn generation(&self, family: &CacheFamily) -> Result<Generation>;

    /// Stores a value only if the key's family is still at generation `seen`.
    ///
    /// Returns false, storing nothing, when the family was invalidated after
    /// `seen` was read.
    async fn set_if_current(
        &self,
        key: &CacheKey,
        value: Vec<u8>,
        ttl: Duration,
        seen: Generation,
    ) -> Result<bool>;

    /// Removes one key and advances its family's generation.
    async fn invalidate(&self, key: &CacheKey) -> Result<()>;

    /// Removes every live key of a family and advances its generation.
    /// Returns the number removed.
    async fn invalidate_family(&self, family: &CacheFamily) -> Result<usize>;
}
