//! Cache-aside storage for serialized snapshots and search results.
//!
//! Keys belong to a family (the key minus its last segment). Each backend
//! keeps a reverse index from family to live keys so that a whole family can
//! be dropped without scanning the key space. Families also carry a
//! [`Generation`] so that a fill racing an invalidation can be discarded.

pub mod error;
pub mod keys;
pub mod memory;
pub mod redis;
pub mod store;

pub use error::{CacheError, Result};
pub use keys::{CacheFamily, CacheKey, KeySpace};
pub use memory::InMemoryCache;
pub use self::redis::RedisCache;
pub use store::{Cache, Generation};
