use thiserror::Error;

/// Errors raised by a cache backend.
///
/// Callers treat every cache error as a miss or a skipped write.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The cache cannot be reached.
    #[error("Cache unavailable")]
    Unavailable,

    /// A Redis command failed.
    #[error("Redis error: {0}")]
    Redis(#[from] ::redis::RedisError),
}

/// Result type for cache operations.
pub type Result<T> = std::result::Result<T, CacheError>;
