use thiserror::Error;

/// Errors raised by a search mirror.
#[derive(Debug, Error)]
pub enum SearchError {
    /// The mirror cannot be reached.
    #[error("Search mirror unavailable")]
    Unavailable,

    /// The backend rejected or failed the request.
    #[error("Search backend error: {0}")]
    Backend(String),
}

/// Result type for search mirror operations.
pub type Result<T> = std::result::Result<T, SearchError>;
