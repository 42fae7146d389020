//! Secondary search index over product snapshots.
//!
//! The mirror is best-effort: the read store stays authoritative and callers
//! fall back to it when the mirror fails.

pub mod error;
pub mod memory;
pub mod mirror;

pub use error::{Result, SearchError};
pub use memory::InMemorySearchIndex;
pub use mirror::SearchMirror;
