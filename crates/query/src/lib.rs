//! Read path: cache first, then the search mirror, then the read store.

pub mod error;
pub mod service;
pub mod single_flight;

pub use error::{QueryError, Result};
pub use service::{QueryService, QuerySettings};
pub use single_flight::SingleFlight;
