pub mod error;
pub mod memory;
pub mod postgres;
pub mod store;

pub use error::{ReadStoreError, Result};
pub use memory::InMemoryReadStore;
pub use postgres::PostgresReadStore;
pub use store::{OrderStore, ProductStore, ReadStore};
