//! Shared identifiers, tag queries, ordering tokens and result pages.

pub mod ids;
pub mod page;
pub mod position;
pub mod tags;

pub use ids::{AggregateKind, OrderId, ProductId};
pub use page::SearchPage;
pub use position::{LogPosition, OrderingToken};
pub use tags::{Fingerprint, Tag, TagParseError, TagSet};
