//! Feed retrieval and normalization.
//!
//! - [`fetcher`] - one HTTP GET per channel, bounded by a timeout and a size cap
//! - [`xml`] - permissive XML to `serde_json::Value` tree builder
//! - [`shape`] - helpers that flatten repeated or wrapped fields
//! - [`normalizer`] - item nodes to [`FeedItem`](crate::storage::FeedItem)
//!
//! # Example
//!
//! ```ignore
//! use upfeed::feed::{fetch_document, normalize_document, FetchLimits};
//!
//! let body = fetch_document(&client, &channel, FetchLimits::default()).await?;
//! let parsed = normalize_document(&body, &channel)?;
//! ```

pub mod fetcher;
pub mod normalizer;
pub mod shape;
pub mod xml;

pub use fetcher::{fetch_document, FetchError, FetchLimits};
pub use normalizer::{normalize_document, normalize_item, DocumentError, ParsedDocument};
