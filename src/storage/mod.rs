//! Local persistence: channel catalog, categories, bookmarks and settings.
//!
//! Everything lives in one SQLite file behind [`Database`]. The catalog and
//! bookmarks are additionally mirrored in memory by [`ChannelCatalog`] and
//! [`BookmarkStore`], which is what the aggregation pipeline reads.

mod bookmarks;
mod categories;
mod channels;
mod schema;
mod settings;
mod types;

pub use bookmarks::BookmarkStore;
pub use channels::ChannelCatalog;
pub use schema::Database;
pub use types::{Category, Channel, ChannelUpdate, DatabaseError, FeedItem, NewChannel};
