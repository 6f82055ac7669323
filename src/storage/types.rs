use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Database-specific errors with user-friendly messages
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Another process holds the database lock
    #[error("Another instance of upfeed appears to be running. Please close it and try again.")]
    InstanceLocked,

    /// Migration failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// Generic database error
    #[error("Database error: {0}")]
    Other(#[from] sqlx::Error),
}

impl DatabaseError {
    /// Classify a sqlx error, mapping SQLite lock conditions to `InstanceLocked`.
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        if is_lock_message(&err.to_string()) {
            return DatabaseError::InstanceLocked;
        }
        DatabaseError::Other(err)
    }
}

/// SQLITE_BUSY, SQLITE_LOCKED and SQLITE_CANTOPEN all surface as one of these.
pub(crate) fn is_lock_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("database is locked")
        || lower.contains("database table is locked")
        || lower.contains("sqlite_busy")
        || lower.contains("sqlite_locked")
        || lower.contains("unable to open database file")
}

// ============================================================================
// Data Structures
// ============================================================================

/// A user-defined grouping for channels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: String,
    pub name: String,
}

/// A registered feed source.
///
/// `id` never changes once the channel is created. Feed items embed a full
/// copy of their channel so they can be rendered (and bookmarked) without a
/// further catalog lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub id: String,
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub category: Option<Category>,
}

/// Fields accepted when registering a channel. The id is assigned by storage.
#[derive(Debug, Clone, Default)]
pub struct NewChannel {
    pub name: String,
    pub url: String,
    pub description: Option<String>,
    pub image_url: Option<String>,
    pub category_id: Option<String>,
}

/// Partial channel update. `None` leaves a field untouched; `Some(None)`
/// clears an optional field.
#[derive(Debug, Clone, Default)]
pub struct ChannelUpdate {
    pub name: Option<String>,
    pub url: Option<String>,
    pub description: Option<Option<String>>,
    pub image_url: Option<Option<String>>,
    pub category_id: Option<Option<String>>,
}

/// One normalized article from a channel's feed.
///
/// `bookmarked` is computed per aggregation pass. It is only ever stored as
/// `true`, on the snapshot kept in the bookmarks table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedItem {
    pub id: String,
    pub channel: Channel,
    pub title: String,
    pub link: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub tags: Option<String>,
    pub body: String,
    pub cover_image: Option<String>,
    pub bookmarked: bool,
}

// ============================================================================
// Row Types
// ============================================================================

/// Channel row joined with its category name.
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct ChannelRow {
    pub id: String,
    pub name: String,
    pub url: String,
    pub description: Option<String>,
    pub image_url: Option<String>,
    pub category_id: Option<String>,
    pub category_name: Option<String>,
}

impl ChannelRow {
    pub(crate) fn into_channel(self) -> Channel {
        let category = match (self.category_id, self.category_name) {
            (Some(id), Some(name)) => Some(Category { id, name }),
            _ => None,
        };
        Channel {
            id: self.id,
            name: self.name,
            url: self.url,
            description: self.description,
            image_url: self.image_url,
            category,
        }
    }
}

/// Bookmark row. The embedded channel is stored as JSON so the snapshot
/// survives edits to, or deletion of, the live channel.
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct BookmarkRow {
    pub id: String,
    pub channel_json: String,
    pub title: String,
    pub link: Option<String>,
    pub published: Option<i64>,
    pub tags: Option<String>,
    pub body: String,
    pub cover_image: Option<String>,
}

impl BookmarkRow {
    pub(crate) fn into_item(self) -> Result<FeedItem, serde_json::Error> {
        let channel: Channel = serde_json::from_str(&self.channel_json)?;
        Ok(FeedItem {
            id: self.id,
            channel,
            title: self.title,
            link: self.link,
            published_at: self.published.and_then(|ts| DateTime::from_timestamp(ts, 0)),
            tags: self.tags,
            body: self.body,
            cover_image: self.cover_image,
            bookmarked: true,
        })
    }
}
