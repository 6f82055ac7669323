use anyhow::{Context, Result};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::watch;

use super::schema::Database;
use super::types::{BookmarkRow, FeedItem};

impl Database {
    // ========================================================================
    // Bookmark Operations
    // ========================================================================

    /// Store a full snapshot of `item`. Saving an id twice replaces the
    /// earlier snapshot.
    pub async fn insert_bookmark(&self, item: &FeedItem) -> Result<()> {
        let channel_json =
            serde_json::to_string(&item.channel).context("Failed to serialize channel snapshot")?;

        sqlx::query(
            r#"
            INSERT INTO bookmarks
                (id, channel_id, channel_json, title, link, published, tags, body, cover_image, saved_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                channel_id = excluded.channel_id,
                channel_json = excluded.channel_json,
                title = excluded.title,
                link = excluded.link,
                published = excluded.published,
                tags = excluded.tags,
                body = excluded.body,
                cover_image = excluded.cover_image
        "#,
        )
        .bind(&item.id)
        .bind(&item.channel.id)
        .bind(&channel_json)
        .bind(&item.title)
        .bind(&item.link)
        .bind(item.published_at.map(|dt| dt.timestamp()))
        .bind(&item.tags)
        .bind(&item.body)
        .bind(&item.cover_image)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Returns `false` if nothing was bookmarked under `id`.
    pub async fn delete_bookmark(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM bookmarks WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// All bookmarks, newest publication first, undated ones last.
    ///
    /// A row whose channel snapshot cannot be decoded is skipped with a
    /// warning rather than failing the whole list.
    pub async fn get_bookmarks(&self) -> Result<Vec<FeedItem>> {
        let rows: Vec<BookmarkRow> = sqlx::query_as(
            r#"
            SELECT id, channel_json, title, link, published, tags, body, cover_image
            FROM bookmarks
            ORDER BY published IS NULL, published DESC, saved_at DESC
        "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let items = rows
            .into_iter()
            .filter_map(|row| {
                let id = row.id.clone();
                match row.into_item() {
                    Ok(item) => Some(item),
                    Err(e) => {
                        tracing::warn!(bookmark = %id, error = %e, "Skipping bookmark with unreadable channel snapshot");
                        None
                    }
                }
            })
            .collect();

        Ok(items)
    }
}

// ============================================================================
// Bookmark Store
// ============================================================================

/// Bookmarks held in memory and written through to SQLite.
///
/// Two access modes:
/// - [`snapshot`](Self::snapshot) is a point-in-time copy. The aggregation
///   pipeline only ever uses this, so bookmark edits never retrigger a pass.
/// - [`subscribe`](Self::subscribe) yields a `watch` receiver for views that
///   must re-render when bookmarks change.
///
/// `add` and `remove` are independent single-row writes and may run while a
/// pass is in flight; that pass's annotations are then stale until the next
/// one.
#[derive(Clone)]
pub struct BookmarkStore {
    db: Database,
    state: Arc<watch::Sender<Arc<Vec<FeedItem>>>>,
}

impl BookmarkStore {
    pub async fn load(db: Database) -> Result<Self> {
        let items = db.get_bookmarks().await.context("Failed to load bookmarks")?;
        tracing::debug!(count = items.len(), "Loaded bookmarks");
        let (tx, _rx) = watch::channel(Arc::new(items));
        Ok(Self {
            db,
            state: Arc::new(tx),
        })
    }

    pub fn snapshot(&self) -> Arc<Vec<FeedItem>> {
        self.state.borrow().clone()
    }

    /// Ids in the current snapshot.
    pub fn snapshot_ids(&self) -> HashSet<String> {
        self.state.borrow().iter().map(|i| i.id.clone()).collect()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<Vec<FeedItem>>> {
        self.state.subscribe()
    }

    pub fn is_bookmarked(&self, id: &str) -> bool {
        self.state.borrow().iter().any(|i| i.id == id)
    }

    /// Persist `item` and add it to the in-memory list.
    pub async fn add(&self, item: &FeedItem) -> Result<()> {
        self.db.insert_bookmark(item).await?;

        let mut saved = item.clone();
        saved.bookmarked = true;
        self.state.send_modify(|items| {
            let mut next: Vec<FeedItem> = items.iter().filter(|i| i.id != saved.id).cloned().collect();
            next.insert(0, saved);
            *items = Arc::new(next);
        });

        tracing::info!(id = %item.id, channel = %item.channel.name, "Bookmarked item");
        Ok(())
    }

    /// Remove a bookmark. Returns `false` if it was not stored.
    pub async fn remove(&self, id: &str) -> Result<bool> {
        let removed = self.db.delete_bookmark(id).await?;
        if removed {
            self.state.send_modify(|items| {
                *items = Arc::new(items.iter().filter(|i| i.id != id).cloned().collect());
            });
            tracing::info!(id = %id, "Removed bookmark");
        }
        Ok(removed)
    }

    /// Bookmark `item` if it is not bookmarked, otherwise remove it.
    /// Returns the new bookmarked state.
    pub async fn toggle(&self, item: &FeedItem) -> Result<bool> {
        if self.is_bookmarked(&item.id) {
            self.remove(&item.id).await?;
            Ok(false)
        } else {
            self.add(item).await?;
            Ok(true)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{Category, Channel};
    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;

    async fn test_db() -> Database {
        Database::open(":memory:").await.unwrap()
    }

    fn item(id: &str, published: Option<i64>) -> FeedItem {
        FeedItem {
            id: id.into(),
            channel: Channel {
                id: "1".into(),
                name: "Blog".into(),
                url: "https://blog.example.com/rss".into(),
                description: None,
                image_url: None,
                category: Some(Category {
                    id: "3".into(),
                    name: "Tech".into(),
                }),
            },
            title: format!("Title {}", id),
            link: Some(format!("https://blog.example.com/{}", id)),
            published_at: published.map(|ts| Utc.timestamp_opt(ts, 0).unwrap()),
            tags: Some("rust, feeds".into()),
            body: "<p>body</p>".into(),
            cover_image: None,
            bookmarked: false,
        }
    }

    #[tokio::test]
    async fn test_bookmark_roundtrip_keeps_full_snapshot() {
        let db = test_db().await;
        let original = item("a", Some(1_700_000_000));

        db.insert_bookmark(&original).await.unwrap();
        let stored = db.get_bookmarks().await.unwrap();

        let mut expected = original.clone();
        expected.bookmarked = true;
        assert_eq!(stored, vec![expected]);
    }

    #[tokio::test]
    async fn test_bookmarks_ordered_newest_first_undated_last() {
        let db = test_db().await;
        db.insert_bookmark(&item("undated", None)).await.unwrap();
        db.insert_bookmark(&item("old", Some(1_000))).await.unwrap();
        db.insert_bookmark(&item("new", Some(2_000))).await.unwrap();

        let ids: Vec<String> = db
            .get_bookmarks()
            .await
            .unwrap()
            .into_iter()
            .map(|i| i.id)
            .collect();
        assert_eq!(ids, vec!["new", "old", "undated"]);
    }

    #[tokio::test]
    async fn test_bookmark_survives_channel_deletion() {
        let db = test_db().await;
        db.insert_bookmark(&item("a", None)).await.unwrap();

        db.delete_channel("1").await.unwrap();

        let stored = db.get_bookmarks().await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].channel.name, "Blog");
    }

    #[tokio::test]
    async fn test_store_snapshot_is_point_in_time() {
        let db = test_db().await;
        let store = BookmarkStore::load(db).await.unwrap();

        let before = store.snapshot();
        store.add(&item("a", None)).await.unwrap();

        assert!(before.is_empty());
        assert_eq!(store.snapshot().len(), 1);
        assert!(store.snapshot()[0].bookmarked);
        assert!(store.is_bookmarked("a"));
    }

    #[tokio::test]
    async fn test_store_subscribers_see_changes() {
        let db = test_db().await;
        let store = BookmarkStore::load(db).await.unwrap();
        let mut rx = store.subscribe();

        store.add(&item("a", None)).await.unwrap();
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().len(), 1);

        assert!(store.remove("a").await.unwrap());
        assert!(rx.has_changed().unwrap());
        assert!(rx.borrow_and_update().is_empty());
    }

    #[tokio::test]
    async fn test_store_toggle_and_reload() {
        let db = test_db().await;
        let store = BookmarkStore::load(db.clone()).await.unwrap();
        let it = item("a", Some(5));

        assert!(store.toggle(&it).await.unwrap());
        assert!(!store.toggle(&it).await.unwrap());
        assert!(store.toggle(&it).await.unwrap());

        let reloaded = BookmarkStore::load(db).await.unwrap();
        assert_eq!(reloaded.snapshot_ids(), HashSet::from(["a".to_string()]));
        assert!(!store.remove("missing").await.unwrap());
    }

    #[tokio::test]
    async fn test_re_adding_replaces_snapshot() {
        let db = test_db().await;
        let store = BookmarkStore::load(db).await.unwrap();

        store.add(&item("a", None)).await.unwrap();
        let mut edited = item("a", None);
        edited.title = "Edited".into();
        store.add(&edited).await.unwrap();

        let snap = store.snapshot();
        assert_eq!(snap.len(), 1);
        assert_eq!(snap[0].title, "Edited");
    }
}
