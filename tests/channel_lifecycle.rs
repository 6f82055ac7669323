//! Integration tests for the channel lifecycle: register, categorize, edit,
//! remove, and bookmark persistence across catalog changes.
//!
//! Each test creates its own in-memory SQLite database for isolation.

use chrono::{TimeZone, Utc};
use pretty_assertions::assert_eq;
use upfeed::storage::{BookmarkStore, ChannelCatalog, ChannelUpdate, Database, FeedItem, NewChannel};

async fn test_db() -> Database {
    Database::open(":memory:").await.unwrap()
}

fn new_channel(name: &str, url: &str) -> NewChannel {
    NewChannel {
        name: name.to_string(),
        url: url.to_string(),
        ..NewChannel::default()
    }
}

// ============================================================================
// Register
// ============================================================================

#[tokio::test]
async fn test_added_channels_get_increasing_ids() {
    let catalog = ChannelCatalog::load(test_db().await).await.unwrap();

    let a = catalog
        .add(new_channel("Alpha", "https://alpha.example.com/rss"))
        .await
        .unwrap();
    let b = catalog
        .add(new_channel("Beta", "https://beta.example.com/rss"))
        .await
        .unwrap();

    assert_eq!(a.id, "1");
    assert_eq!(b.id, "2");

    let ids: Vec<String> = catalog.list().iter().map(|c| c.id.clone()).collect();
    assert_eq!(ids, vec!["1", "2"]);
}

#[tokio::test]
async fn test_private_and_non_http_urls_rejected() {
    let catalog = ChannelCatalog::load(test_db().await).await.unwrap();

    for url in [
        "http://localhost/feed",
        "http://127.0.0.1/feed",
        "http://192.168.1.1/feed",
        "ftp://example.com/feed",
        "not a url",
    ] {
        assert!(
            catalog.add(new_channel("Bad", url)).await.is_err(),
            "{} should be rejected",
            url
        );
    }
    assert!(catalog.list().is_empty());
}

#[tokio::test]
async fn test_blank_name_rejected() {
    let catalog = ChannelCatalog::load(test_db().await).await.unwrap();
    assert!(catalog
        .add(new_channel("   ", "https://example.com/rss"))
        .await
        .is_err());
}

// ============================================================================
// Categorize
// ============================================================================

#[tokio::test]
async fn test_category_assignment_rename_and_delete() {
    let db = test_db().await;
    let catalog = ChannelCatalog::load(db.clone()).await.unwrap();
    let news = db.create_category("News").await.unwrap();

    let channel = catalog
        .add(NewChannel {
            category_id: Some(news.id.clone()),
            ..new_channel("Daily", "https://daily.example.com/rss")
        })
        .await
        .unwrap();
    assert_eq!(channel.category.as_ref().map(|c| c.name.as_str()), Some("News"));

    assert!(db.rename_category(&news.id, "World News").await.unwrap());
    catalog.reload().await.unwrap();
    let renamed = catalog.get(&channel.id).unwrap();
    assert_eq!(
        renamed.category.as_ref().map(|c| c.name.as_str()),
        Some("World News")
    );

    assert!(db.delete_category(&news.id).await.unwrap());
    catalog.reload().await.unwrap();
    let detached = catalog.get(&channel.id).unwrap();
    assert_eq!(detached.category, None);
}

#[tokio::test]
async fn test_unknown_category_rejected() {
    let catalog = ChannelCatalog::load(test_db().await).await.unwrap();
    let result = catalog
        .add(NewChannel {
            category_id: Some("42".into()),
            ..new_channel("Daily", "https://daily.example.com/rss")
        })
        .await;
    assert!(result.is_err());
}

// ============================================================================
// Edit / remove
// ============================================================================

#[tokio::test]
async fn test_edit_keeps_id_and_notifies_subscribers() {
    let catalog = ChannelCatalog::load(test_db().await).await.unwrap();
    let channel = catalog
        .add(NewChannel {
            description: Some("old".into()),
            ..new_channel("Alpha", "https://alpha.example.com/rss")
        })
        .await
        .unwrap();

    let mut rx = catalog.subscribe();
    let _ = rx.borrow_and_update();

    let updated = catalog
        .update(
            &channel.id,
            ChannelUpdate {
                name: Some("Alpha Prime".into()),
                description: Some(None),
                ..ChannelUpdate::default()
            },
        )
        .await
        .unwrap()
        .unwrap();

    assert_eq!(updated.id, channel.id);
    assert_eq!(updated.name, "Alpha Prime");
    assert_eq!(updated.url, "https://alpha.example.com/rss");
    assert_eq!(updated.description, None);

    assert!(rx.has_changed().unwrap());
    assert_eq!(rx.borrow_and_update()[0].name, "Alpha Prime");
}

#[tokio::test]
async fn test_update_and_remove_missing_channel() {
    let catalog = ChannelCatalog::load(test_db().await).await.unwrap();
    assert!(catalog
        .update("9", ChannelUpdate::default())
        .await
        .unwrap()
        .is_none());
    assert!(!catalog.remove("9").await.unwrap());
}

#[tokio::test]
async fn test_bookmarks_survive_channel_removal() {
    let db = test_db().await;
    let catalog = ChannelCatalog::load(db.clone()).await.unwrap();
    let channel = catalog
        .add(new_channel("Alpha", "https://alpha.example.com/rss"))
        .await
        .unwrap();

    let bookmarks = BookmarkStore::load(db.clone()).await.unwrap();
    let item = FeedItem {
        id: "https://alpha.example.com/post".into(),
        channel: channel.clone(),
        title: "Post".into(),
        link: Some("https://alpha.example.com/post".into()),
        published_at: Some(Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap()),
        tags: Some("a, b".into()),
        body: "<p>body</p>".into(),
        cover_image: None,
        bookmarked: false,
    };
    bookmarks.add(&item).await.unwrap();

    assert!(catalog.remove(&channel.id).await.unwrap());

    // A fresh store reads the snapshot back from disk
    let reloaded = BookmarkStore::load(db).await.unwrap();
    let saved = reloaded.snapshot();
    assert_eq!(saved.len(), 1);
    assert_eq!(saved[0].channel, channel);
    assert_eq!(saved[0].tags.as_deref(), Some("a, b"));
    assert!(saved[0].bookmarked);
}
