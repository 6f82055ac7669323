use std::cmp::Reverse;
use std::collections::HashSet;

use crate::storage::FeedItem;

/// Mark each item bookmarked iff its id is in `bookmarked`.
///
/// `bookmarked` is a point-in-time snapshot of the bookmark store. Items
/// keep their order.
pub fn reconcile(items: Vec<FeedItem>, bookmarked: &HashSet<String>) -> Vec<FeedItem> {
    items
        .into_iter()
        .map(|mut item| {
            item.bookmarked = bookmarked.contains(&item.id);
            item
        })
        .collect()
}

/// Newest first; undated items after every dated one. Stable, so items with
/// equal keys keep their merge order.
pub fn sort_by_published(items: &mut [FeedItem]) {
    // Reverse(None) sorts after every Reverse(Some(_))
    items.sort_by_key(|item| Reverse(item.published_at));
}
