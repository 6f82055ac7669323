//! Aggregation of many channels into one feed.
//!
//! A pass fetches and normalizes every selected channel at once, unless a
//! concurrency cap is configured. It waits for all of them, annotates the
//! merged items with bookmark state, and sorts them newest first. A channel that fails contributes nothing and at most
//! one error message reaches the caller; the rest are logged.
//!
//! - [`Aggregator`] runs one pass and returns a [`FeedView`]
//! - [`FeedSession`] numbers passes and publishes only the latest one
//! - [`reconcile`] / [`sort_by_published`] are the pure merge steps

mod reconcile;
mod session;

pub use reconcile::{reconcile, sort_by_published};
pub use session::{FeedSession, PassId};

use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::feed::{fetch_document, normalize_document, DocumentError, FetchError, FetchLimits};
use crate::storage::{BookmarkStore, Channel, FeedItem};

// ============================================================================
// Target
// ============================================================================

/// Which channels a pass covers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Target {
    /// Every channel in the catalog.
    All,
    /// The bookmarks only. No network access.
    Bookmarked,
    /// One channel by id.
    Channel(String),
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::All => f.write_str("all"),
            Target::Bookmarked => f.write_str("bookmarked"),
            Target::Channel(id) => f.write_str(id),
        }
    }
}

impl FromStr for Target {
    type Err = AggregateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "" => Err(AggregateError::EmptyTarget),
            "all" => Ok(Target::All),
            "bookmarked" | "mark" => Ok(Target::Bookmarked),
            id => Ok(Target::Channel(id.to_string())),
        }
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Pass-level errors. Their `Display` text is what [`FeedView::error`] holds.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AggregateError {
    #[error("Channel {0} not found.")]
    ChannelNotFound(String),

    #[error("Failed to fetch one of the feeds ({0}).")]
    FetchFailed(String),

    #[error("Empty target")]
    EmptyTarget,
}

/// What went wrong for one channel.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Document(#[from] DocumentError),
}

/// A channel's failure with the channel it belongs to.
#[derive(Debug, Error)]
#[error("{channel_name} ({channel_id}): {error}")]
pub struct ChannelFailure {
    pub channel_id: String,
    pub channel_name: String,
    #[source]
    pub error: ChannelError,
}

// ============================================================================
// FeedView
// ============================================================================

/// Outcome of a pass as presented to the user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FeedView {
    pub items: Vec<FeedItem>,
    pub is_loading: bool,
    /// At most one message per pass, even when several channels failed.
    pub error: Option<String>,
}

/// Where a pass stands, derived from a [`FeedView`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassStatus {
    /// No pass has been started.
    Idle,
    Loading,
    Success,
    /// Some channels failed; the others' items are present.
    PartialSuccess,
    Empty,
    Failed,
}

impl FeedView {
    fn done(items: Vec<FeedItem>, error: Option<String>) -> Self {
        Self {
            items,
            is_loading: false,
            error,
        }
    }

    pub fn status(&self) -> PassStatus {
        match (self.is_loading, self.error.is_some(), self.items.is_empty()) {
            (true, _, _) => PassStatus::Loading,
            (false, true, true) => PassStatus::Failed,
            (false, true, false) => PassStatus::PartialSuccess,
            (false, false, true) => PassStatus::Empty,
            (false, false, false) => PassStatus::Success,
        }
    }
}

// ============================================================================
// Aggregator
// ============================================================================

/// Runs aggregation passes.
///
/// Cloning is cheap: the HTTP client and bookmark store are shared handles.
#[derive(Clone)]
pub struct Aggregator {
    client: reqwest::Client,
    bookmarks: BookmarkStore,
    limits: FetchLimits,
    max_concurrent: Option<usize>,
}

impl Aggregator {
    pub fn new(client: reqwest::Client, bookmarks: BookmarkStore) -> Self {
        Self {
            client,
            bookmarks,
            limits: FetchLimits::default(),
            max_concurrent: None,
        }
    }

    pub fn with_limits(mut self, limits: FetchLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Cap the number of channels fetched at the same time. Values below 1
    /// are treated as 1. Without a cap every selected channel starts at once.
    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = Some(max_concurrent.max(1));
        self
    }

    pub fn bookmarks(&self) -> &BookmarkStore {
        &self.bookmarks
    }

    /// Run one pass over `target`, resolved against `catalog`.
    ///
    /// Never fails as a whole: problems end up in [`FeedView::error`].
    ///
    /// - `Bookmarked` returns the bookmark snapshot without touching the network.
    /// - An unknown channel id in a non-empty catalog is
    ///   [`AggregateError::ChannelNotFound`]. With an empty catalog the
    ///   result is simply empty.
    /// - Channel outcomes are merged in catalog order, so identical inputs
    ///   give identical output regardless of completion order.
    pub async fn aggregate(&self, target: &Target, catalog: &[Channel]) -> FeedView {
        let selected: Vec<&Channel> = match target {
            Target::Bookmarked => return self.bookmarked_view(),
            Target::All => catalog.iter().collect(),
            Target::Channel(id) => match catalog.iter().find(|c| c.id == *id) {
                Some(channel) => vec![channel],
                None if catalog.is_empty() => Vec::new(),
                None => {
                    let err = AggregateError::ChannelNotFound(id.clone());
                    tracing::warn!(selection = %target, "Requested channel is not in the catalog");
                    return FeedView::done(Vec::new(), Some(err.to_string()));
                }
            },
        };

        if selected.is_empty() {
            tracing::debug!(selection = %target, "No channels to aggregate");
            return FeedView::done(Vec::new(), None);
        }

        let total = selected.len();
        let width = self.max_concurrent.unwrap_or(total).max(1);
        let mut outcomes: Vec<(usize, Result<Vec<FeedItem>, ChannelFailure>)> =
            stream::iter(selected.into_iter().enumerate())
                .map(|(index, channel)| async move { (index, self.fetch_channel(channel).await) })
                .buffer_unordered(width)
                .collect()
                .await;
        outcomes.sort_by_key(|(index, _)| *index);

        let mut items = Vec::new();
        let mut first_failure: Option<ChannelFailure> = None;
        let mut failed = 0usize;

        for (_, outcome) in outcomes {
            match outcome {
                Ok(mut channel_items) => items.append(&mut channel_items),
                Err(failure) => {
                    failed += 1;
                    tracing::warn!(
                        channel = %failure.channel_name,
                        channel_id = %failure.channel_id,
                        error = %failure.error,
                        "Channel failed during aggregation"
                    );
                    first_failure.get_or_insert(failure);
                }
            }
        }

        let snapshot = self.bookmarks.snapshot_ids();
        let mut items = reconcile(items, &snapshot);
        sort_by_published(&mut items);

        tracing::info!(
            selection = %target,
            channels = total,
            failed = failed,
            items = items.len(),
            "Aggregation pass complete"
        );

        let error = first_failure.map(|f| AggregateError::FetchFailed(f.channel_name).to_string());
        FeedView::done(items, error)
    }

    /// Fetch and normalize a single channel, without bookmark annotation.
    pub async fn fetch_channel(&self, channel: &Channel) -> Result<Vec<FeedItem>, ChannelFailure> {
        let failure = |error: ChannelError| ChannelFailure {
            channel_id: channel.id.clone(),
            channel_name: channel.name.clone(),
            error,
        };

        let body = fetch_document(&self.client, channel, self.limits)
            .await
            .map_err(|e| failure(e.into()))?;
        let parsed = normalize_document(&body, channel).map_err(|e| failure(e.into()))?;

        tracing::debug!(
            channel = %channel.name,
            items = parsed.items.len(),
            dropped = parsed.dropped,
            "Normalized channel"
        );
        Ok(parsed.items)
    }

    fn bookmarked_view(&self) -> FeedView {
        let mut items: Vec<FeedItem> = self.bookmarks.snapshot().iter().cloned().collect();
        for item in &mut items {
            item.bookmarked = true;
        }
        sort_by_published(&mut items);
        FeedView::done(items, None)
    }
}
