use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

use super::{Aggregator, FeedView, PassStatus, Target};
use crate::storage::Channel;

/// Identity of one aggregation pass. Later passes have larger ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct PassId(u64);

impl fmt::Display for PassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Holds the latest [`FeedView`] and publishes it to observers.
///
/// Every pass gets a fresh [`PassId`]. A pass that finishes after a newer one
/// has started is discarded, so a slow pass can never overwrite the result
/// of a newer one.
#[derive(Clone)]
pub struct FeedSession {
    aggregator: Aggregator,
    generation: Arc<AtomicU64>,
    view: Arc<watch::Sender<FeedView>>,
}

impl FeedSession {
    pub fn new(aggregator: Aggregator) -> Self {
        let (tx, _rx) = watch::channel(FeedView::default());
        Self {
            aggregator,
            generation: Arc::new(AtomicU64::new(0)),
            view: Arc::new(tx),
        }
    }

    pub fn aggregator(&self) -> &Aggregator {
        &self.aggregator
    }

    pub fn subscribe(&self) -> watch::Receiver<FeedView> {
        self.view.subscribe()
    }

    /// The most recently published view.
    pub fn current(&self) -> FeedView {
        self.view.borrow().clone()
    }

    pub fn status(&self) -> PassStatus {
        if self.generation.load(Ordering::Acquire) == 0 {
            return PassStatus::Idle;
        }
        self.view.borrow().status()
    }

    /// Start a pass: bump the generation and publish a loading view that
    /// keeps the previous items on screen.
    ///
    /// The bump happens under the view lock so it is ordered with respect
    /// to [`complete`](Self::complete).
    pub fn begin(&self) -> PassId {
        let mut pass = PassId(0);
        self.view.send_modify(|view| {
            pass = PassId(self.generation.fetch_add(1, Ordering::AcqRel) + 1);
            view.is_loading = true;
            view.error = None;
        });
        pass
    }

    /// Publish `view` if `pass` is still the latest pass.
    ///
    /// Returns `false` when the result was dropped as stale.
    pub fn complete(&self, pass: PassId, view: FeedView) -> bool {
        self.view.send_if_modified(|current| {
            let latest = self.generation.load(Ordering::Acquire);
            if pass.0 != latest {
                tracing::debug!(
                    expected = latest,
                    got = pass.0,
                    "Ignoring stale aggregation pass (generation mismatch)"
                );
                return false;
            }
            *current = view;
            true
        })
    }

    /// Run a full pass and publish it.
    ///
    /// Returns the view if it was published, `None` if a newer pass started
    /// in the meantime.
    pub async fn load(&self, target: &Target, catalog: &[Channel]) -> Option<FeedView> {
        let pass = self.begin();
        tracing::debug!(pass = %pass, selection = %target, "Starting aggregation pass");

        let view = self.aggregator.aggregate(target, catalog).await;
        self.complete(pass, view.clone()).then_some(view)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{BookmarkStore, Database};
    use pretty_assertions::assert_eq;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn session() -> FeedSession {
        let db = Database::open(":memory:").await.unwrap();
        let bookmarks = BookmarkStore::load(db).await.unwrap();
        FeedSession::new(Aggregator::new(reqwest::Client::new(), bookmarks))
    }

    fn channel(id: &str, url: String) -> Channel {
        Channel {
            id: id.into(),
            name: format!("Channel {}", id),
            url,
            description: None,
            image_url: None,
            category: None,
        }
    }

    fn rss(guid: &str) -> String {
        format!(
            r#"<rss version="2.0"><channel><item><guid>{}</guid><title>t</title></item></channel></rss>"#,
            guid
        )
    }

    #[tokio::test]
    async fn test_idle_before_first_pass() {
        let session = session().await;
        assert_eq!(session.status(), PassStatus::Idle);
        assert_eq!(session.current(), FeedView::default());
    }

    #[tokio::test]
    async fn test_stale_pass_is_discarded() {
        let session = session().await;

        let first = session.begin();
        let second = session.begin();
        assert!(second > first);
        assert_eq!(session.status(), PassStatus::Loading);

        let stale = FeedView {
            error: Some("stale".into()),
            ..FeedView::default()
        };
        assert!(!session.complete(first, stale));
        assert!(session.current().is_loading);

        assert!(session.complete(second, FeedView::default()));
        assert_eq!(session.current(), FeedView::default());
    }

    #[tokio::test]
    async fn test_loading_view_keeps_previous_items() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(rss("kept")))
            .mount(&server)
            .await;

        let session = session().await;
        let catalog = vec![channel("1", format!("{}/feed", server.uri()))];
        session.load(&Target::All, &catalog).await.unwrap();

        session.begin();
        let loading = session.current();
        assert!(loading.is_loading);
        assert_eq!(loading.items[0].id, "kept");
    }

    #[tokio::test]
    async fn test_slow_pass_does_not_overwrite_newer_one() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/slow"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(rss("slow"))
                    .set_delay(Duration::from_millis(300)),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/fast"))
            .respond_with(ResponseTemplate::new(200).set_body_string(rss("fast")))
            .mount(&server)
            .await;

        let session = session().await;
        let slow = vec![channel("1", format!("{}/slow", server.uri()))];
        let fast = vec![channel("2", format!("{}/fast", server.uri()))];
        let mut rx = session.subscribe();

        let slow_pass = session.load(&Target::All, &slow);
        let fast_pass = async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            session.load(&Target::All, &fast).await
        };
        let (slow_result, fast_result) = tokio::join!(slow_pass, fast_pass);

        assert!(slow_result.is_none());
        assert_eq!(fast_result.unwrap().items[0].id, "fast");

        let published = rx.borrow_and_update().clone();
        assert_eq!(published.items.len(), 1);
        assert_eq!(published.items[0].id, "fast");
        assert_eq!(session.status(), PassStatus::Success);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_completion_racing_a_new_pass_never_clears_loading() {
        let session = session().await;

        for round in 0..200 {
            let earlier = session.begin();
            let done = FeedView {
                error: Some(format!("round {}", round)),
                ..FeedView::default()
            };

            let completer = {
                let session = session.clone();
                tokio::spawn(async move { session.complete(earlier, done) })
            };
            let starter = {
                let session = session.clone();
                tokio::spawn(async move { session.begin() })
            };
            let (published, later) = (completer.await.unwrap(), starter.await.unwrap());

            assert!(later > earlier);
            let view = session.current();
            assert!(
                view.is_loading,
                "round {}: pass {} published over pass {} (published = {})",
                round, earlier, later, published
            );
            assert_eq!(session.status(), PassStatus::Loading);
        }
    }
}
