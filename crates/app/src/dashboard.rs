use std::sync::Arc;

use metrics::counter;
use tokio::{sync::RwLock, task::JoinHandle};
use tokio_stream::StreamExt;
use tracing::{debug, error, info, warn};

use hookboard_core::MessageFeed;
use hookboard_storage::{InsertEvent, InsertSubscription, MessageStore};

/// Dashboard list shared between the feed worker (writer) and HTTP readers.
pub type SharedFeed = Arc<RwLock<MessageFeed>>;

pub fn shared_feed(capacity: usize) -> SharedFeed {
    Arc::new(RwLock::new(MessageFeed::new(capacity)))
}

/// Background task keeping the dashboard feed in sync with the store.
pub struct FeedWorker {
    store: Arc<dyn MessageStore>,
    feed: SharedFeed,
    limit: usize,
}

impl FeedWorker {
    pub fn new(store: Arc<dyn MessageStore>, limit: usize) -> Self {
        Self {
            store,
            feed: shared_feed(limit),
            limit,
        }
    }

    pub fn feed(&self) -> SharedFeed {
        self.feed.clone()
    }

    /// Subscribes to inserts, then loads the initial list in the background.
    ///
    /// The subscription is taken before the first load so rows committed
    /// while loading still reach the feed; the id-keyed merge absorbs the
    /// overlap.
    pub fn spawn(self) -> FeedHandle {
        let subscription = self.store.subscribe_inserts();
        let task = tokio::spawn(async move {
            self.run(subscription).await;
        });
        FeedHandle { task }
    }

    async fn run(self, mut subscription: InsertSubscription) {
        self.reload("initial").await;

        while let Some(event) = subscription.next().await {
            match event {
                InsertEvent::Inserted(message) => {
                    let id = message.id.clone();
                    if !self.feed.write().await.merge_insert(message) {
                        debug!(stage = "feed", %id, "ignored duplicate insert notification");
                    }
                }
                InsertEvent::Lagged(skipped) => {
                    warn!(stage = "feed", skipped, "insert subscription lagged; reloading");
                    self.reload("lagged").await;
                }
            }
        }

        info!(stage = "feed", "insert subscription closed");
    }

    async fn reload(&self, reason: &'static str) {
        counter!("feed_reloads_total", "reason" => reason).increment(1);
        let limit = u32::try_from(self.limit).unwrap_or(u32::MAX);
        match self.store.list_recent(limit).await {
            Ok(rows) => {
                let count = rows.len();
                self.feed.write().await.replace_all(rows);
                info!(stage = "feed", reason, count, "dashboard feed loaded");
            }
            Err(err) => {
                error!(
                    stage = "feed",
                    reason,
                    error = %err,
                    "failed to load dashboard feed; keeping previous list"
                );
            }
        }
    }
}

/// Owns the worker task. Dropping it aborts the task and releases the
/// insert subscription.
pub struct FeedHandle {
    task: JoinHandle<()>,
}

impl Drop for FeedHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time;

    use crate::testing::{self, FakeStore};

    async fn wait_for_len(feed: &SharedFeed, expected: usize) {
        time::timeout(Duration::from_secs(1), async {
            while feed.read().await.len() != expected {
                time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("feed reached expected length");
    }

    #[tokio::test]
    async fn loads_recent_rows_then_merges_live_inserts() {
        let store = Arc::new(FakeStore::new());
        store.insert(testing::new_message("first")).await.expect("seed");
        store.insert(testing::new_message("second")).await.expect("seed");

        let worker = FeedWorker::new(store.clone(), 10);
        let feed = worker.feed();
        let _handle = worker.spawn();
        wait_for_len(&feed, 2).await;

        let inserted = store
            .insert(testing::new_message("third"))
            .await
            .expect("insert");
        wait_for_len(&feed, 3).await;

        let guard = feed.read().await;
        let titles: Vec<_> = guard.iter().map(|row| row.title.as_str()).collect();
        assert_eq!(titles, vec!["third", "second", "first"]);
        assert_eq!(guard.iter().next().map(|row| row.id.as_str()), Some(inserted.id.as_str()));
    }

    #[tokio::test]
    async fn duplicate_notifications_yield_one_entry() {
        let store = Arc::new(FakeStore::new());
        let worker = FeedWorker::new(store.clone(), 10);
        let feed = worker.feed();
        let _handle = worker.spawn();

        let row = store.insert(testing::new_message("once")).await.expect("insert");
        store.notifier().publish(&row);
        store.notifier().publish(&row);
        let other = store.insert(testing::new_message("after")).await.expect("insert");
        wait_for_len(&feed, 2).await;

        // "after" arrives behind both duplicates, so they have been processed.
        time::timeout(Duration::from_secs(1), async {
            loop {
                let front = feed.read().await.iter().next().map(|row| row.id.clone());
                if front.as_deref() == Some(other.id.as_str()) {
                    break;
                }
                time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("latest row at front");
        assert_eq!(feed.read().await.len(), 2);
    }

    #[tokio::test]
    async fn lagged_subscription_triggers_reload() {
        let store = Arc::new(FakeStore::with_buffer(2));
        let worker = FeedWorker::new(store.clone(), 10);
        let feed = worker.feed();
        let _handle = worker.spawn();

        // The worker has not been polled yet, so these overflow its buffer.
        for title in ["a", "b", "c", "d"] {
            store.insert(testing::new_message(title)).await.expect("insert");
        }

        wait_for_len(&feed, 4).await;
        time::timeout(Duration::from_secs(1), async {
            while store.list_calls() < 2 {
                time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("reload after lag");
    }

    #[tokio::test]
    async fn store_error_keeps_previous_list() {
        let store = Arc::new(FakeStore::new());
        store.insert(testing::new_message("kept")).await.expect("seed");

        let worker = FeedWorker::new(store.clone(), 10);
        worker.reload("initial").await;
        assert_eq!(worker.feed.read().await.len(), 1);

        store.fail_lists(true);
        worker.reload("lagged").await;

        let guard = worker.feed.read().await;
        assert_eq!(guard.len(), 1);
        assert_eq!(guard.iter().next().map(|row| row.title.as_str()), Some("kept"));
    }

    #[tokio::test]
    async fn dropping_handle_releases_subscription() {
        let store = Arc::new(FakeStore::new());
        let handle = FeedWorker::new(store.clone(), 10).spawn();
        assert_eq!(store.notifier().subscriber_count(), 1);

        drop(handle);
        time::timeout(Duration::from_secs(1), async {
            while store.notifier().subscriber_count() != 0 {
                time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("subscription released");
    }
}
