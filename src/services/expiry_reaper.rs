use crate::adapters::store::MessageRepository;
use crate::domain::message::Message;
use opentelemetry::{KeyValue, global, metrics::Counter};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::Instrument;

#[derive(Clone, Debug)]
struct Metrics {
    reaped_total: Counter<u64>,
}

impl Metrics {
    fn new() -> Self {
        let meter = global::meter("relay-node");
        Self {
            reaped_total: meter
                .u64_counter("relay_expired_messages_reaped_total")
                .with_description("Expired messages deleted after being found by a listing")
                .build(),
        }
    }
}

/// Deletes expired messages in the background.
///
/// Deletions are detached from the request that found them: the outcome only
/// reaches the logs and never the caller. Failed deletions are not retried;
/// the message is found again by the next listing.
///
/// Shutting the server down does not interrupt deletions. They run until
/// [`ExpiryReaper::cancel`] is called, which the process does once the drain
/// timeout has passed.
#[derive(Clone, Debug)]
pub struct ExpiryReaper {
    repo: MessageRepository,
    tracker: TaskTracker,
    cancel: CancellationToken,
    metrics: Metrics,
}

impl ExpiryReaper {
    #[must_use]
    pub fn new(repo: MessageRepository) -> Self {
        Self { repo, tracker: TaskTracker::new(), cancel: CancellationToken::new(), metrics: Metrics::new() }
    }

    /// Schedules deletion of an expired message and returns immediately.
    pub fn reap(&self, message: &Message) {
        let Some(rev) = message.revision.clone() else {
            tracing::warn!(message_id = %message.id, "Expired message has no revision, cannot delete");
            return;
        };
        let id = message.id.clone();
        let repo = self.repo.clone();
        let cancel = self.cancel.clone();
        let metrics = self.metrics.clone();
        let span = tracing::debug_span!("reap_expired_message", message_id = %id);

        self.tracker.spawn(
            async move {
                tokio::select! {
                    res = repo.delete(&id, &rev) => match res {
                        Ok(()) => {
                            tracing::debug!("Deleted expired message");
                            metrics.reaped_total.add(1, &[KeyValue::new("status", "success")]);
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "Failed to delete expired message");
                            metrics.reaped_total.add(1, &[KeyValue::new("status", "failure")]);
                        }
                    },
                    () = cancel.cancelled() => {
                        tracing::debug!("Abandoning expired message deletion");
                    }
                }
            }
            .instrument(span),
        );
    }

    /// Number of deletions still in flight.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.tracker.len()
    }

    /// Waits for the in-flight deletions to finish.
    pub async fn drain(&self) {
        self.tracker.close();
        self.tracker.wait().await;
    }

    /// Abandons every in-flight deletion. The documents stay in the store.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::store::{DocumentStore, DocumentStream, FindQuery, MemoryStore, StoreError};
    use async_trait::async_trait;
    use serde_json::Value;
    use std::sync::Arc;
    use std::time::Duration;

    fn expired(id: &str) -> Message {
        Message { id: id.into(), recipient_id: "alice".into(), timestamp: 1, expires_at: 2, ..Message::default() }
    }

    /// Memory store whose deletes never complete.
    #[derive(Debug, Default)]
    struct StalledDeletes {
        inner: MemoryStore,
    }

    #[async_trait]
    impl DocumentStore for StalledDeletes {
        async fn put(&self, id: &str, doc: Value) -> Result<String, StoreError> {
            self.inner.put(id, doc).await
        }
        async fn get(&self, id: &str) -> Result<Value, StoreError> {
            self.inner.get(id).await
        }
        async fn find(&self, query: FindQuery) -> Result<DocumentStream, StoreError> {
            self.inner.find(query).await
        }
        async fn delete(&self, _id: &str, _rev: &str) -> Result<(), StoreError> {
            std::future::pending().await
        }
        async fn ping(&self) -> Result<(), StoreError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_reap_deletes_in_background() {
        crate::telemetry::init_test_telemetry();
        let store = Arc::new(MemoryStore::new());
        let repo = MessageRepository::new(Arc::clone(&store) as Arc<dyn DocumentStore>);
        let reaper = ExpiryReaper::new(repo.clone());

        let mut msg = expired("m1");
        msg.revision = Some(repo.save(&msg).await.unwrap());

        reaper.reap(&msg);
        reaper.drain().await;

        assert!(matches!(repo.get("m1").await, Err(StoreError::NotFound)));
        assert_eq!(reaper.pending(), 0);
    }

    #[tokio::test]
    async fn test_failed_deletion_leaves_document() {
        let store = Arc::new(MemoryStore::new());
        let repo = MessageRepository::new(Arc::clone(&store) as Arc<dyn DocumentStore>);
        let reaper = ExpiryReaper::new(repo.clone());

        let mut msg = expired("m1");
        repo.save(&msg).await.unwrap();
        msg.revision = Some("1-stale".into());

        // The conflict only reaches the logs
        reaper.reap(&msg);
        reaper.drain().await;

        assert_eq!(reaper.pending(), 0);
        assert_eq!(store.len(), 1);
        assert!(repo.get("m1").await.is_ok());
    }

    #[tokio::test]
    async fn test_cancel_abandons_stalled_deletion() {
        let store = Arc::new(StalledDeletes::default());
        let repo = MessageRepository::new(Arc::clone(&store) as Arc<dyn DocumentStore>);
        let reaper = ExpiryReaper::new(repo.clone());

        let mut msg = expired("m1");
        msg.revision = Some(repo.save(&msg).await.unwrap());
        reaper.reap(&msg);
        assert_eq!(reaper.pending(), 1);

        // Still stalled: draining alone does not finish
        assert!(tokio::time::timeout(Duration::from_millis(50), reaper.drain()).await.is_err());

        reaper.cancel();
        tokio::time::timeout(Duration::from_secs(1), reaper.drain()).await.unwrap();

        assert_eq!(reaper.pending(), 0);
        assert_eq!(store.inner.len(), 1);
        assert!(repo.get("m1").await.is_ok());
    }

    #[tokio::test]
    async fn test_message_without_revision_is_skipped() {
        let reaper = ExpiryReaper::new(MessageRepository::new(Arc::new(MemoryStore::new())));

        reaper.reap(&expired("m1"));
        assert_eq!(reaper.pending(), 0);
    }
}
