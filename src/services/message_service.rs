use crate::adapters::store::{MessageRepository, StoreError};
use crate::config::MessagingConfig;
use crate::domain::message::Message;
use crate::error::{AppError, Result};
use crate::services::expiry_reaper::ExpiryReaper;
use futures::StreamExt;
use opentelemetry::{
    KeyValue, global,
    metrics::{Counter, Histogram},
};
use std::future::Future;
use std::time::Duration;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Clone, Debug)]
pub(crate) struct Metrics {
    pub(crate) stored_total: Counter<u64>,
    pub(crate) deleted_total: Counter<u64>,
    pub(crate) list_size: Histogram<u64>,
}

impl Metrics {
    fn new() -> Self {
        let meter = global::meter("relay-node");
        Self {
            stored_total: meter
                .u64_counter("relay_messages_stored_total")
                .with_description("Messages submitted for storage")
                .build(),
            deleted_total: meter
                .u64_counter("relay_messages_deleted_total")
                .with_description("Explicit message deletions")
                .build(),
            list_size: meter
                .u64_histogram("relay_message_list_size")
                .with_description("Number of live messages returned by a single listing")
                .build(),
        }
    }
}

fn now() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}

fn non_empty(revision: Option<String>) -> Option<String> {
    revision.filter(|r| !r.is_empty())
}

#[derive(Clone, Debug)]
pub struct MessageService {
    repo: MessageRepository,
    reaper: ExpiryReaper,
    config: MessagingConfig,
    metrics: Metrics,
}

impl MessageService {
    #[must_use]
    pub fn new(repo: MessageRepository, reaper: ExpiryReaper, config: MessagingConfig) -> Self {
        Self { repo, reaper, config, metrics: Metrics::new() }
    }

    /// Runs `op` under the operation deadline. On expiry the in-flight store
    /// call is dropped along with anything it had collected.
    async fn with_deadline<T>(&self, op: impl Future<Output = Result<T>>) -> Result<T> {
        let deadline = Duration::from_millis(self.config.operation_timeout_ms);
        tokio::time::timeout(deadline, op).await.map_err(|_| AppError::Timeout)?
    }

    /// Persists a message, assigning an id and the default expiry when absent.
    ///
    /// # Errors
    /// Returns `AppError::Conflict` if the id exists and the message does not
    /// carry its current revision.
    /// Returns `AppError::Store` if the message cannot be stored.
    #[tracing::instrument(
        err(level = "warn"),
        skip(self, message),
        fields(message_id = tracing::field::Empty, recipient_id = %message.recipient_id)
    )]
    pub async fn store_message(&self, mut message: Message) -> Result<Message> {
        if message.id.is_empty() {
            message.id = Uuid::now_v7().to_string();
        }
        tracing::Span::current().record("message_id", message.id.as_str());
        message.apply_default_expiry(now());

        match self.with_deadline(async { Ok(self.repo.save(&message).await?) }).await {
            Ok(rev) => {
                tracing::debug!("Message stored for delivery");
                self.metrics.stored_total.add(1, &[KeyValue::new("status", "success")]);
                message.revision = Some(rev);
                Ok(message)
            }
            Err(e) => {
                self.metrics.stored_total.add(1, &[KeyValue::new("status", "failure")]);
                Err(e)
            }
        }
    }

    /// Lists the live messages addressed to `recipient_id`, oldest first.
    ///
    /// Expired messages are left out and handed to the reaper. Documents that
    /// fail to decode are skipped. With `since`, only messages newer than that
    /// timestamp are considered.
    ///
    /// # Errors
    /// Returns `AppError::Store` if the query fails and `AppError::Timeout` if
    /// it outlives the operation deadline.
    #[tracing::instrument(
        err(level = "warn"),
        skip(self),
        fields(live = tracing::field::Empty, expired = tracing::field::Empty)
    )]
    pub async fn list_messages(&self, recipient_id: &str, since: Option<i64>) -> Result<Vec<Message>> {
        let now = now();

        let (live, expired) = self
            .with_deadline(async {
                let mut stream = self.repo.find_for_recipient(recipient_id, since).await?;
                let mut live = Vec::new();
                let mut expired = 0_usize;

                while let Some(item) = stream.next().await {
                    match item {
                        Ok(msg) if msg.is_live_at(now) => live.push(msg),
                        Ok(msg) => {
                            expired += 1;
                            self.reaper.reap(&msg);
                        }
                        Err(StoreError::Malformed { id, source }) => {
                            tracing::warn!(message_id = %id, error = %source, "Skipping malformed message");
                        }
                        Err(e) => return Err(e.into()),
                    }
                }
                Ok((live, expired))
            })
            .await?;

        let span = tracing::Span::current();
        span.record("live", live.len());
        span.record("expired", expired);
        self.metrics.list_size.record(live.len() as u64, &[]);

        Ok(live)
    }

    /// Deletes a message. Without a revision the current one is fetched
    /// first; that lookup and the delete are not atomic, so a concurrent writer
    /// surfaces as a conflict.
    ///
    /// # Errors
    /// Returns `AppError::NotFound` if the message does not exist.
    /// Returns `AppError::Conflict` if the revision is stale.
    #[tracing::instrument(err(level = "debug"), skip(self, revision))]
    pub async fn delete_message(&self, id: &str, revision: Option<String>) -> Result<()> {
        let result = self
            .with_deadline(async {
                let rev = match non_empty(revision) {
                    Some(rev) => rev,
                    None => self.repo.get(id).await?.revision.ok_or(AppError::Internal)?,
                };
                Ok(self.repo.delete(id, &rev).await?)
            })
            .await;

        let status = if result.is_ok() { "success" } else { "failure" };
        self.metrics.deleted_total.add(1, &[KeyValue::new("status", status)]);
        result
    }

    /// Flags a message as delivered now and writes it back.
    ///
    /// # Errors
    /// Returns `AppError::NotFound` if the message does not exist.
    /// Returns `AppError::Conflict` if the supplied revision is stale or the
    /// message changed between the read and the write.
    #[tracing::instrument(err(level = "debug"), skip(self, revision))]
    pub async fn mark_delivered(&self, id: &str, revision: Option<String>) -> Result<Message> {
        self.with_deadline(async {
            let mut message = self.repo.get(id).await?;
            if let Some(rev) = non_empty(revision) {
                message.revision = Some(rev);
            }

            message.mark_delivered(now());
            let rev = self.repo.save(&message).await?;
            message.revision = Some(rev);
            Ok(message)
        })
        .await
    }
}
