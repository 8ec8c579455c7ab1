use crate::adapters::store::records::MessageRecord;
use crate::adapters::store::{DocumentStore, FindQuery, Selector, SortOrder, StoreError};
use crate::domain::message::Message;
use futures::StreamExt;
use futures::stream::BoxStream;
use serde_json::Value;
use std::sync::Arc;

pub type MessageStream = BoxStream<'static, Result<Message, StoreError>>;

#[derive(Clone, Debug)]
pub struct MessageRepository {
    store: Arc<dyn DocumentStore>,
}

fn decode(doc: Value) -> Result<Message, StoreError> {
    let id = doc.get("_id").and_then(Value::as_str).unwrap_or("<unknown>").to_string();
    serde_json::from_value::<MessageRecord>(doc).map(Into::into).map_err(|source| StoreError::Malformed { id, source })
}

impl MessageRepository {
    #[must_use]
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Writes a message, creating it or replacing the revision it carries.
    /// Returns the new revision.
    ///
    /// # Errors
    /// Returns `StoreError::Conflict` if the carried revision is not current.
    #[tracing::instrument(level = "debug", skip(self, message), fields(message_id = %message.id))]
    pub async fn save(&self, message: &Message) -> Result<String, StoreError> {
        let doc = serde_json::to_value(MessageRecord::from(message)).map_err(StoreError::Encode)?;
        self.store.put(&message.id, doc).await
    }

    /// # Errors
    /// Returns `StoreError::NotFound` if the message does not exist.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn get(&self, id: &str) -> Result<Message, StoreError> {
        let doc = self.store.get(id).await?;
        decode(doc)
    }

    /// Streams every message addressed to `recipient_id`, oldest first.
    ///
    /// Elements that fail to decode are yielded as `StoreError::Malformed`
    /// without ending the stream. Ties on `timestamp` come back in store order.
    ///
    /// # Errors
    /// Returns `StoreError` if the query cannot be issued.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn find_for_recipient(&self, recipient_id: &str, since: Option<i64>) -> Result<MessageStream, StoreError> {
        // Null sorts before every number, so `> null` keeps the sort field in the selector.
        let lower_bound = since.map_or(Value::Null, Value::from);
        let query = FindQuery::new(Selector::new().eq("recipientId", recipient_id).gt("timestamp", lower_bound))
            .sort_by("recipientId", SortOrder::Asc)
            .sort_by("timestamp", SortOrder::Asc);

        let docs = self.store.find(query).await?;
        Ok(docs.map(|doc| doc.and_then(decode)).boxed())
    }

    /// # Errors
    /// Returns `StoreError::NotFound` if the message is gone, or
    /// `StoreError::Conflict` if `rev` is stale.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn delete(&self, id: &str, rev: &str) -> Result<(), StoreError> {
        self.store.delete(id, rev).await
    }

    /// # Errors
    /// Returns `StoreError` if the store cannot be reached.
    pub async fn ping(&self) -> Result<(), StoreError> {
        self.store.ping().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::store::MemoryStore;
    use futures::TryStreamExt;
    use serde_json::json;

    fn message(id: &str, recipient: &str, timestamp: i64) -> Message {
        Message {
            id: id.into(),
            sender_id: "bob".into(),
            sender_username: "bob".into(),
            sender_device_id: 1,
            recipient_id: recipient.into(),
            recipient_username: recipient.into(),
            message_type: "whisper".into(),
            encrypted_payload: "AAEC".into(),
            timestamp,
            expires_at: timestamp + 60,
            ..Message::default()
        }
    }

    #[tokio::test]
    async fn test_save_then_get_round_trips() {
        let repo = MessageRepository::new(Arc::new(MemoryStore::new()));
        let mut msg = message("m1", "alice", 100);
        msg.recipient_device_id = Some(2);

        let rev = repo.save(&msg).await.unwrap();
        let stored = repo.get("m1").await.unwrap();

        msg.revision = Some(rev);
        assert_eq!(stored, msg);
    }

    #[tokio::test]
    async fn test_find_for_recipient_orders_and_filters() {
        let repo = MessageRepository::new(Arc::new(MemoryStore::new()));
        for (id, ts) in [("m5", 5), ("m1", 1), ("m3", 3)] {
            repo.save(&message(id, "alice", ts)).await.unwrap();
        }
        repo.save(&message("other", "carol", 2)).await.unwrap();

        let all: Vec<Message> = repo.find_for_recipient("alice", None).await.unwrap().try_collect().await.unwrap();
        let ids: Vec<&str> = all.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["m1", "m3", "m5"]);

        let newer: Vec<Message> = repo.find_for_recipient("alice", Some(1)).await.unwrap().try_collect().await.unwrap();
        let ids: Vec<&str> = newer.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["m3", "m5"], "since is exclusive");
    }

    #[tokio::test]
    async fn test_malformed_documents_do_not_end_the_stream() {
        let store = Arc::new(MemoryStore::new());
        let repo = MessageRepository::new(Arc::clone(&store) as Arc<dyn DocumentStore>);
        repo.save(&message("good", "alice", 2)).await.unwrap();
        store.put("bad", json!({"recipientId": "alice", "timestamp": 1, "senderDeviceId": "one"})).await.unwrap();

        let results: Vec<Result<Message, StoreError>> =
            repo.find_for_recipient("alice", None).await.unwrap().collect().await;

        assert_eq!(results.len(), 2);
        assert!(matches!(&results[0], Err(StoreError::Malformed { id, .. }) if id == "bad"));
        assert_eq!(results[1].as_ref().unwrap().id, "good");
    }
}
