use crate::adapters::store::{DocumentStore, DocumentStream, FindQuery, StoreError};
use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::StreamExt;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::sync::Arc;

#[derive(Debug, Clone)]
struct StoredDocument {
    generation: u64,
    rev: String,
    body: Value,
}

/// In-process document store with the same revision rules as CouchDB.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    docs: Arc<DashMap<String, StoredDocument>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.docs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }
}

fn next_revision(generation: u64, body: &Value) -> String {
    let digest = Sha256::digest(body.to_string().as_bytes());
    format!("{generation}-{}", &hex::encode(digest)[..32])
}

fn supplied_revision(doc: &Value) -> Option<String> {
    doc.get("_rev").and_then(Value::as_str).map(str::to_string)
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn put(&self, id: &str, mut doc: Value) -> Result<String, StoreError> {
        let supplied = supplied_revision(&doc);
        let Some(fields) = doc.as_object_mut() else {
            return Err(StoreError::Unexpected { status: 400, reason: "document must be a JSON object".into() });
        };
        fields.remove("_rev");
        fields.insert("_id".to_string(), Value::String(id.to_string()));

        match self.docs.entry(id.to_string()) {
            Entry::Occupied(mut entry) => {
                if supplied.as_deref() != Some(entry.get().rev.as_str()) {
                    return Err(StoreError::Conflict);
                }
                let generation = entry.get().generation + 1;
                let rev = next_revision(generation, &doc);
                entry.insert(StoredDocument { generation, rev: rev.clone(), body: doc });
                Ok(rev)
            }
            Entry::Vacant(entry) => {
                if supplied.is_some() {
                    return Err(StoreError::Conflict);
                }
                let rev = next_revision(1, &doc);
                entry.insert(StoredDocument { generation: 1, rev: rev.clone(), body: doc });
                Ok(rev)
            }
        }
    }

    async fn get(&self, id: &str) -> Result<Value, StoreError> {
        let stored = self.docs.get(id).ok_or(StoreError::NotFound)?;
        let mut doc = stored.body.clone();
        if let Some(fields) = doc.as_object_mut() {
            fields.insert("_rev".to_string(), Value::String(stored.rev.clone()));
        }
        Ok(doc)
    }

    async fn find(&self, query: FindQuery) -> Result<DocumentStream, StoreError> {
        let mut matches: Vec<Value> = self
            .docs
            .iter()
            .filter(|entry| query.selector.matches(&entry.body))
            .map(|entry| {
                let mut doc = entry.body.clone();
                if let Some(fields) = doc.as_object_mut() {
                    fields.insert("_rev".to_string(), Value::String(entry.rev.clone()));
                }
                doc
            })
            .collect();

        matches.sort_by(|a, b| query.compare(a, b));

        Ok(futures::stream::iter(matches.into_iter().map(Ok)).boxed())
    }

    async fn delete(&self, id: &str, rev: &str) -> Result<(), StoreError> {
        match self.docs.entry(id.to_string()) {
            Entry::Occupied(entry) if entry.get().rev == rev => {
                entry.remove();
                Ok(())
            }
            Entry::Occupied(_) => Err(StoreError::Conflict),
            Entry::Vacant(_) => Err(StoreError::NotFound),
        }
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
