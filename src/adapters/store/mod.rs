use crate::config::StoreConfig;
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde_json::Value;
use std::cmp::Ordering;
use std::sync::Arc;
use thiserror::Error;

pub mod couch;
pub mod memory;
pub mod message_repo;
pub mod records;

pub use couch::CouchStore;
pub use memory::MemoryStore;
pub use message_repo::MessageRepository;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("document not found")]
    NotFound,
    #[error("document update conflict")]
    Conflict,
    #[error("store rejected the configured credentials")]
    Unauthorized,
    #[error("invalid store url: {0}")]
    InvalidUrl(String),
    #[error("store transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("failed to encode document: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("malformed document {id}: {source}")]
    Malformed {
        id: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("unexpected store response ({status}): {reason}")]
    Unexpected { status: u16, reason: String },
}

pub type DocumentStream = BoxStream<'static, Result<Value, StoreError>>;

/// A document database with per-document optimistic concurrency.
///
/// Documents are JSON objects; `_id` carries identity and `_rev` the current
/// revision. Every successful write produces a new revision, and writes to an
/// existing document must present the current one.
#[async_trait]
pub trait DocumentStore: Send + Sync + std::fmt::Debug + 'static {
    /// Creates or replaces a document, returning its new revision.
    async fn put(&self, id: &str, doc: Value) -> Result<String, StoreError>;

    async fn get(&self, id: &str) -> Result<Value, StoreError>;

    /// Streams the documents matching `query` in its sort order. The stream is
    /// lazy and can only be consumed once.
    async fn find(&self, query: FindQuery) -> Result<DocumentStream, StoreError>;

    async fn delete(&self, id: &str, rev: &str) -> Result<(), StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Eq(Value),
    Gt(Value),
}

impl Condition {
    fn matches(&self, value: Option<&Value>) -> bool {
        let Some(value) = value else { return false };
        match self {
            Self::Eq(expected) => collate(value, expected) == Ordering::Equal,
            Self::Gt(bound) => collate(value, bound) == Ordering::Greater,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Selector {
    pub(crate) fields: Vec<(String, Condition)>,
}

impl Selector {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn eq(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.fields.push((field.to_string(), Condition::Eq(value.into())));
        self
    }

    #[must_use]
    pub fn gt(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.fields.push((field.to_string(), Condition::Gt(value.into())));
        self
    }

    #[must_use]
    pub fn matches(&self, doc: &Value) -> bool {
        self.fields.iter().all(|(field, condition)| condition.matches(doc.get(field)))
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindQuery {
    pub selector: Selector,
    pub sort: Vec<(String, SortOrder)>,
}

impl FindQuery {
    #[must_use]
    pub fn new(selector: Selector) -> Self {
        Self { selector, sort: Vec::new() }
    }

    #[must_use]
    pub fn sort_by(mut self, field: &str, order: SortOrder) -> Self {
        self.sort.push((field.to_string(), order));
        self
    }

    /// Compares two documents by the query's sort fields.
    #[must_use]
    pub fn compare(&self, a: &Value, b: &Value) -> Ordering {
        for (field, order) in &self.sort {
            let ord = collate(a.get(field).unwrap_or(&Value::Null), b.get(field).unwrap_or(&Value::Null));
            let ord = match order {
                SortOrder::Asc => ord,
                SortOrder::Desc => ord.reverse(),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }
}

/// JSON collation in CouchDB order: null, booleans, numbers, strings, arrays, objects.
#[must_use]
pub fn collate(a: &Value, b: &Value) -> Ordering {
    const fn rank(v: &Value) -> u8 {
        match v {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Number(_) => 2,
            Value::String(_) => 3,
            Value::Array(_) => 4,
            Value::Object(_) => 5,
        }
    }

    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => x.cmp(&y),
            _ => x.as_f64().unwrap_or(0.0).total_cmp(&y.as_f64().unwrap_or(0.0)),
        },
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => {
            for (l, r) in x.iter().zip(y) {
                let ord = collate(l, r);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        _ => rank(a).cmp(&rank(b)),
    }
}

/// Opens the backend named by the store URL.
///
/// # Errors
/// Returns `StoreError` when the store is unreachable, rejects the
/// credentials, or the database cannot be prepared.
pub async fn connect(config: &StoreConfig) -> Result<Arc<dyn DocumentStore>, StoreError> {
    if config.url.starts_with("memory:") {
        tracing::warn!("Using the in-memory document store; messages will not survive a restart");
        return Ok(Arc::new(MemoryStore::new()));
    }

    let store = CouchStore::connect(config).await?;
    Ok(Arc::new(store))
}
