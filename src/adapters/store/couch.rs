use crate::adapters::store::{Condition, DocumentStore, DocumentStream, FindQuery, SortOrder, StoreError};
use crate::config::StoreConfig;
use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt, stream};
use reqwest::{Method, RequestBuilder, Response, StatusCode, Url};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use std::fmt;
use std::time::Duration;

/// Name of the Mango index backing recipient queries.
const RECIPIENT_INDEX: &str = "recipient-timestamp";

#[derive(Clone)]
struct Credentials {
    username: String,
    password: Option<String>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials").field("username", &self.username).field("password", &"<redacted>").finish()
    }
}

#[derive(Debug, Deserialize)]
struct PutResponse {
    rev: String,
}

#[derive(Debug, Deserialize)]
struct FindResponse {
    docs: Vec<Value>,
    #[serde(default)]
    bookmark: Option<String>,
    #[serde(default)]
    warning: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error: String,
    #[serde(default)]
    reason: Option<String>,
}

/// CouchDB over its HTTP API.
#[derive(Clone, Debug)]
pub struct CouchStore {
    client: reqwest::Client,
    base: Url,
    database: String,
    credentials: Option<Credentials>,
    page_size: usize,
}

impl CouchStore {
    /// Builds the client without touching the network.
    ///
    /// # Errors
    /// Returns `StoreError::InvalidUrl` if the URL is not an absolute http(s) URL.
    pub fn new(config: &StoreConfig) -> Result<Self, StoreError> {
        let mut base = Url::parse(&config.url).map_err(|e| StoreError::InvalidUrl(e.to_string()))?;
        if !matches!(base.scheme(), "http" | "https") || base.cannot_be_a_base() {
            return Err(StoreError::InvalidUrl(format!("unsupported scheme {}", base.scheme())));
        }

        let credentials = if base.username().is_empty() {
            None
        } else {
            Some(Credentials { username: base.username().to_string(), password: base.password().map(str::to_string) })
        };
        base.set_username("").map_err(|()| StoreError::InvalidUrl("cannot strip username".into()))?;
        base.set_password(None).map_err(|()| StoreError::InvalidUrl("cannot strip password".into()))?;

        let client = reqwest::Client::builder().timeout(Duration::from_millis(config.request_timeout_ms)).build()?;

        Ok(Self {
            client,
            base,
            database: config.database.clone(),
            credentials,
            page_size: config.find_page_size.max(1),
        })
    }

    /// Connects, creating the database and its query index when absent.
    ///
    /// # Errors
    /// Returns `StoreError::Unauthorized` if the credentials are rejected, or a
    /// transport error if CouchDB is unreachable.
    #[tracing::instrument(skip(config), fields(database = %config.database), err)]
    pub async fn connect(config: &StoreConfig) -> Result<Self, StoreError> {
        let store = Self::new(config)?;
        store.ensure_database().await?;
        store.ensure_index().await?;
        tracing::info!(host = ?store.base.host_str(), "Connected to CouchDB");
        Ok(store)
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, StoreError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|()| StoreError::InvalidUrl(self.base.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let req = self.client.request(method, url);
        match &self.credentials {
            Some(c) => req.basic_auth(&c.username, c.password.as_ref()),
            None => req,
        }
    }

    async fn error_for(resp: Response) -> StoreError {
        let status = resp.status();
        match status {
            StatusCode::NOT_FOUND => StoreError::NotFound,
            StatusCode::CONFLICT => StoreError::Conflict,
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => StoreError::Unauthorized,
            _ => {
                let body = resp.json::<ErrorBody>().await.unwrap_or_default();
                let reason = body
                    .reason
                    .or(Some(body.error).filter(|e| !e.is_empty()))
                    .unwrap_or_else(|| status.canonical_reason().unwrap_or("unknown").to_string());
                StoreError::Unexpected { status: status.as_u16(), reason }
            }
        }
    }

    async fn ensure_database(&self) -> Result<(), StoreError> {
        let url = self.endpoint(&[&self.database])?;
        let resp = self.request(Method::HEAD, url.clone()).send().await?;

        match resp.status() {
            s if s.is_success() => Ok(()),
            StatusCode::NOT_FOUND => {
                tracing::info!(database = %self.database, "Database missing, creating it");
                let resp = self.request(Method::PUT, url).send().await?;
                // 412: created concurrently by another node
                if resp.status().is_success() || resp.status() == StatusCode::PRECONDITION_FAILED {
                    Ok(())
                } else {
                    Err(Self::error_for(resp).await)
                }
            }
            _ => Err(Self::error_for(resp).await),
        }
    }

    async fn ensure_index(&self) -> Result<(), StoreError> {
        let url = self.endpoint(&[&self.database, "_index"])?;
        let body = json!({
            "index": { "fields": ["recipientId", "timestamp"] },
            "name": RECIPIENT_INDEX,
            "type": "json",
        });

        let resp = self.request(Method::POST, url).json(&body).send().await?;
        if resp.status().is_success() { Ok(()) } else { Err(Self::error_for(resp).await) }
    }

    async fn find_page(&self, url: Url, body: &Value) -> Result<FindResponse, StoreError> {
        let resp = self.request(Method::POST, url).json(body).send().await?;
        if !resp.status().is_success() {
            return Err(Self::error_for(resp).await);
        }

        let page: FindResponse = resp.json().await?;
        if let Some(warning) = &page.warning {
            tracing::debug!(%warning, "CouchDB query warning");
        }
        Ok(page)
    }
}

/// Translates a query into a Mango `_find` request body.
fn mango_body(query: &FindQuery, limit: usize) -> Value {
    let mut selector = Map::new();
    for (field, condition) in &query.selector.fields {
        let (op, value) = match condition {
            Condition::Eq(v) => ("$eq", v),
            Condition::Gt(v) => ("$gt", v),
        };
        let entry = selector.entry(field.clone()).or_insert_with(|| Value::Object(Map::new()));
        if let Some(ops) = entry.as_object_mut() {
            ops.insert(op.to_string(), value.clone());
        }
    }

    let sort: Vec<Value> = query
        .sort
        .iter()
        .map(|(field, order)| {
            let dir = match order {
                SortOrder::Asc => "asc",
                SortOrder::Desc => "desc",
            };
            json!({ field.as_str(): dir })
        })
        .collect();

    json!({
        "selector": selector,
        "sort": sort,
        "limit": limit,
    })
}

#[async_trait]
impl DocumentStore for CouchStore {
    #[tracing::instrument(level = "debug", skip(self, doc), err)]
    async fn put(&self, id: &str, doc: Value) -> Result<String, StoreError> {
        let url = self.endpoint(&[&self.database, id])?;
        let resp = self.request(Method::PUT, url).json(&doc).send().await?;
        if !resp.status().is_success() {
            return Err(Self::error_for(resp).await);
        }
        let body: PutResponse = resp.json().await?;
        Ok(body.rev)
    }

    #[tracing::instrument(level = "debug", skip(self), err(level = "debug"))]
    async fn get(&self, id: &str) -> Result<Value, StoreError> {
        let url = self.endpoint(&[&self.database, id])?;
        let resp = self.request(Method::GET, url).send().await?;
        if !resp.status().is_success() {
            return Err(Self::error_for(resp).await);
        }
        Ok(resp.json().await?)
    }

    async fn find(&self, query: FindQuery) -> Result<DocumentStream, StoreError> {
        let url = self.endpoint(&[&self.database, "_find"])?;
        let body = mango_body(&query, self.page_size);
        let store = self.clone();

        // `None` once the last page has been read, otherwise the bookmark to resume from.
        let pages = stream::try_unfold(Some(None::<String>), move |cursor| {
            let store = store.clone();
            let url = url.clone();
            let mut body = body.clone();
            async move {
                let Some(bookmark) = cursor else {
                    return Ok(None);
                };
                if let Some(bookmark) = bookmark {
                    body["bookmark"] = Value::String(bookmark);
                }

                let page = store.find_page(url, &body).await?;
                let next = match page.bookmark {
                    Some(b) if page.docs.len() >= store.page_size => Some(Some(b)),
                    _ => None,
                };
                Ok::<_, StoreError>(Some((page.docs, next)))
            }
        });

        Ok(pages.map_ok(|docs| stream::iter(docs.into_iter().map(Ok::<Value, StoreError>))).try_flatten().boxed())
    }

    #[tracing::instrument(level = "debug", skip(self), err(level = "debug"))]
    async fn delete(&self, id: &str, rev: &str) -> Result<(), StoreError> {
        let mut url = self.endpoint(&[&self.database, id])?;
        url.query_pairs_mut().append_pair("rev", rev);

        let resp = self.request(Method::DELETE, url).send().await?;
        if resp.status().is_success() {
            return Ok(());
        }

        match Self::error_for(resp).await {
            // A stale revision on a document that is already gone reads as "not found".
            StoreError::Conflict => match self.get(id).await {
                Err(StoreError::NotFound) => Err(StoreError::NotFound),
                _ => Err(StoreError::Conflict),
            },
            e => Err(e),
        }
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let url = self.endpoint(&["_up"])?;
        let resp = self.request(Method::GET, url).send().await?;
        if resp.status().is_success() { Ok(()) } else { Err(Self::error_for(resp).await) }
    }
}
