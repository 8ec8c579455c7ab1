#![allow(dead_code, unreachable_pub, clippy::unwrap_used, clippy::missing_panics_doc, missing_debug_implementations)]
use relay_node::AppBuilder;
use relay_node::adapters::store::{DocumentStore, MemoryStore};
use relay_node::config::Config;
use relay_node::services::expiry_reaper::ExpiryReaper;
use serde_json::{Value, json};
use std::sync::{Arc, Once};
use tokio::sync::watch;

static INIT: Once = Once::new();

pub fn setup_tracing() {
    INIT.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "warn".into())
            .add_directive("relay_node=debug".parse().unwrap())
            .add_directive("tower=warn".parse().unwrap())
            .add_directive("hyper=warn".parse().unwrap())
            .add_directive("reqwest=warn".parse().unwrap());

        tracing_subscriber::fmt().with_env_filter(filter).init();
    });
}

pub fn get_test_config() -> Config {
    let mut config = Config::default();
    config.server.host = "127.0.0.1".to_string();
    config.server.port = 0;
    config.server.node_id = "test-node".to_string();
    config
}

pub fn now() -> i64 {
    time::OffsetDateTime::now_utc().unix_timestamp()
}

pub fn message_body(id: &str, recipient: &str, timestamp: i64) -> Value {
    json!({
        "id": id,
        "senderId": "bob",
        "senderUsername": "bob",
        "senderDeviceId": 1,
        "recipientId": recipient,
        "recipientUsername": recipient,
        "recipientDeviceId": 1,
        "messageType": "whisper",
        "encryptedPayload": "3q2+7w==",
        "timestamp": timestamp,
        "delivered": false,
        "deliveredAt": null,
    })
}

pub struct TestApp {
    pub server_url: String,
    pub client: reqwest::Client,
    pub config: Config,
    pub store: Arc<MemoryStore>,
    pub reaper: ExpiryReaper,
    pub shutdown_tx: watch::Sender<bool>,
}

impl TestApp {
    pub async fn spawn() -> Self {
        Self::spawn_with_config(get_test_config()).await
    }

    pub async fn spawn_with_config(config: Config) -> Self {
        let store = Arc::new(MemoryStore::new());
        Self::spawn_inner(config, Arc::clone(&store) as Arc<dyn DocumentStore>, store).await
    }

    /// Spawns against an arbitrary store; `self.store` is then unused.
    pub async fn spawn_with_store(store: Arc<dyn DocumentStore>) -> Self {
        Self::spawn_inner(get_test_config(), store, Arc::new(MemoryStore::new())).await
    }

    async fn spawn_inner(config: Config, backend: Arc<dyn DocumentStore>, store: Arc<MemoryStore>) -> Self {
        setup_tracing();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let app = AppBuilder::new(config.clone()).with_store(backend).build().expect("Failed to build app");

        let listener = tokio::net::TcpListener::bind(format!("{}:{}", config.server.host, config.server.port))
            .await
            .expect("Failed to bind test listener");
        let addr = listener.local_addr().unwrap();
        let router = relay_node::api::app_router(app.services);

        let mut rx = shutdown_rx;
        tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    let _ = rx.wait_for(|&s| s).await;
                })
                .await
                .unwrap();
        });

        Self {
            server_url: format!("http://{addr}"),
            client: reqwest::Client::new(),
            config,
            store,
            reaper: app.reaper,
            shutdown_tx,
        }
    }

    pub async fn post_message(&self, body: &Value) -> reqwest::Response {
        self.client.post(format!("{}/messages", self.server_url)).json(body).send().await.unwrap()
    }

    /// Stores a message and returns the response body, asserting 201.
    pub async fn store_message(&self, body: &Value) -> Value {
        let resp = self.post_message(body).await;
        assert_eq!(resp.status(), 201, "store failed");
        resp.json().await.unwrap()
    }

    /// Lists a user's messages, asserting 200.
    pub async fn list_messages(&self, user_id: &str) -> Value {
        let resp = self.client.get(format!("{}/messages/{}", self.server_url, user_id)).send().await.unwrap();
        assert_eq!(resp.status(), 200, "list failed");
        resp.json().await.unwrap()
    }

    pub async fn delete_message(&self, id: &str, rev: Option<&str>) -> reqwest::Response {
        let url = match rev {
            Some(rev) => format!("{}/messages/{}?rev={}", self.server_url, id, rev),
            None => format!("{}/messages/{}", self.server_url, id),
        };
        self.client.delete(url).send().await.unwrap()
    }
}
