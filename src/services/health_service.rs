use crate::adapters::store::MessageRepository;
use opentelemetry::{KeyValue, global, metrics::Gauge};
use std::time::Duration;
use tokio::time::timeout;

#[derive(Clone, Debug)]
pub struct Metrics {
    pub status: Gauge<i64>,
}

impl Metrics {
    #[must_use]
    pub(crate) fn new() -> Self {
        let meter = global::meter("relay-node");
        Self {
            status: meter
                .i64_gauge("relay_health_status")
                .with_description("Status of health checks (1 for ok, 0 for error)")
                .build(),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Debug)]
pub struct HealthService {
    node_id: String,
    repo: MessageRepository,
    store_timeout: Duration,
    metrics: Metrics,
}

impl HealthService {
    #[must_use]
    pub fn new(node_id: String, repo: MessageRepository, store_timeout: Duration) -> Self {
        Self { node_id, repo, store_timeout, metrics: Metrics::new() }
    }

    #[must_use]
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Checks document store connectivity.
    ///
    /// # Errors
    /// Returns a string describing the failure if the store is unreachable.
    pub async fn check_store(&self) -> Result<(), String> {
        match timeout(self.store_timeout, self.repo.ping()).await {
            Ok(Ok(())) => {
                self.metrics.status.record(1, &[KeyValue::new("component", "store")]);
                Ok(())
            }
            Ok(Err(e)) => {
                self.metrics.status.record(0, &[KeyValue::new("component", "store")]);
                Err(format!("Store connection failed: {e}"))
            }
            Err(_) => {
                self.metrics.status.record(0, &[KeyValue::new("component", "store")]);
                Err("Store connection timed out".to_string())
            }
        }
    }
}
