#![forbid(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::todo)]
#![warn(clippy::panic)]
#![warn(clippy::dbg_macro)]
#![warn(clippy::print_stdout)]
#![warn(clippy::print_stderr)]
#![warn(clippy::clone_on_ref_ptr)]
#![warn(unreachable_pub)]
#![warn(missing_debug_implementations)]
#![warn(unused_qualifications)]
#![deny(unused_must_use)]

pub mod adapters;
pub mod api;
pub mod config;
pub mod domain;
pub mod error;
pub mod services;
pub mod telemetry;

use crate::adapters::store::{DocumentStore, MessageRepository};
use crate::api::ServiceContainer;
use crate::config::Config;
use crate::services::expiry_reaper::ExpiryReaper;
use crate::services::health_service::HealthService;
use crate::services::message_service::MessageService;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// The wired application, ready to be served.
#[derive(Debug)]
pub struct App {
    pub services: ServiceContainer,
    /// Handle for draining background expiry deletions at shutdown.
    pub reaper: ExpiryReaper,
}

#[derive(Debug)]
pub struct AppBuilder {
    config: Config,
    store: Option<Arc<dyn DocumentStore>>,
}

impl AppBuilder {
    #[must_use]
    pub const fn new(config: Config) -> Self {
        Self { config, store: None }
    }

    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn DocumentStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Wires repositories and services. Performs no I/O.
    ///
    /// # Errors
    /// Returns an error if no store was provided.
    pub fn build(self) -> anyhow::Result<App> {
        let store = self.store.ok_or_else(|| anyhow::anyhow!("document store is required"))?;

        let repo = MessageRepository::new(store);
        let reaper = ExpiryReaper::new(repo.clone());
        let message_service = MessageService::new(repo.clone(), reaper.clone(), self.config.messaging.clone());
        let health_service = HealthService::new(
            self.config.server.node_id.clone(),
            repo,
            Duration::from_millis(self.config.store.request_timeout_ms),
        );

        Ok(App { services: ServiceContainer { message_service, health_service }, reaper })
    }
}

/// Routes panics through the log sink before the default hook runs.
pub fn setup_panic_hook() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let location = info.location().map(|l| format!("{}:{}", l.file(), l.line())).unwrap_or_default();
        tracing::error!(panic = %info, %location, "Panic occurred");
        default_hook(info);
    }));
}

/// Flips the shutdown channel on SIGINT or SIGTERM.
pub fn spawn_signal_handler(shutdown_tx: watch::Sender<bool>) {
    tokio::spawn(async move {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for Ctrl+C");
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to listen for SIGTERM");
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            () = ctrl_c => {},
            () = terminate => {},
        }

        tracing::info!("Shutdown signal received");
        let _ = shutdown_tx.send(true);
    });
}
