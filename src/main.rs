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

use relay_node::config::Config;
use relay_node::services::expiry_reaper::ExpiryReaper;
use relay_node::{AppBuilder, adapters, telemetry};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::sync::watch;
use tracing::Instrument;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load();
    let telemetry_guard = telemetry::init_telemetry(&config.telemetry)?;

    relay_node::setup_panic_hook();

    let boot_span = tracing::info_span!("boot_server", node_id = %config.server.node_id);
    let (listener, app_router, shutdown_tx, shutdown_rx, reaper) = async {
        // Phase 1: Infrastructure Setup (Resources)
        let store = adapters::store::connect(&config.store).await.map_err(|e| {
            tracing::error!(error = %e, "Document store unavailable at startup");
            e
        })?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        relay_node::spawn_signal_handler(shutdown_tx.clone());

        // Phase 2: Component Wiring (Pure logic, no side effects)
        let app = AppBuilder::new(config.clone()).with_store(store).build()?;

        // Phase 3: Runtime Setup (Listener and Router)
        let app_router = relay_node::api::app_router(app.services);

        let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
        tracing::info!(address = %addr, "listening");
        let listener = tokio::net::TcpListener::bind(addr).await?;

        Ok::<
            (tokio::net::TcpListener, axum::Router, watch::Sender<bool>, watch::Receiver<bool>, ExpiryReaper),
            anyhow::Error,
        >((listener, app_router, shutdown_tx, shutdown_rx, app.reaper))
    }
    .instrument(boot_span)
    .await?;

    // Phase 4: Start Runtime
    let mut server_rx = shutdown_rx.clone();
    let server = axum::serve(listener, app_router).with_graceful_shutdown(async move {
        let _ = server_rx.wait_for(|&s| s).await;
    });

    if let Err(e) = server.await {
        tracing::error!(error = %e, "Server error");
    }

    // Phase 5: Graceful Shutdown Orchestration
    let _ = shutdown_tx.send(true);
    let drain_timeout = Duration::from_secs(config.server.shutdown_timeout_secs);
    if tokio::time::timeout(drain_timeout, reaper.drain()).await.is_ok() {
        tracing::info!("Background deletions finished.");
    } else {
        tracing::warn!(pending = reaper.pending(), "Timeout waiting for background deletions, abandoning them.");
        reaper.cancel();
    }

    telemetry_guard.shutdown();
    Ok(())
}
