//! # Payflow Server
//!
//! HTTP front of the payment event bus: producers `POST` events, clients
//! follow them live over Server-Sent Events.
//!
//! ## Example
//! ```no_run
//! use payflow_server::Server;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     Server::builder()
//!         .port(4583)
//!         .build()
//!         .await?
//!         .run()
//!         .await
//! }
//! ```

pub mod config;
mod error;
pub mod router;
mod state;

pub use error::ApiError;
pub use state::AppState;

use crate::config::{AppConfig, ServerConfig};
use anyhow::{Context, Result};
use axum_server::Handle;
use payflow_events::{Broker, EventBus, PaymentBus, RedisBroker};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};

/// A fluent builder for configuring and initializing the [`Server`].
#[must_use = "builders do nothing unless you call .build()"]
#[derive(Debug, Default)]
pub struct ServerBuilder {
    cfg: AppConfig,
}

impl ServerBuilder {
    pub fn config(mut self, cfg: AppConfig) -> Self {
        self.cfg = cfg;
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.cfg.server.port = port;
        self
    }

    /// Connects the configured payment bus.
    ///
    /// # Errors
    /// Fails when the bus configuration is invalid or the broker is unreachable.
    pub async fn build(self) -> Result<Server> {
        let address = SocketAddr::new(self.cfg.server.address, self.cfg.server.port);
        info!(address = %address, bus = %self.cfg.events.kind, "Initializing server");

        let bus = PaymentBus::connect(&self.cfg.events)
            .await
            .context("Failed to initialize payment event bus")?;

        Ok(Server::new(self.cfg.server, bus))
    }
}

/// A fully initialized server ready to run.
#[must_use = "call .run().await to start the server"]
#[derive(Debug)]
pub struct Server<B: Broker = RedisBroker> {
    cfg: ServerConfig,
    state: AppState<B>,
}

impl Server {
    pub fn builder() -> ServerBuilder {
        ServerBuilder::default()
    }
}

impl<B: Broker> Server<B> {
    /// Wraps an already built bus.
    pub fn new(cfg: ServerConfig, bus: PaymentBus<B>) -> Self {
        Self { cfg, state: AppState::new(bus) }
    }

    /// Serves until Ctrl+C or SIGTERM, then drains connections and closes the bus.
    ///
    /// # Errors
    /// Returns an error if the listener cannot bind to the configured address.
    pub async fn run(self) -> Result<()> {
        let address = SocketAddr::new(self.cfg.address, self.cfg.port);
        let grace = Duration::from_secs(self.cfg.shutdown_grace_secs);
        let app = router::init(self.state.clone());

        let handle = Handle::<SocketAddr>::new();
        let shutdown_handle = handle.clone();
        let bus = self.state.clone();

        tokio::spawn(async move {
            if let Err(e) = shutdown_signal().await {
                error!("Error while waiting for shutdown signal: {e}");
                return;
            }
            info!("Shutdown signal received, starting graceful shutdown...");
            // Ends open event streams so their connections can finish.
            if let Err(e) = bus.bus().close().await {
                warn!(error = %e, "Payment bus did not close cleanly");
            }
            shutdown_handle.graceful_shutdown(Some(grace));
        });

        info!("Starting HTTP server on http://{address}");
        axum_server::bind(address)
            .handle(handle)
            .serve(app.into_make_service())
            .await
            .context("HTTP server failed")?;

        self.state.bus().close().await.context("Failed to close payment bus")?;
        info!("Server shutdown complete");
        Ok(())
    }

    #[must_use]
    pub const fn state(&self) -> &AppState<B> {
        &self.state
    }
}

/// Waits for SIGINT (Ctrl+C) or SIGTERM.
async fn shutdown_signal() -> Result<()> {
    let ctrl_c = async { signal::ctrl_c().await.context("Failed to install Ctrl+C handler") };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .context("Failed to install SIGTERM handler")?
            .recv()
            .await;
        Ok::<_, anyhow::Error>(())
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<Result<()>>();

    tokio::select! {
        res = ctrl_c => res?,
        res = terminate => res?,
    }

    Ok(())
}
