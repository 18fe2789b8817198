//! modelhub server module
//!
//! Runs the HTTP API and the RPC endpoint side by side over one shared
//! [`Hub`](crate::service::Hub).

mod api;
mod error;
mod handlers;
mod state;

pub use api::create_router;
pub use error::ServerError;
pub use handlers::PredictRequest;
pub use state::AppState;

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{info, warn};

use crate::config::Settings;
use crate::service::Hub;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub rpc_host: String,
    pub rpc_port: u16,
    pub max_upload_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

impl ServerConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            host: settings.api_host.clone(),
            port: settings.api_port,
            rpc_host: settings.rpc_host.clone(),
            rpc_port: settings.rpc_port,
            max_upload_size: settings.max_upload_size,
        }
    }
}

async fn wait_for_stop(mut rx: watch::Receiver<bool>) {
    while !*rx.borrow() {
        if rx.changed().await.is_err() {
            return;
        }
    }
}

/// Serve HTTP and RPC until ctrl+c
pub async fn run_server(config: ServerConfig, hub: Arc<Hub>) -> anyhow::Result<()> {
    let state = Arc::new(AppState::new(config.clone(), hub));
    let start_time = state.started_at;

    let http_addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    let rpc_addr: SocketAddr = format!("{}:{}", config.rpc_host, config.rpc_port).parse()?;
    info!(
        http = %http_addr,
        rpc = %rpc_addr,
        max_upload_size_mb = config.max_upload_size / 1024 / 1024,
        tracking = state.hub.tracking_enabled(),
        versioning = state.hub.versioning_enabled(),
        started_at = %start_time.to_rfc3339(),
        "modelhub server starting"
    );

    let http_listener = tokio::net::TcpListener::bind(http_addr).await?;
    let rpc_listener = tokio::net::TcpListener::bind(rpc_addr).await?;
    info!(url = %format!("http://{}/api", http_addr), "REST API available");
    info!(url = %format!("http://{}/rpc", rpc_addr), "RPC endpoint available");
    info!(url = %format!("http://{}/health", http_addr), "Health endpoint available");

    // Graceful shutdown on ctrl+c, fanned out to both listeners
    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Could not listen for ctrl+c; stop the process to shut down");
            return;
        }
        let stop_time = chrono::Utc::now();
        info!(
            stopped_at = %stop_time.to_rfc3339(),
            uptime_secs = (stop_time - start_time).num_seconds(),
            "Shutdown signal received, stopping server gracefully"
        );
        let _ = stop_tx.send(true);
    });

    let http = axum::serve(http_listener, create_router(Arc::clone(&state)))
        .with_graceful_shutdown(wait_for_stop(stop_rx.clone()));
    let rpc = axum::serve(rpc_listener, crate::rpc::create_rpc_router(Arc::clone(&state)))
        .with_graceful_shutdown(wait_for_stop(stop_rx));

    info!(pid = std::process::id(), "Server started successfully (press ctrl+c to stop)");
    tokio::try_join!(
        async { http.await.map_err(anyhow::Error::from) },
        async { rpc.await.map_err(anyhow::Error::from) },
    )?;

    info!("Server shut down cleanly");
    Ok(())
}
