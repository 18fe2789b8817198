//! Application state shared by the HTTP and RPC routers

use std::sync::Arc;

use crate::error::ServiceError;
use crate::service::Hub;

use super::error::{Result, ServerError};
use super::ServerConfig;

/// Application state shared across handlers
pub struct AppState {
    pub config: ServerConfig,
    pub hub: Arc<Hub>,
    pub started_at: chrono::DateTime<chrono::Utc>,
}

impl AppState {
    pub fn new(config: ServerConfig, hub: Arc<Hub>) -> Self {
        Self {
            config,
            hub,
            started_at: chrono::Utc::now(),
        }
    }

    /// Run a lifecycle operation on the blocking pool.
    ///
    /// Training, file IO and side-channel calls all block, so no handler calls
    /// the hub directly on the async executor.
    pub async fn run<T, F>(&self, op: F) -> Result<T>
    where
        F: FnOnce(&Hub) -> std::result::Result<T, ServiceError> + Send + 'static,
        T: Send + 'static,
    {
        let hub = Arc::clone(&self.hub);
        tokio::task::spawn_blocking(move || op(&hub))
            .await
            .map_err(|e| ServerError::Internal(format!("Worker task failed: {}", e)))?
            .map_err(ServerError::from)
    }
}
