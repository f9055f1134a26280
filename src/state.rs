use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::config::ConfigStore;
use crate::stream::StreamServer;

/// Application-wide state shared across handlers
pub struct AppState {
    /// Configuration store
    pub config: ConfigStore,
    /// Camera stream server
    pub server: Arc<StreamServer>,
    /// Cancelled on process shutdown; viewer sessions hang off child tokens
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(
        config: ConfigStore,
        server: Arc<StreamServer>,
        shutdown: CancellationToken,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            server,
            shutdown,
        })
    }

    /// Stop capturing and close all viewers
    pub async fn cleanup(&self) {
        tracing::info!("Shutting down stream server...");
        self.shutdown.cancel();
        self.server.stop().await;
    }
}
