//! Relay server listener
//!
//! Binds the HTTP listener and serves the relay router. On shutdown the
//! registry is closed first so open stream responses end and the graceful
//! drain can finish.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;

use super::config::ServerConfig;
use super::handler;
use crate::error::Result;
use crate::registry::SessionRegistry;

/// HTTP relay server
pub struct RelayServer {
    config: ServerConfig,
    registry: Arc<SessionRegistry>,
}

impl RelayServer {
    /// Create a server for `registry`
    pub fn new(config: ServerConfig, registry: Arc<SessionRegistry>) -> Self {
        Self { config, registry }
    }

    /// Get a reference to the session registry
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Router serving this server's registry
    pub fn router(&self) -> Router {
        handler::router(Arc::clone(&self.registry))
    }

    /// Run the server
    ///
    /// This method blocks until the server fails.
    pub async fn run(&self) -> Result<()> {
        self.run_until(std::future::pending()).await
    }

    /// Run the server with graceful shutdown
    pub async fn run_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        self.serve(listener, shutdown).await
    }

    /// Serve on an already bound listener until `shutdown` resolves
    pub async fn serve<F>(&self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = listener.local_addr()?;
        tracing::info!(
            addr = %addr,
            streams = self.registry.definition_count(),
            "Relay server listening"
        );

        let registry = Arc::clone(&self.registry);
        axum::serve(listener, self.router())
            .with_graceful_shutdown(async move {
                shutdown.await;
                tracing::info!("Shutdown signal received");
                registry.shutdown();
            })
            .await?;

        tracing::info!("Relay server stopped");
        Ok(())
    }

    /// Get the bind address
    pub fn bind_addr(&self) -> SocketAddr {
        self.config.bind_addr
    }
}
