// HTTP server setup and graceful shutdown

//! # HTTP Server
//!
//! Binds the automation API and runs it until SIGINT/SIGTERM. On a signal
//! the listener stops accepting new connections and in-flight requests are
//! drained before the future resolves; the binary follows up by flushing
//! the message-bus client and closing the database pool.

use std::net::SocketAddr;

use tracing::info;

use crate::api::{self, AppState};
use crate::{CohortError, Result};

/// Builder for the automation HTTP server
pub struct HttpServerBuilder {
    port: u16,
    state: Option<AppState>,
}

impl HttpServerBuilder {
    pub fn new() -> Self {
        Self {
            port: 8090,
            state: None,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_state(mut self, state: AppState) -> Self {
        self.state = Some(state);
        self
    }

    pub fn build(self) -> Result<HttpServer> {
        let state = self
            .state
            .ok_or_else(|| CohortError::Internal("server state not configured".to_string()))?;

        Ok(HttpServer {
            port: self.port,
            state,
        })
    }
}

impl Default for HttpServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// The configured server, ready to run
pub struct HttpServer {
    port: u16,
    state: AppState,
}

impl HttpServer {
    /// Serve until a shutdown signal arrives and in-flight requests drain
    pub async fn run(self) -> Result<()> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let router = api::router(self.state);

        info!("🌐 Automation API listening on http://{}", addr);
        info!("   POST /api/v1/groups/:id/calculate");
        info!("   GET  /api/v1/groups/:id/results");
        info!("   POST /api/v1/orchestration/trigger/workflow/:id");

        axum::Server::bind(&addr)
            .serve(router.into_make_service())
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| CohortError::Internal(format!("server error: {}", e)))?;

        info!("HTTP server drained and stopped");
        Ok(())
    }
}

/// Resolve when SIGINT or SIGTERM arrives
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutdown signal received, draining connections");
}
