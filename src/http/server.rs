//! HTTP server implementation.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use super::handlers::{check, health, ping, stats, AppState};
use super::middleware::rate_limit;
use crate::error::Result;

/// Build the service router.
///
/// `/healthz` and `/v1/check` are never gated; every other `/v1` route sits
/// behind the rate limiting middleware.
pub fn router(state: Arc<AppState>) -> Router {
    let protected = Router::new()
        .route("/v1/ping", get(ping))
        .route("/v1/stats", get(stats))
        .route_layer(middleware::from_fn_with_state(state.clone(), rate_limit));

    Router::new()
        .route("/healthz", get(health))
        .route("/v1/check", post(check))
        .merge(protected)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// HTTP server for the admission-control service.
pub struct HttpServer {
    /// Address to bind to
    addr: SocketAddr,
    /// Shared state handed to every handler
    state: Arc<AppState>,
}

impl HttpServer {
    /// Create a new HTTP server.
    pub fn new(addr: SocketAddr, state: Arc<AppState>) -> Self {
        Self { addr, state }
    }

    /// Start the HTTP server.
    ///
    /// This method will block until the server is shut down.
    pub async fn serve(self) -> Result<()> {
        self.serve_with_shutdown(std::future::pending()).await
    }

    /// Start the HTTP server with graceful shutdown.
    ///
    /// The server stops accepting connections when the provided signal
    /// resolves and returns once in-flight requests have completed.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.addr).await.map_err(|e| {
            error!(addr = %self.addr, error = %e, "Failed to bind HTTP listener");
            e
        })?;
        self.serve_on(listener, signal).await
    }

    /// Serve on an already bound listener.
    pub async fn serve_on<F>(self, listener: TcpListener, signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let addr = listener.local_addr()?;
        info!(
            addr = %addr,
            algorithm = self.state.limiter.name(),
            "Starting HTTP server"
        );

        let app = router(self.state);
        axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
            .with_graceful_shutdown(signal)
            .await
            .map_err(|e| {
                error!(error = %e, "HTTP server failed");
                e
            })?;

        info!(addr = %addr, "HTTP server stopped");
        Ok(())
    }
}
