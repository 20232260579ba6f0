//! HTTP server implementation using Axum.

use crate::handlers::{handle_health, handle_rpc};
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use callwire::config::ServerConfig;
use callwire::{Executor, ProtocolHandler};
use std::net::SocketAddr;
use std::sync::Arc;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// Application state shared across handlers.
pub struct AppState {
    /// Resolves and invokes registered callables
    pub executor: Arc<dyn Executor>,
    /// Protocol handlers, tried in order
    pub handlers: Vec<Arc<dyn ProtocolHandler>>,
}

/// Build the router for `state`.
pub fn router(state: AppState) -> Router {
    // Configure CORS for development
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route(ServerConfig::HEALTH_PATH, get(handle_health))
        .route(ServerConfig::RPC_PATH, post(handle_rpc))
        .layer(DefaultBodyLimit::max(ServerConfig::MAX_BODY_BYTES))
        .layer(ConcurrencyLimitLayer::new(ServerConfig::MAX_CONCURRENT_REQUESTS))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(Arc::new(state))
}

/// Start the JSON-RPC HTTP server.
///
/// Returns the actual address the server is bound to (useful when port=0).
pub async fn start_server(state: AppState, host: &str, port: u16) -> anyhow::Result<SocketAddr> {
    let app = router(state);

    // Parse the address
    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;

    // Bind to the address
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    info!("Server listening on {}", actual_addr);

    // Spawn the server in the background
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("Server error: {}", e);
        }
    });

    Ok(actual_addr)
}
