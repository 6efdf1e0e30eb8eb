//! HTTP surface of the mediator.
//!
//! Provides:
//! - `POST /api/chat`, the mediated completion endpoint
//! - `GET /api/health`, liveness with uptime
//! - static file serving for the bundled web client

pub mod mediator;
pub mod rate_limit;
pub mod routes;
pub mod state;

pub use mediator::{MediationError, MediatorConfig, RequestMediator};
pub use rate_limit::{RateLimiter, RateLimiterConfig};
pub use routes::create_router;
pub use state::AppState;

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::llm::ModelProvider;

/// Default server port.
pub const DEFAULT_PORT: u16 = 3000;

/// Start the HTTP server.
///
/// # Errors
/// Returns an error if the server fails to start.
pub async fn run_server<P>(
    state: Arc<AppState<P>>,
    port: u16,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
where
    P: ModelProvider + 'static,
{
    run_server_with_shutdown(state, port, std::future::pending()).await
}

/// Start the HTTP server with graceful shutdown support.
///
/// The server stops accepting new connections when `shutdown_signal`
/// completes.
///
/// # Errors
/// Returns an error if the server fails to start.
pub async fn run_server_with_shutdown<P, F>(
    state: Arc<AppState<P>>,
    port: u16,
    shutdown_signal: F,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
where
    P: ModelProvider + 'static,
    F: Future<Output = ()> + Send + 'static,
{
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app: Router = create_router(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Ase mediator listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await?;

    Ok(())
}
