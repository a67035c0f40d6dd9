//! Local control API.
//!
//! Thin HTTP handlers over [`CastService`]; see [`http::create_router`] for
//! the route table.

use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;
use tokio::net::TcpListener;

use crate::services::CastService;
use crate::state::Config;

pub mod http;
pub mod response;

/// Errors that can occur when starting or running the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Failed to bind to a TCP port.
    #[error("Failed to bind to port: {0}")]
    Bind(#[from] std::io::Error),
}

/// Shared application state for the API layer.
///
/// Holds references to services only; all behavior lives in the services.
#[derive(Clone)]
pub struct AppState {
    /// Casting facade.
    pub cast: Arc<CastService>,
    /// Application configuration.
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(cast: Arc<CastService>, config: Config) -> Self {
        Self {
            cast,
            config: Arc::new(config),
        }
    }
}

/// Binds the configured API port on all interfaces and serves until the
/// listener fails.
pub async fn start_server(state: AppState) -> Result<(), ServerError> {
    let addr = SocketAddr::from(([0, 0, 0, 0], state.config.api_port));
    let listener = TcpListener::bind(addr).await?;
    serve(listener, state).await
}

/// Serves the control API on an already bound listener.
pub async fn serve(listener: TcpListener, state: AppState) -> Result<(), ServerError> {
    let addr = listener.local_addr()?;
    log::info!("[API] Listening on http://{}", addr);

    let app = http::create_router(state);
    axum::serve(listener, app).await?;
    Ok(())
}
