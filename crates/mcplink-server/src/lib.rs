//! HTTP server for mcplink.
//!
//! Exposes the session service as a REST API: connect, OAuth callback,
//! session listing, tool listing and invocation, disconnect.

pub mod routes;
pub mod state;

pub use routes::create_router;
pub use state::AppState;

use mcplink_storage::Storage;
use tracing::info;

/// Bind `address` and serve the API until the process exits.
pub async fn serve<S: Storage + 'static>(
    state: AppState<S>,
    address: &str,
) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(address).await?;
    info!(address = %listener.local_addr()?, "Starting mcplink server");
    axum::serve(listener, create_router(state)).await
}
