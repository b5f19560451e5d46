use axum::routing::{get, post};
use axum::Router;
use std::net::SocketAddr;
use tracing::info;

use crate::client::NodeClient;
use crate::routes;

/// The node's HTTP surface.
pub fn router(client: NodeClient) -> Router {
    Router::new()
        .route("/submit_transaction", post(routes::submit_transaction))
        .route("/send", post(routes::send))
        .route("/api/blocks/range", get(routes::blocks_range))
        .route("/api/health", get(routes::health))
        .route("/api/account/{address}", get(routes::account))
        .with_state(client)
}

/// Bind and serve until the process exits.
pub async fn serve(addr: SocketAddr, client: NodeClient) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %addr, "HTTP API listening");
    axum::serve(listener, router(client)).await
}
