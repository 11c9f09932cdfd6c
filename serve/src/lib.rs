//! Quill gateway.
//!
//! One axum app serves the bidirectional session channel (WebSocket at `/`)
//! and the HTTP surface: `POST /webhooks/:provider`, `POST /commands/:tool`,
//! `GET /health`, `GET /metrics`. Build a [`Gateway`] from a
//! [`quill::Backend`], then run [`serve_on_listener`].

mod app;
mod commands;
mod connection;
mod http;
mod turn;

pub use app::{router, Gateway};

use std::sync::Arc;

use tokio::net::TcpListener;

/// Serves the gateway on an already-bound listener until the process exits.
pub async fn serve_on_listener(
    listener: TcpListener,
    gateway: Arc<Gateway>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let app = router(gateway);
    tracing::info!(addr = ?listener.local_addr().ok(), "gateway listening");
    axum::serve(listener, app).await?;
    Ok(())
}
