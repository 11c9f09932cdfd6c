//! Process entry point: load config, build the backend, serve.

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use gh::OctocrabPulls;
use quill::{Backend, Settings};
use serve::Gateway;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Env > .env > ~/.config/quill/config.toml, applied once.
    config::load_and_apply("quill", None)?;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let settings = Settings::from_env();
    let backend = Backend::build(settings)?;

    // Load-if-present: a persisted codebase index skips re-embedding; a full
    // pass is `POST /commands/reindex`.
    backend
        .indexer
        .ensure_indexed(false, &CancellationToken::new())
        .await?;

    let pr_api = match std::env::var("GITHUB_TOKEN") {
        Ok(token) => Some(Arc::new(OctocrabPulls::new(token)?) as Arc<dyn gh::PullRequestApi>),
        Err(_) => {
            tracing::warn!("GITHUB_TOKEN not set; autonomous jobs cannot open pull requests");
            None
        }
    };
    let gateway = Gateway::new(backend.clone(), pr_api)?;

    let addr = std::env::var("QUILL_LISTEN").unwrap_or_else(|_| "127.0.0.1:8080".to_string());
    let listener = TcpListener::bind(&addr).await?;
    let result = serve::serve_on_listener(listener, gateway).await;

    backend.shutdown().await?;
    result
}
