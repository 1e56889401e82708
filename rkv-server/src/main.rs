//! # RecordKV Development Server
//!
//! Provide a Redis-compatible TCP server backed by the in-memory store, for
//! running the adapter without an external Redis.
//!
//! ## Design Principles
//!
//! 1. **Single Responsibility**: Parsing and dispatch live in the library.
//! 2. **Async First**: Tokio handles concurrent connections efficiently.
//! 3. **Fail-Open Defaults**: Protocol errors are localized to the connection.

use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use rkv_server::{server, ServerState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let addr = std::env::var("RKV_ADDR").unwrap_or_else(|_| "127.0.0.1:6379".to_string());
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(addr = %listener.local_addr()?, "rkv-server listening");

    let state = Arc::new(ServerState::new());
    server::serve(listener, state, async {
        let _ = tokio::signal::ctrl_c().await;
    })
    .await?;

    info!("rkv-server shut down");
    Ok(())
}
