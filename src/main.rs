//! Athar · Python course backend
//!
//! - Axum HTTP + WebSocket API
//! - Python sandbox worker (warmed in the background at startup)
//! - Optional OpenAI-compatible verdicts (via environment variables)
//!
//! Important env variables:
//!   PORT              : u16 (default 3000)
//!   ATHAR_CONFIG_PATH : path to TOML config (sandbox, prompts, curriculum)
//!   PYTHON_BIN        : interpreter to run learner code with (default "python3")
//!   OPENAI_API_KEY    : enables the reasoning endpoint if present
//!   OPENAI_BASE_URL   : default "https://api.openai.com/v1"
//!   OPENAI_MODEL      : default "gpt-4o-mini"
//!   PROGRESS_DIR      : directory for JSON progress snapshots (in-memory if unset)
//!   LOG_LEVEL         : tracing filter, e.g. "debug" or full directives
//!   LOG_FORMAT        : "pretty" (default) or "json"

use std::{net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tracing::{info, instrument};

use athar_backend::config::AppConfig;
use athar_backend::routes::build_router;
use athar_backend::state::AppState;
use athar_backend::telemetry;

#[instrument(level = "info", skip_all)]
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
  telemetry::init_tracing();

  let cfg = AppConfig::load_from_env();

  // Build shared application state (catalog, sandbox, verdicts, progress).
  let state = Arc::new(AppState::new(&cfg)?);
  if cfg.sandbox.warm_on_start {
    state.spawn_warmup();
  }

  // Build the HTTP router with routes, CORS and tracing layers.
  let app = build_router(state.clone());

  // Read port from env or default to 3000.
  let addr: SocketAddr = std::env::var("PORT")
    .ok()
    .and_then(|p| p.parse::<u16>().ok())
    .map(|port| SocketAddr::from(([0, 0, 0, 0], port)))
    .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 3000)));

  let listener = TcpListener::bind(addr).await?;
  info!(target: "athar_backend", %addr, "HTTP server listening");
  axum::serve(listener, app)
    .with_graceful_shutdown(shutdown_signal())
    .await?;
  info!(target: "athar_backend", "Server stopped");
  Ok(())
}

async fn shutdown_signal() {
  if let Err(e) = tokio::signal::ctrl_c().await {
    tracing::error!(target: "athar_backend", error = %e, "Failed to listen for shutdown signal");
    std::future::pending::<()>().await;
  }
  info!(target: "athar_backend", "Shutdown requested");
}
