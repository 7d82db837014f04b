//! SOP Trainer · retrieval-augmented training assistant backend
//!
//! - Axum HTTP API + server-sent event chat stream
//! - Optional Gemini / OpenAI generation with deterministic fallback content
//! - Optional remote (Chroma-compatible) vector index with in-process fallback
//!
//! Important env variables:
//!   PORT                 : u16 (default 4000)
//!   GEMINI_API_KEY       : enables Gemini generation if present
//!   GEMINI_MODEL         : default "gemini-1.5-flash"
//!   OPENAI_API_KEY       : enables OpenAI-compatible generation if present
//!   OPENAI_BASE_URL      : default "https://api.openai.com/v1"
//!   OPENAI_MODEL         : default "gpt-4o-mini"
//!   CHROMA_URL           : enables the remote vector index if present
//!   CHROMA_COLLECTION    : default "training_documents"
//!   REMOTE_TIMEOUT_MS    : remote index / health bound (default 3000)
//!   SHUTDOWN_TIMEOUT_MS  : forced-exit bound for shutdown (default 15000)
//!   TRAINER_CONFIG_PATH  : path to TOML config (prompts, tuning, seed documents)
//!   LOG_LEVEL            : tracing filter, e.g. "debug" or full directives
//!   LOG_FORMAT           : "pretty" (default) or "json"

mod telemetry;
mod util;
mod domain;
mod error;
mod config;
mod embeddings;
mod vector_store;
mod providers;
mod fallback;
mod profiling;
mod language;
mod generation;
mod store;
mod progress;
mod quiz;
mod sse_registry;
mod streaming;
mod health;
mod state;
mod protocol;
mod routes;

use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tracing::{error, info, instrument};

use crate::config::Settings;
use crate::routes::build_router;
use crate::sse_registry::ConnectionRegistry;
use crate::state::AppState;

#[instrument(level = "info", skip_all)]
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
  telemetry::init_tracing();

  let settings = Settings::from_env();

  // Shared state: store, vector store, generation client, stream registry.
  let state = Arc::new(AppState::new(&settings));
  state.seed_documents(&settings.documents).await;

  let app = build_router(state.clone());

  let addr = SocketAddr::from(([0, 0, 0, 0], settings.port));
  let listener = TcpListener::bind(addr).await?;
  info!(target: "sop_trainer", %addr, "HTTP server listening");

  axum::serve(listener, app)
    .with_graceful_shutdown(shutdown_signal(state.streams.clone(), settings.shutdown_timeout))
    .await?;
  info!(target: "sop_trainer", "Server stopped");
  Ok(())
}

/// Resolves on SIGINT/SIGTERM after closing every open stream. Arms a
/// watchdog that force-exits if the drain outlives `timeout`.
async fn shutdown_signal(streams: ConnectionRegistry, timeout: Duration) {
  let ctrl_c = async {
    if let Err(e) = tokio::signal::ctrl_c().await {
      error!(target: "sop_trainer", error = %e, "Failed to listen for SIGINT");
      std::future::pending::<()>().await;
    }
  };

  #[cfg(unix)]
  let terminate = async {
    match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
      Ok(mut sig) => {
        sig.recv().await;
      }
      Err(e) => {
        error!(target: "sop_trainer", error = %e, "Failed to listen for SIGTERM");
        std::future::pending::<()>().await;
      }
    }
  };

  #[cfg(not(unix))]
  let terminate = std::future::pending::<()>();

  let signal = tokio::select! {
    _ = ctrl_c => "SIGINT",
    _ = terminate => "SIGTERM",
  };

  info!(target: "sop_trainer", %signal, open_streams = streams.count(), "Shutdown requested; closing streams");
  let closed = streams.close_all();
  info!(target: "sop_trainer", closed, "Streams cancelled; draining connections");

  tokio::spawn(async move {
    tokio::time::sleep(timeout).await;
    error!(target: "sop_trainer", timeout_ms = timeout.as_millis() as u64, "Shutdown timed out; forcing exit");
    std::process::exit(1);
  });
}
