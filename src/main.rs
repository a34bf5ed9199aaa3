//! CodeGym · AI coding-practice backend
//!
//! - Axum HTTP + WebSocket API over five AI flows (generate, check, run, chat, enhance)
//! - Per-session orchestration with persisted chat history and progress
//! - Static SPA fallback (STATIC_DIR/index.html)
//!
//! Important env variables:
//!   OPENAI_API_KEY      : required; the server refuses to start without it
//!   OPENAI_BASE_URL     : default "https://api.openai.com/v1"
//!   OPENAI_FAST_MODEL   : default "gpt-4o-mini" (check-code, chatbot)
//!   OPENAI_STRONG_MODEL : default "gpt-4o" (generate, run, enhance)
//!   OPENAI_TIMEOUT_SECS : default 60
//!   PORT                : u16 (default 3000)
//!   DATA_DIR            : file store root (default "./data")
//!   STORE_BACKEND       : "file" (default) or "memory"
//!   STATIC_DIR          : default "./static"
//!   SESSION_IDLE_SECS   : drop sessions with no socket after this long idle (default 1800)
//!   AGENT_CONFIG_PATH   : path to TOML config (prompts + learning paths)
//!   LOG_LEVEL           : tracing filter, e.g. "debug" or full directives
//!   LOG_FORMAT          : "pretty" (default) or "json"

mod telemetry;
mod util;
mod domain;
mod validate;
mod config;
mod catalog;
mod openai;
mod flows;
mod store;
mod progress;
mod session;
mod state;
mod protocol;
mod routes;
#[cfg(test)]
mod testutil;

use std::{net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tracing::{error, info, instrument};

use crate::catalog::Catalog;
use crate::config::{load_agent_config_from_env, ModelConfig, ServerConfig, StoreBackend};
use crate::flows::Flows;
use crate::openai::OpenAI;
use crate::routes::build_router;
use crate::state::{spawn_idle_sweeper, AppState};
use crate::store::{FileStore, KvStore, MemoryStore};

#[instrument(level = "info", skip_all)]
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
  telemetry::init_tracing();

  let server = ServerConfig::from_env();
  let model = ModelConfig::from_env().map_err(|e| {
    error!(target: "codegym_backend", error = %e, "Cannot start without model credentials");
    e
  })?;
  let client = OpenAI::new(&model)?;
  info!(target: "codegym_backend", ?model, "Model client ready");

  let agent = load_agent_config_from_env().unwrap_or_default();
  let store: Arc<dyn KvStore> = match server.store_backend {
    StoreBackend::File => {
      let store = FileStore::new(&server.data_dir)?;
      info!(target: "codegym_backend", root = %store.root().display(), "Using file store");
      Arc::new(store)
    }
    StoreBackend::Memory => {
      info!(target: "codegym_backend", "Using in-memory store; nothing survives a restart");
      Arc::new(MemoryStore::new())
    }
  };

  let state = Arc::new(AppState::new(Flows::new(client, agent.prompts), store, Catalog::new(agent.paths)));
  let sweep_every = (server.session_idle / 4).max(std::time::Duration::from_secs(1));
  spawn_idle_sweeper(state.clone(), server.session_idle, sweep_every);
  let app = build_router(state, &server.static_dir);

  let addr = SocketAddr::from(([0, 0, 0, 0], server.port));
  let listener = TcpListener::bind(addr).await?;
  info!(target: "codegym_backend", %addr, "HTTP server listening");
  axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;
  info!(target: "codegym_backend", "Server stopped");
  Ok(())
}

async fn shutdown_signal() {
  if let Err(e) = tokio::signal::ctrl_c().await {
    error!(target: "codegym_backend", error = %e, "Failed to listen for shutdown signal");
    std::future::pending::<()>().await;
  }
  info!(target: "codegym_backend", "Shutdown requested");
}
