//! Router assembly: HTTP endpoints, WebSocket upgrade, static files, CORS, and HTTP tracing.

use std::{path::Path, sync::Arc};

use axum::{
    routing::{get, post, put},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    services::{ServeDir, ServeFile},
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::Level;

use crate::state::AppState;

pub mod http;
pub mod ws;

/// Build the application router with:
/// - WebSocket at `/ws` (optionally `?session=<id>` to resume)
/// - one POST endpoint per AI flow under `/api/v1/flows/...`
/// - session orchestration under `/api/v1/sessions/...`
/// - static SPA from `static_dir` with index fallback
/// - CORS (allow any origin/method/headers) and per-request trace spans
pub fn build_router(state: Arc<AppState>, static_dir: &Path) -> Router {
    // Static files with SPA fallback
    let static_service = ServeDir::new(static_dir)
        .append_index_html_on_directories(true)
        .not_found_service(ServeFile::new(static_dir.join("index.html")));

    Router::new()
        // WebSocket
        .route("/ws", get(ws::ws_upgrade))
        // Supporting endpoints
        .route("/api/v1/health", get(http::http_health))
        .route("/api/v1/catalog", get(http::http_catalog))
        // AI flows
        .route("/api/v1/flows/generate-problem", post(http::http_generate_problem))
        .route("/api/v1/flows/check-code", post(http::http_check_code))
        .route("/api/v1/flows/run-code", post(http::http_run_code))
        .route("/api/v1/flows/chatbot", post(http::http_chatbot))
        .route("/api/v1/flows/enhance-problem", post(http::http_enhance_problem))
        // Sessions
        .route("/api/v1/sessions", post(http::http_open_session))
        .route("/api/v1/sessions/:id", get(http::http_get_session))
        .route("/api/v1/sessions/:id/code", put(http::http_update_code))
        .route("/api/v1/sessions/:id/generate", post(http::http_session_generate))
        .route("/api/v1/sessions/:id/check", post(http::http_session_check))
        .route("/api/v1/sessions/:id/run", post(http::http_session_run))
        .route("/api/v1/sessions/:id/chat", post(http::http_session_chat))
        .route("/api/v1/sessions/:id/import", post(http::http_session_import))
        .route("/api/v1/sessions/:id/new-chat", post(http::http_session_new_chat))
        .route("/api/v1/sessions/:id/progress", get(http::http_session_progress))
        // State + CORS + HTTP tracing
        .with_state(state)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_request(DefaultOnRequest::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        // Frontend fallback
        .fallback_service(static_service)
}
