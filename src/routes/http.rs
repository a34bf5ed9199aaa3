//! HTTP endpoint handlers. These are thin wrappers that forward to the flows
//! and to session orchestration. Each handler is instrumented; logs carry ids
//! and lengths, never learner code or chat text.

use std::sync::Arc;
use axum::{
  extract::{rejection::JsonRejection, Path, State},
  http::StatusCode,
  response::{IntoResponse, Response},
  Json,
};
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::domain::ResponseLength;
use crate::flows::FlowError;
use crate::protocol::*;
use crate::session::{InvalidSessionId, Outcome, Session};
use crate::state::AppState;
use crate::validate::{
  ChatbotRequest, CheckCodeRequest, EnhanceProblemRequest, GenerateProblemRequest, RunCodeRequest,
};

/// Error body `{error}` with the matching status.
#[derive(Debug)]
pub enum ApiError {
  BadRequest(String),
  NotFound(String),
  Upstream(String),
}

impl ApiError {
  /// Invalid input stays a 400; anything upstream becomes a 502 with `failure`.
  fn from_flow(e: FlowError, failure: &str) -> Self {
    match e {
      FlowError::Invalid(v) => ApiError::BadRequest(v.to_string()),
      other => {
        warn!(target: "flow", error = %other, "Flow failed upstream");
        ApiError::Upstream(failure.to_string())
      }
    }
  }
}

impl From<InvalidSessionId> for ApiError {
  fn from(e: InvalidSessionId) -> Self {
    ApiError::BadRequest(e.to_string())
  }
}

impl From<JsonRejection> for ApiError {
  fn from(rejection: JsonRejection) -> Self {
    ApiError::BadRequest(format!("invalid input: {}", rejection.body_text()))
  }
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    let (status, error) = match self {
      ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, m),
      ApiError::NotFound(m) => (StatusCode::NOT_FOUND, m),
      ApiError::Upstream(m) => (StatusCode::BAD_GATEWAY, m),
    };
    (status, Json(ErrorOut { error })).into_response()
  }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

fn respond<T: Serialize>(result: Result<T, FlowError>, failure: &str) -> ApiResult<FlowOut<T>> {
  result.map(|response| Json(FlowOut { response })).map_err(|e| ApiError::from_flow(e, failure))
}

#[instrument(level = "info")]
pub async fn http_health() -> impl IntoResponse { Json(HealthOut { ok: true }) }

#[instrument(level = "info", skip(state))]
pub async fn http_catalog(State(state): State<Arc<AppState>>) -> impl IntoResponse {
  Json(state.catalog.clone())
}

//
// Flow endpoints
//

#[instrument(level = "info", skip_all)]
pub async fn http_generate_problem(
  State(state): State<Arc<AppState>>,
  body: Result<Json<GenerateProblemRequest>, JsonRejection>,
) -> ApiResult<FlowOut<crate::domain::Problem>> {
  let Json(req) = body?;
  respond(state.flows.generate_problem(req).await, "Failed to generate problem")
}

#[instrument(level = "info", skip_all)]
pub async fn http_check_code(
  State(state): State<Arc<AppState>>,
  body: Result<Json<CheckCodeRequest>, JsonRejection>,
) -> ApiResult<FlowOut<crate::domain::CheckResult>> {
  let Json(req) = body?;
  respond(state.flows.check_code(req).await, "Failed to check code")
}

#[instrument(level = "info", skip_all)]
pub async fn http_run_code(
  State(state): State<Arc<AppState>>,
  body: Result<Json<RunCodeRequest>, JsonRejection>,
) -> ApiResult<FlowOut<crate::domain::RunResult>> {
  let Json(req) = body?;
  respond(state.flows.run_code(req).await, "Failed to run code")
}

#[instrument(level = "info", skip_all)]
pub async fn http_chatbot(
  State(state): State<Arc<AppState>>,
  body: Result<Json<ChatbotRequest>, JsonRejection>,
) -> ApiResult<FlowOut<crate::flows::ChatAnswer>> {
  let Json(req) = body?;
  respond(state.flows.ask_chatbot(req).await, "Failed to get chatbot response")
}

#[instrument(level = "info", skip_all)]
pub async fn http_enhance_problem(
  State(state): State<Arc<AppState>>,
  body: Result<Json<EnhanceProblemRequest>, JsonRejection>,
) -> ApiResult<FlowOut<crate::domain::Problem>> {
  let Json(req) = body?;
  respond(state.flows.enhance_problem(req).await, "Failed to enhance problem")
}

//
// Session endpoints
//

async fn live(state: &AppState, id: &str) -> Result<Arc<Session>, ApiError> {
  state
    .session(id)
    .await
    .ok_or_else(|| ApiError::NotFound(format!("unknown session '{}'", id)))
}

/// Create a session, or resume persisted data for a known id. The body is optional.
#[instrument(level = "info", skip_all)]
pub async fn http_open_session(
  State(state): State<Arc<AppState>>,
  body: Option<Json<OpenSessionIn>>,
) -> ApiResult<Outcome> {
  let id = body.and_then(|Json(b)| b.id);
  let session = state.open_session(id).await?;
  info!(target: "session", id = %session.id(), "HTTP session opened");
  Ok(Json(Outcome { view: session.view().await, notice: None }))
}

#[instrument(level = "info", skip(state))]
pub async fn http_get_session(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult<Outcome> {
  let session = live(&state, &id).await?;
  Ok(Json(Outcome { view: session.view().await, notice: None }))
}

#[instrument(level = "info", skip(state, body))]
pub async fn http_update_code(
  State(state): State<Arc<AppState>>,
  Path(id): Path<String>,
  body: Result<Json<CodeIn>, JsonRejection>,
) -> ApiResult<Outcome> {
  let session = live(&state, &id).await?;
  let Json(CodeIn { code }) = body?;
  Ok(Json(session.update_code(code).await))
}

#[instrument(level = "info", skip(state, body))]
pub async fn http_session_generate(
  State(state): State<Arc<AppState>>,
  Path(id): Path<String>,
  body: Result<Json<GenerateProblemRequest>, JsonRejection>,
) -> ApiResult<Outcome> {
  let session = live(&state, &id).await?;
  let Json(req) = body?;
  Ok(Json(session.generate(req).await))
}

#[instrument(level = "info", skip(state))]
pub async fn http_session_check(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult<Outcome> {
  let session = live(&state, &id).await?;
  Ok(Json(session.check().await))
}

#[instrument(level = "info", skip(state))]
pub async fn http_session_run(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult<Outcome> {
  let session = live(&state, &id).await?;
  Ok(Json(session.run().await))
}

#[instrument(level = "info", skip(state, body))]
pub async fn http_session_chat(
  State(state): State<Arc<AppState>>,
  Path(id): Path<String>,
  body: Result<Json<ChatIn>, JsonRejection>,
) -> ApiResult<Outcome> {
  let session = live(&state, &id).await?;
  let Json(chat) = body?;
  let len: ResponseLength = parse_response_length(chat.response_length.as_deref());
  Ok(Json(session.chat(&chat.message, len).await))
}

#[instrument(level = "info", skip(state, body))]
pub async fn http_session_import(
  State(state): State<Arc<AppState>>,
  Path(id): Path<String>,
  body: Result<Json<EnhanceProblemRequest>, JsonRejection>,
) -> ApiResult<Outcome> {
  let session = live(&state, &id).await?;
  let Json(req) = body?;
  Ok(Json(session.import(req).await))
}

#[instrument(level = "info", skip(state))]
pub async fn http_session_new_chat(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult<Outcome> {
  let session = live(&state, &id).await?;
  Ok(Json(session.new_chat().await))
}

#[instrument(level = "info", skip(state))]
pub async fn http_session_progress(
  State(state): State<Arc<AppState>>,
  Path(id): Path<String>,
) -> ApiResult<ProgressOut> {
  let session = live(&state, &id).await?;
  let progress = session.progress().await;
  Ok(Json(ProgressOut { overall_percent: progress.overall_percent(), progress }))
}
