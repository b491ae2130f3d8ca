//! HTTP endpoint handlers. These are thin wrappers that forward to core logic.
//! Each handler is instrumented and logs ids and basic result info (never code).

use std::sync::Arc;
use axum::{extract::{State, Query}, Json, response::IntoResponse};
use tracing::{info, instrument};

use crate::error::ApiError;
use crate::protocol::*;
use crate::state::AppState;
use crate::logic;

#[instrument(level = "info", skip(state))]
pub async fn http_health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
  Json(logic::health(&state))
}

#[instrument(level = "info", skip(state))]
pub async fn http_get_catalog(State(state): State<Arc<AppState>>) -> impl IntoResponse {
  Json(logic::catalog_overview(&state))
}

#[instrument(level = "info", skip(state), fields(learner_id = %q.learner_id))]
pub async fn http_get_progress(
  State(state): State<Arc<AppState>>,
  Query(q): Query<ProgressQuery>,
) -> Result<Json<ProgressView>, ApiError> {
  Ok(Json(logic::get_progress(&state, &q.learner_id).await?))
}

#[instrument(level = "info", skip(state, body), fields(learner_id = %body.learner_id, task_id = ?body.task_id, code_len = body.code.len()))]
pub async fn http_post_run(
  State(state): State<Arc<AppState>>,
  Json(body): Json<RunIn>,
) -> Result<impl IntoResponse, ApiError> {
  let outcome = logic::run_code(
    &state,
    &body.learner_id,
    body.task_id.as_deref(),
    &body.code,
    body.stdin,
    body.timeout_ms,
  ).await?;
  info!(target: "sandbox", success = outcome.success, error_kind = ?outcome.error_kind, "HTTP run served");
  Ok(Json(outcome))
}

#[instrument(level = "info", skip(state, body), fields(learner_id = %body.learner_id, task_id = %body.task_id, code_len = body.code.len()))]
pub async fn http_post_submit(
  State(state): State<Arc<AppState>>,
  Json(body): Json<SubmitIn>,
) -> Result<Json<SubmitOut>, ApiError> {
  Ok(Json(logic::submit_solution(&state, &body.learner_id, &body.task_id, &body.code).await?))
}

#[instrument(level = "info", skip(state, body), fields(task_id = %body.task_id))]
pub async fn http_post_hint(
  State(state): State<Arc<AppState>>,
  Json(body): Json<HintIn>,
) -> Result<impl IntoResponse, ApiError> {
  let hint = logic::request_hint(&state, &body.task_id, body.current_code).await?;
  info!(target: "verdict", task_id = %body.task_id, source = ?hint.source, "HTTP hint served");
  Ok(Json(hint))
}

#[instrument(level = "debug", skip(state, body), fields(learner_id = %body.learner_id, task_id = %body.task_id))]
pub async fn http_put_draft(
  State(state): State<Arc<AppState>>,
  Json(body): Json<DraftIn>,
) -> Result<impl IntoResponse, ApiError> {
  Ok(Json(logic::update_draft(&state, &body.learner_id, &body.task_id, &body.code)?))
}

#[instrument(level = "info", skip(state), fields(learner_id = %q.learner_id, task_id = %q.task_id))]
pub async fn http_get_verdict(
  State(state): State<Arc<AppState>>,
  Query(q): Query<VerdictQuery>,
) -> Result<Json<VerdictOut>, ApiError> {
  Ok(Json(logic::current_verdict(&state, &q.learner_id, &q.task_id)?))
}

#[instrument(level = "info", skip(state, body), fields(learner_id = %body.learner_id, level_id = %body.level_id))]
pub async fn http_post_level_complete(
  State(state): State<Arc<AppState>>,
  Json(body): Json<LevelCompleteIn>,
) -> Result<Json<LevelCompleteOut>, ApiError> {
  Ok(Json(logic::complete_level(&state, &body.learner_id, &body.level_id).await?))
}
