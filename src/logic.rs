//! Core behaviors shared by both HTTP and WebSocket handlers.
//!
//! Each learner action is sequenced here: drafts -> runner (run) or verdict
//! service (submit) -> progress book (accepted submit). Nothing in this module
//! holds a lock across the sandbox or the verdict call.

use std::time::Duration;

use chrono::Utc;
use tracing::{info, instrument};

use crate::domain::Task;
use crate::drafts::Draft;
use crate::error::{ApiError, ProgressError};
use crate::progress::{ProgressState, Transition};
use crate::protocol::{
    CatalogOut, HealthOut, LevelCompleteOut, LevelProgress, ProgressView, SubmitOut, TaskProgress, VerdictOut,
};
use crate::sandbox::{ExecutionOutcome, ExecutionRequest};
use crate::state::AppState;
use crate::verdict::{Hint, HintRequest, VerdictRequest};

/// Bounds for a client-supplied run timeout.
const MIN_RUN_TIMEOUT: Duration = Duration::from_millis(50);
const MAX_RUN_TIMEOUT: Duration = Duration::from_secs(30);

fn learner(id: &str) -> Result<&str, ApiError> {
    let id = id.trim();
    if id.is_empty() || id.len() > 128 {
        return Err(ApiError::BadRequest("learnerId must be 1..=128 characters".into()));
    }
    Ok(id)
}

fn code_size(state: &AppState, code: &str) -> Result<(), ApiError> {
    if code.len() > state.max_code_bytes {
        return Err(ApiError::BadRequest(format!("code must be at most {} bytes", state.max_code_bytes)));
    }
    Ok(())
}

fn task<'a>(state: &'a AppState, task_id: &str) -> Result<&'a Task, ApiError> {
    state
        .catalog
        .task(task_id)
        .ok_or_else(|| ProgressError::UnknownTask(task_id.to_string()).into())
}

pub fn health(state: &AppState) -> HealthOut {
    let runtime = state.runtime();
    HealthOut {
        ok: true,
        runtime: runtime.status(),
        runtime_attempts: runtime.attempts(),
        verdict_endpoint: state.verdicts.is_enabled(),
        uptime_secs: state.started_at.elapsed().as_secs(),
    }
}

pub fn catalog_overview(state: &AppState) -> CatalogOut {
    CatalogOut { levels: state.catalog.levels().to_vec() }
}

/// Attach the derived views (phase, per-level and per-task status) to a snapshot.
pub fn progress_view(state: &AppState, progress: ProgressState) -> ProgressView {
    let catalog = &state.catalog;
    let levels = catalog
        .levels()
        .iter()
        .filter_map(|level| {
            let status = progress.level_status(catalog, &level.id)?;
            let (completed_tasks, total_tasks) = progress.level_counts(catalog, &level.id)?;
            let tasks = level
                .tasks
                .iter()
                .filter_map(|t| {
                    Some(TaskProgress {
                        task_id: t.id.clone(),
                        status: progress.task_status(catalog, &t.id)?,
                    })
                })
                .collect();
            Some(LevelProgress {
                level_id: level.id.clone(),
                status,
                completed_tasks,
                total_tasks,
                tasks,
            })
        })
        .collect();
    ProgressView {
        phase: progress.phase(),
        state: progress,
        levels,
    }
}

#[instrument(level = "info", skip(state))]
pub async fn get_progress(state: &AppState, learner_id: &str) -> Result<ProgressView, ApiError> {
    let learner_id = learner(learner_id)?;
    let progress = state.progress.get(learner_id, Utc::now()).await?;
    Ok(progress_view(state, progress))
}

/// Execute code in the sandbox. Failures of the code come back inside the outcome.
#[instrument(level = "info", skip(state, code, stdin), fields(code_len = code.len()))]
pub async fn run_code(
    state: &AppState,
    learner_id: &str,
    task_id: Option<&str>,
    code: &str,
    stdin: Option<String>,
    timeout_ms: Option<u64>,
) -> Result<ExecutionOutcome, ApiError> {
    let learner_id = learner(learner_id)?;
    code_size(state, code)?;
    if let Some(task_id) = task_id {
        task(state, task_id)?;
        state.drafts.update(learner_id, task_id, code);
        state.drafts.clear_verdict(learner_id, task_id);
    }

    let request = ExecutionRequest {
        code: code.to_string(),
        stdin,
        timeout: timeout_ms.map(|ms| Duration::from_millis(ms).clamp(MIN_RUN_TIMEOUT, MAX_RUN_TIMEOUT)),
    };
    Ok(state.runner.execute(request).await)
}

/// Judge a submission and credit the task when the verdict is positive.
#[instrument(level = "info", skip(state, code), fields(code_len = code.len()))]
pub async fn submit_solution(
    state: &AppState,
    learner_id: &str,
    task_id: &str,
    code: &str,
) -> Result<SubmitOut, ApiError> {
    let learner_id = learner(learner_id)?;
    code_size(state, code)?;
    let task = task(state, task_id)?;
    let revision = state.drafts.update(learner_id, task_id, code);

    let verdict = state.verdicts.judge(&VerdictRequest::for_task(task, code)).await;

    // Credit follows the code that was judged, even if the editor moved on.
    let (progress, transition) = if verdict.is_correct {
        state.progress.complete_task(learner_id, task_id, Utc::now()).await?
    } else {
        (state.progress.get(learner_id, Utc::now()).await?, Transition::Duplicate)
    };

    let displayed = state.drafts.record_verdict(learner_id, task_id, revision, verdict.clone());
    let (newly_completed, xp_awarded, levels_completed) = match transition {
        Transition::Applied { xp_awarded, levels_completed } => (true, xp_awarded, levels_completed),
        Transition::Duplicate => (false, 0, vec![]),
    };
    info!(
        target: "verdict",
        %learner_id,
        %task_id,
        is_correct = verdict.is_correct,
        source = ?verdict.source,
        newly_completed,
        displayed,
        "Submission evaluated"
    );

    Ok(SubmitOut {
        verdict,
        displayed,
        newly_completed,
        xp_awarded,
        levels_completed,
        progress: progress_view(state, progress),
    })
}

#[instrument(level = "info", skip(state, current_code))]
pub async fn request_hint(state: &AppState, task_id: &str, current_code: Option<String>) -> Result<Hint, ApiError> {
    if let Some(code) = &current_code {
        code_size(state, code)?;
    }
    let task = task(state, task_id)?;
    Ok(state.verdicts.hint(&HintRequest::for_task(task, current_code)).await)
}

#[instrument(level = "debug", skip(state, code), fields(code_len = code.len()))]
pub fn update_draft(state: &AppState, learner_id: &str, task_id: &str, code: &str) -> Result<Draft, ApiError> {
    let learner_id = learner(learner_id)?;
    code_size(state, code)?;
    task(state, task_id)?;
    state.drafts.update(learner_id, task_id, code);
    Ok(state.drafts.get(learner_id, task_id).unwrap_or_default())
}

/// The verdict currently shown for a task, if it still matches the draft.
pub fn current_verdict(state: &AppState, learner_id: &str, task_id: &str) -> Result<VerdictOut, ApiError> {
    let learner_id = learner(learner_id)?;
    task(state, task_id)?;
    let draft = state.drafts.get(learner_id, task_id).unwrap_or_default();
    Ok(VerdictOut {
        task_id: task_id.to_string(),
        revision: draft.revision,
        verdict: draft.verdict,
    })
}

#[instrument(level = "info", skip(state))]
pub async fn complete_level(state: &AppState, learner_id: &str, level_id: &str) -> Result<LevelCompleteOut, ApiError> {
    let learner_id = learner(learner_id)?;
    let (progress, transition) = state.progress.complete_level(learner_id, level_id, Utc::now()).await?;
    Ok(LevelCompleteOut {
        applied: transition.is_applied(),
        progress: progress_view(state, progress),
    })
}
