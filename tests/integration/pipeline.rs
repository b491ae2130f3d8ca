//! End-to-end flows through `logic` with scripted collaborators.

use std::sync::Arc;
use std::time::{Duration, Instant};

use athar_backend::logic;
use athar_backend::progress::{LearnerPhase, LevelStatus};
use athar_backend::sandbox::{ErrorKind, RuntimeStatus};
use athar_backend::store::{JsonFileStore, MemoryStore};
use athar_backend::verdict::VerdictSource;

use crate::{app, app_with, MockEndpoint, ScriptLoader, TEST_OUTPUT_LIMIT};

#[tokio::test]
async fn first_runs_share_one_interpreter_load() {
    let loader = ScriptLoader::new(Duration::from_millis(100));
    let state = app_with(loader.clone(), None, Arc::new(MemoryStore::new()));
    assert_eq!(logic::health(&state).runtime, RuntimeStatus::Cold);

    let runs = (0..8).map(|i| {
        let state = state.clone();
        tokio::spawn(async move {
            logic::run_code(&state, "ada", None, &format!("print({i})"), None, None).await
        })
    });
    for handle in futures_util::future::join_all(runs).await {
        let outcome = handle.unwrap().unwrap();
        assert!(outcome.success, "{outcome:?}");
    }

    assert_eq!(loader.loads(), 1);
    assert_eq!(logic::health(&state).runtime, RuntimeStatus::Ready);
}

#[tokio::test]
async fn runaway_code_is_cut_off_and_the_next_run_gets_a_fresh_interpreter() {
    let loader = ScriptLoader::new(Duration::from_millis(1));
    let state = app_with(loader.clone(), None, Arc::new(MemoryStore::new()));

    let start = Instant::now();
    let out = logic::run_code(&state, "ada", None, "spin", None, Some(200)).await.unwrap();
    assert!(start.elapsed() < Duration::from_millis(500), "took {:?}", start.elapsed());
    assert_eq!(out.error_kind, ErrorKind::Timeout);
    assert!(!out.success);
    assert!(out.output.starts_with('.'), "partial output kept: {:?}", out.output);

    let next = logic::run_code(&state, "ada", None, "print(1)", None, None).await.unwrap();
    assert!(next.success);
    assert_eq!(loader.loads(), 2);
}

#[tokio::test]
async fn endless_output_is_capped_and_the_interpreter_replaced() {
    let loader = ScriptLoader::new(Duration::from_millis(1));
    let state = app_with(loader.clone(), None, Arc::new(MemoryStore::new()));

    let out = logic::run_code(&state, "ada", None, "shout", None, None).await.unwrap();
    assert!(!out.success);
    assert_eq!(out.error_kind, ErrorKind::OutputLimit);
    assert!(out.truncated);
    assert_eq!(out.output.len(), TEST_OUTPUT_LIMIT);
    assert!(out.error.unwrap().contains(&TEST_OUTPUT_LIMIT.to_string()));

    let next = logic::run_code(&state, "ada", None, "print(1)", None, None).await.unwrap();
    assert!(next.success);
    assert!(!next.truncated);
    assert_eq!(loader.loads(), 2);
}

#[tokio::test]
async fn runtime_error_keeps_output_printed_before_it() {
    let state = app(None);
    let out = logic::run_code(&state, "ada", None, "fail", None, None).await.unwrap();
    assert_eq!(out.error_kind, ErrorKind::RuntimeError);
    assert_eq!(out.output, "partial\n");
    assert!(out.error.unwrap().contains("NameError"));
}

#[tokio::test]
async fn solving_the_only_task_of_a_level_moves_the_learner_on() {
    let endpoint = MockEndpoint::answering(true, 0.95);
    let state = app(Some(endpoint.clone()));

    let before = logic::get_progress(&state, "ada").await.unwrap();
    assert_eq!(before.phase, LearnerPhase::Onboarding);
    assert_eq!(before.state.current_level_id, "level-1");

    let out = logic::submit_solution(&state, "ada", "hello", "print('Hello')").await.unwrap();
    assert!(out.verdict.is_correct);
    assert_eq!(out.verdict.source, VerdictSource::Endpoint);
    assert!(out.displayed);
    assert!(out.newly_completed);
    assert_eq!(out.xp_awarded, 10);
    assert_eq!(out.levels_completed, vec!["level-1".to_string()]);

    let progress = &out.progress;
    assert_eq!(progress.phase, LearnerPhase::Progressing);
    assert_eq!(progress.state.total_xp, 10);
    assert_eq!(progress.state.streak, 1);
    assert_eq!(progress.state.current_level_id, "level-2");
    assert_eq!(progress.state.current_task_id, "loops");
    assert_eq!(progress.levels[0].status, LevelStatus::Completed);
    assert_eq!(progress.levels[1].status, LevelStatus::Available);
    assert_eq!(endpoint.calls(), 1);
}

#[tokio::test]
async fn double_submit_credits_once() {
    let state = app(Some(MockEndpoint::answering(true, 0.9)));

    let (a, b) = tokio::join!(
        logic::submit_solution(&state, "ada", "loops", "for i in range(3): print(i)"),
        logic::submit_solution(&state, "ada", "loops", "for i in range(3): print(i)"),
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    assert!(a.newly_completed ^ b.newly_completed);
    let progress = logic::get_progress(&state, "ada").await.unwrap();
    assert_eq!(progress.state.total_xp, 20);
    assert_eq!(progress.state.streak, 1);
}

#[tokio::test]
async fn low_confidence_approval_is_not_credited() {
    let state = app(Some(MockEndpoint::answering(true, 0.4)));

    let out = logic::submit_solution(&state, "ada", "hello", "print('hi')").await.unwrap();
    assert!(!out.verdict.is_correct);
    assert!(!out.newly_completed);
    assert_eq!(out.progress.state.total_xp, 0);
    assert!(out.progress.state.completed_task_ids.is_empty());
}

#[tokio::test]
async fn unreachable_endpoint_falls_back_and_still_flags_syntax() {
    let state = app(Some(MockEndpoint::unreachable()));

    let out = logic::submit_solution(&state, "ada", "hello", "print 'hi'").await.unwrap();
    assert_eq!(out.verdict.source, VerdictSource::Fallback);
    assert!(!out.verdict.is_correct);
    assert!(out.verdict.feedback.starts_with("Syntax issue"), "{}", out.verdict.feedback);
    assert_eq!(out.progress.state.total_xp, 0);
}

#[tokio::test]
async fn verdict_for_edited_code_is_not_displayed_but_still_credits() {
    let state = app(Some(MockEndpoint::slow(true, 0.9, Duration::from_millis(150))));

    let submit = logic::submit_solution(&state, "ada", "hello", "print('Hello')");
    let edit = async {
        tokio::time::sleep(Duration::from_millis(30)).await;
        logic::update_draft(&state, "ada", "hello", "print('Hello!')").unwrap()
    };
    let (out, draft) = tokio::join!(submit, edit);
    let out = out.unwrap();

    assert!(!out.displayed);
    assert!(out.newly_completed);
    assert_eq!(draft.revision, 2);

    let current = logic::current_verdict(&state, "ada", "hello").unwrap();
    assert_eq!(current.revision, 2);
    assert!(current.verdict.is_none());
}

#[tokio::test]
async fn running_a_task_clears_its_shown_verdict() {
    let state = app(Some(MockEndpoint::answering(false, 0.8)));

    logic::submit_solution(&state, "ada", "hello", "print('x')").await.unwrap();
    assert!(logic::current_verdict(&state, "ada", "hello").unwrap().verdict.is_some());

    logic::run_code(&state, "ada", Some("hello"), "print('x')", None, None).await.unwrap();
    assert!(logic::current_verdict(&state, "ada", "hello").unwrap().verdict.is_none());
}

#[tokio::test]
async fn progress_survives_a_restart_with_the_file_store() {
    let dir = tempfile::tempdir().unwrap();

    let first = app_with(
        ScriptLoader::new(Duration::ZERO),
        Some(MockEndpoint::answering(true, 0.9)),
        Arc::new(JsonFileStore::new(dir.path())),
    );
    logic::submit_solution(&first, "ada", "hello", "print('Hello')").await.unwrap();
    drop(first);

    let second = app_with(ScriptLoader::new(Duration::ZERO), None, Arc::new(JsonFileStore::new(dir.path())));
    let progress = logic::get_progress(&second, "ada").await.unwrap();
    assert_eq!(progress.state.total_xp, 10);
    assert!(progress.state.completed_task_ids.contains("hello"));
    assert_eq!(progress.state.current_level_id, "level-2");
}

#[tokio::test]
async fn level_completion_without_a_successor_stays_put() {
    let state = app(None);

    let out = logic::complete_level(&state, "ada", "level-2").await.unwrap();
    assert!(out.applied);
    assert_eq!(out.progress.state.current_level_id, "level-1");

    let again = logic::complete_level(&state, "ada", "level-2").await.unwrap();
    assert!(!again.applied);
}

#[tokio::test]
async fn hints_come_from_the_endpoint_or_fall_back() {
    let with_endpoint = app(Some(MockEndpoint::answering(true, 0.9)));
    let hint = logic::request_hint(&with_endpoint, "hello", Some("print(".into())).await.unwrap();
    assert_eq!(hint.source, VerdictSource::Endpoint);
    assert_eq!(hint.hint, "Start with print()");

    let without = app(None);
    let hint = logic::request_hint(&without, "hello", None).await.unwrap();
    assert_eq!(hint.source, VerdictSource::Fallback);
    assert!(!hint.hint_ar.is_empty());
}
