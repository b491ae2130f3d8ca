//! The HTTP router and WebSocket dispatch, exercised in-process.

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use athar_backend::protocol::{ClientWsMessage, ServerWsMessage};
use athar_backend::routes::{build_router, ws::handle_client_ws};
use athar_backend::state::AppState;

use crate::{app, MockEndpoint};

async fn call(router: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut request = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(v) => {
            request = request.header("content-type", "application/json");
            Body::from(v.to_string())
        }
        None => Body::empty(),
    };
    let response = router.clone().oneshot(request.body(body).unwrap()).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).unwrap_or(Value::Null) };
    (status, value)
}

fn router(state: &Arc<AppState>) -> Router {
    build_router(state.clone())
}

#[tokio::test]
async fn health_reports_a_cold_runtime_before_the_first_run() {
    let r = router(&app(None));
    let (status, body) = call(&r, Method::GET, "/api/v1/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], true);
    assert_eq!(body["runtime"], "cold");
    assert_eq!(body["verdictEndpoint"], false);
}

#[tokio::test]
async fn catalog_lists_levels_in_order() {
    let r = router(&app(None));
    let (status, body) = call(&r, Method::GET, "/api/v1/catalog", None).await;
    assert_eq!(status, StatusCode::OK);
    let levels = body["levels"].as_array().unwrap();
    assert_eq!(levels.len(), 2);
    assert_eq!(levels[0]["id"], "level-1");
    assert_eq!(levels[1]["tasks"][1]["id"], "sum");
}

#[tokio::test]
async fn fresh_learner_progress_is_onboarding_at_the_first_task() {
    let r = router(&app(None));
    let (status, body) = call(&r, Method::GET, "/api/v1/progress?learnerId=ada", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["phase"], "onboarding");
    assert_eq!(body["currentLevelId"], "level-1");
    assert_eq!(body["currentTaskId"], "hello");
    assert_eq!(body["totalXp"], 0);
    assert_eq!(body["levels"][0]["tasks"][0]["status"], "available");
    assert_eq!(body["levels"][1]["tasks"][1]["status"], "locked");
}

#[tokio::test]
async fn blank_learner_id_is_a_bad_request() {
    let r = router(&app(None));
    let (status, body) = call(&r, Method::GET, "/api/v1/progress?learnerId=%20%20", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("learnerId"));
}

#[tokio::test]
async fn run_returns_the_outcome() {
    let r = router(&app(None));
    let (status, body) = call(
        &r,
        Method::POST,
        "/api/v1/run",
        Some(json!({ "learnerId": "ada", "code": "print(1)" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["errorKind"], "none");
    assert_eq!(body["output"], "print(1)\n");
    assert_eq!(body["truncated"], false);
}

#[tokio::test]
async fn flooding_run_reports_the_output_limit() {
    let r = router(&app(None));
    let (status, body) = call(
        &r,
        Method::POST,
        "/api/v1/run",
        Some(json!({ "learnerId": "ada", "code": "shout" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], false);
    assert_eq!(body["truncated"], true);
    assert_eq!(body["errorKind"], "output_limit");
}

#[tokio::test]
async fn oversized_code_is_a_bad_request() {
    let r = router(&app(None));
    let code = "#".repeat(64 * 1024 + 1);
    let (status, body) = call(
        &r,
        Method::POST,
        "/api/v1/run",
        Some(json!({ "learnerId": "ada", "code": code })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("bytes"));
}

#[tokio::test]
async fn submit_then_read_back_the_verdict() {
    let r = router(&app(Some(MockEndpoint::answering(true, 0.9))));
    let (status, body) = call(
        &r,
        Method::POST,
        "/api/v1/submit",
        Some(json!({ "learnerId": "ada", "taskId": "hello", "code": "print('Hello')" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["verdict"]["isCorrect"], true);
    assert_eq!(body["newlyCompleted"], true);
    assert_eq!(body["xpAwarded"], 10);
    assert_eq!(body["progress"]["currentLevelId"], "level-2");

    let (status, body) = call(&r, Method::GET, "/api/v1/verdict?learnerId=ada&taskId=hello", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["revision"], 1);
    assert_eq!(body["verdict"]["source"], "endpoint");

    let (_, body) = call(
        &r,
        Method::PUT,
        "/api/v1/draft",
        Some(json!({ "learnerId": "ada", "taskId": "hello", "code": "print('Hello!')" })),
    )
    .await;
    assert_eq!(body["revision"], 2);
    assert_eq!(body["verdict"], Value::Null);
}

#[tokio::test]
async fn unknown_ids_are_not_found() {
    let r = router(&app(None));
    let (status, body) = call(
        &r,
        Method::POST,
        "/api/v1/submit",
        Some(json!({ "learnerId": "ada", "taskId": "nope", "code": "x" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "unknown task 'nope'");

    let (status, _) = call(
        &r,
        Method::POST,
        "/api/v1/level/complete",
        Some(json!({ "learnerId": "ada", "levelId": "level-9" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn level_complete_advances_the_current_level() {
    let r = router(&app(None));
    let (status, body) = call(
        &r,
        Method::POST,
        "/api/v1/level/complete",
        Some(json!({ "learnerId": "ada", "levelId": "level-1" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["applied"], true);
    assert_eq!(body["progress"]["currentLevelId"], "level-2");
    assert_eq!(body["progress"]["phase"], "progressing");
}

#[tokio::test]
async fn hint_without_endpoint_uses_the_generic_one() {
    let r = router(&app(None));
    let (status, body) = call(&r, Method::POST, "/api/v1/hint", Some(json!({ "taskId": "hello" }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["source"], "fallback");
    assert!(!body["hint"].as_str().unwrap().is_empty());
}

#[tokio::test]
async fn ws_messages_dispatch_to_the_same_logic() {
    let state = app(Some(MockEndpoint::answering(true, 0.9)));

    let ping: ClientWsMessage = serde_json::from_value(json!({ "type": "ping" })).unwrap();
    assert!(matches!(handle_client_ws(ping, &state).await, ServerWsMessage::Pong));

    let submit: ClientWsMessage = serde_json::from_value(json!({
        "type": "submit", "learnerId": "ada", "taskId": "hello", "code": "print('Hello')"
    }))
    .unwrap();
    let reply = serde_json::to_value(handle_client_ws(submit, &state).await).unwrap();
    assert_eq!(reply["type"], "submit_result");
    assert_eq!(reply["newlyCompleted"], true);

    let bad: ClientWsMessage = serde_json::from_value(json!({
        "type": "complete_level", "learnerId": "ada", "levelId": "missing"
    }))
    .unwrap();
    match handle_client_ws(bad, &state).await {
        ServerWsMessage::Error { message } => assert!(message.contains("missing")),
        other => panic!("expected an error, got {other:?}"),
    }
}
