//! Public protocol structs for WebSocket and HTTP endpoints (serde ready).
//! Keep this small and stable to evolve backend and frontend independently.

use serde::{Deserialize, Serialize};

use crate::domain::Level;
use crate::drafts::Draft;
use crate::progress::{LearnerPhase, LevelStatus, ProgressState, TaskStatus};
use crate::sandbox::{ExecutionOutcome, RuntimeStatus};
use crate::verdict::{Hint, Verdict};

/// Messages the client can send over WebSocket.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientWsMessage {
    Ping,
    Catalog,
    Progress(ProgressQuery),
    Run(RunIn),
    Submit(SubmitIn),
    Hint(HintIn),
    Draft(DraftIn),
    Verdict(VerdictQuery),
    CompleteLevel(LevelCompleteIn),
}

/// Messages the server sends back over WebSocket.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerWsMessage {
    Pong,
    Catalog(CatalogOut),
    Progress(ProgressView),
    RunResult(ExecutionOutcome),
    SubmitResult(SubmitOut),
    Hint(Hint),
    Draft(Draft),
    Verdict(VerdictOut),
    LevelResult(LevelCompleteOut),
    Error { message: String },
}

// ---------- HTTP DTOs ----------

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthOut {
    pub ok: bool,
    pub runtime: RuntimeStatus,
    pub runtime_attempts: u64,
    pub verdict_endpoint: bool,
    pub uptime_secs: u64,
}

#[derive(Debug, Serialize)]
pub struct CatalogOut {
    pub levels: Vec<Level>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressQuery {
    pub learner_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunIn {
    pub learner_id: String,
    /// When set, the run is tied to this task's draft and clears its verdict.
    #[serde(default)]
    pub task_id: Option<String>,
    pub code: String,
    #[serde(default)]
    pub stdin: Option<String>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitIn {
    pub learner_id: String,
    pub task_id: String,
    pub code: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitOut {
    pub verdict: Verdict,
    /// False when the code was edited while the verdict was being produced.
    pub displayed: bool,
    /// True only for the submission that first completed the task.
    pub newly_completed: bool,
    pub xp_awarded: u32,
    pub levels_completed: Vec<String>,
    pub progress: ProgressView,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HintIn {
    pub task_id: String,
    #[serde(default)]
    pub current_code: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DraftIn {
    pub learner_id: String,
    pub task_id: String,
    pub code: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerdictQuery {
    pub learner_id: String,
    pub task_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerdictOut {
    pub task_id: String,
    pub revision: u64,
    pub verdict: Option<Verdict>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LevelCompleteIn {
    pub learner_id: String,
    pub level_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LevelCompleteOut {
    pub applied: bool,
    pub progress: ProgressView,
}

/// Progress snapshot plus the views derived from it.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressView {
    #[serde(flatten)]
    pub state: ProgressState,
    pub phase: LearnerPhase,
    pub levels: Vec<LevelProgress>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LevelProgress {
    pub level_id: String,
    pub status: LevelStatus,
    pub completed_tasks: usize,
    pub total_tasks: usize,
    pub tasks: Vec<TaskProgress>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskProgress {
    pub task_id: String,
    pub status: TaskStatus,
}

#[derive(Debug, Serialize)]
pub struct ErrorOut {
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_messages_are_tagged_by_type() {
        let m: ClientWsMessage = serde_json::from_str(
            r#"{"type":"run","learnerId":"amal","code":"print(1)","timeoutMs":500}"#,
        )
        .unwrap();
        match m {
            ClientWsMessage::Run(r) => {
                assert_eq!(r.learner_id, "amal");
                assert_eq!(r.timeout_ms, Some(500));
                assert!(r.task_id.is_none());
            }
            other => panic!("unexpected {other:?}"),
        }
        let m: ClientWsMessage =
            serde_json::from_str(r#"{"type":"complete_level","learnerId":"a","levelId":"level-1"}"#).unwrap();
        assert!(matches!(m, ClientWsMessage::CompleteLevel(_)));
        assert!(serde_json::from_str::<ClientWsMessage>(r#"{"type":"teleport"}"#).is_err());
    }

    #[test]
    fn server_error_shape() {
        let out = serde_json::to_value(ServerWsMessage::Error { message: "nope".into() }).unwrap();
        assert_eq!(out, serde_json::json!({ "type": "error", "message": "nope" }));
    }
}
