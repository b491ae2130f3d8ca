//! WebSocket upgrade + message loop. Each client message is parsed as JSON and
//! forwarded to core logic. We reply with a single JSON message per request.

use std::sync::Arc;
use axum::{
  extract::{
    ws::{Message, WebSocket},
    State, WebSocketUpgrade,
  },
  response::IntoResponse,
};
use tracing::{info, error, instrument, debug};

use crate::error::ApiError;
use crate::protocol::{ClientWsMessage, ServerWsMessage};
use crate::logic;
use crate::state::AppState;

#[instrument(level = "info", skip(state, ws))]
pub async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
  info!(target: "athar_backend", "WebSocket upgrade requested");
  ws.on_upgrade(move |socket| handle_ws(socket, state))
}

#[instrument(level = "info", skip(socket, state))]
async fn handle_ws(mut socket: WebSocket, state: Arc<AppState>) {
  info!(target: "athar_backend", "WebSocket connected");
  while let Some(Ok(msg)) = socket.recv().await {
    match msg {
      Message::Text(txt) => {
        // Parse, dispatch, serialize response.
        let reply_msg = match serde_json::from_str::<ClientWsMessage>(&txt) {
          Ok(incoming) => {
            debug!(target: "athar_backend", kind = message_kind(&incoming), "WS received");
            handle_client_ws(incoming, &state).await
          }
          Err(e) => ServerWsMessage::Error { message: format!("Invalid JSON: {}", e) },
        };

        let out = serde_json::to_string(&reply_msg).unwrap_or_else(|e| {
          serde_json::json!({ "type": "error", "message": format!("Serialization error: {}", e) }).to_string()
        });

        if let Err(e) = socket.send(Message::Text(out)).await {
          error!(target: "athar_backend", error = %e, "WS send error");
          break;
        }
      }
      Message::Ping(payload) => { let _ = socket.send(Message::Pong(payload)).await; }
      Message::Close(_) => break,
      _ => {}
    }
  }
  info!(target: "athar_backend", "WebSocket disconnected");
}

/// Message tag for logs; payloads carry learner code and stay out of them.
fn message_kind(msg: &ClientWsMessage) -> &'static str {
  match msg {
    ClientWsMessage::Ping => "ping",
    ClientWsMessage::Catalog => "catalog",
    ClientWsMessage::Progress(_) => "progress",
    ClientWsMessage::Run(_) => "run",
    ClientWsMessage::Submit(_) => "submit",
    ClientWsMessage::Hint(_) => "hint",
    ClientWsMessage::Draft(_) => "draft",
    ClientWsMessage::Verdict(_) => "verdict",
    ClientWsMessage::CompleteLevel(_) => "complete_level",
  }
}

fn reply<T>(result: Result<T, ApiError>, wrap: impl FnOnce(T) -> ServerWsMessage) -> ServerWsMessage {
  match result {
    Ok(v) => wrap(v),
    Err(e) => ServerWsMessage::Error { message: e.to_string() },
  }
}

#[instrument(level = "info", skip(msg, state), fields(kind = message_kind(&msg)))]
pub async fn handle_client_ws(msg: ClientWsMessage, state: &AppState) -> ServerWsMessage {
  match msg {
    ClientWsMessage::Ping => ServerWsMessage::Pong,

    ClientWsMessage::Catalog => ServerWsMessage::Catalog(logic::catalog_overview(state)),

    ClientWsMessage::Progress(q) => reply(logic::get_progress(state, &q.learner_id).await, ServerWsMessage::Progress),

    ClientWsMessage::Run(r) => reply(
      logic::run_code(state, &r.learner_id, r.task_id.as_deref(), &r.code, r.stdin, r.timeout_ms).await,
      ServerWsMessage::RunResult,
    ),

    ClientWsMessage::Submit(s) => {
      let result = logic::submit_solution(state, &s.learner_id, &s.task_id, &s.code).await;
      if let Ok(out) = &result {
        info!(target: "verdict", task_id = %s.task_id, is_correct = out.verdict.is_correct, "WS submit evaluated");
      }
      reply(result, ServerWsMessage::SubmitResult)
    }

    ClientWsMessage::Hint(h) => reply(logic::request_hint(state, &h.task_id, h.current_code).await, ServerWsMessage::Hint),

    ClientWsMessage::Draft(d) => reply(logic::update_draft(state, &d.learner_id, &d.task_id, &d.code), ServerWsMessage::Draft),

    ClientWsMessage::Verdict(q) => reply(logic::current_verdict(state, &q.learner_id, &q.task_id), ServerWsMessage::Verdict),

    ClientWsMessage::CompleteLevel(c) => {
      reply(logic::complete_level(state, &c.learner_id, &c.level_id).await, ServerWsMessage::LevelResult)
    }
  }
}
