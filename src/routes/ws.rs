//! WebSocket upgrade + session loop. Each connection holds one session,
//! which other sockets resuming the same id share.
//!
//! Client intents are parsed as JSON and run as independent tasks, so a slow
//! model call never blocks the socket. The session's view is pushed as a
//! `state` message on every change; notices, progress and errors go out as
//! their own messages through a single writer task.

use std::sync::Arc;
use axum::{
  extract::{
    ws::{Message, WebSocket},
    Query, State, WebSocketUpgrade,
  },
  response::{IntoResponse, Response},
};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, error, info, instrument};

use crate::protocol::{parse_response_length, ClientWsMessage, ServerWsMessage, WsParams};
use crate::routes::http::ApiError;
use crate::session::{check_session_id, Session};
use crate::state::AppState;

type Outbox = mpsc::UnboundedSender<ServerWsMessage>;

#[instrument(level = "info", skip(ws, state))]
pub async fn ws_upgrade(
  ws: WebSocketUpgrade,
  State(state): State<Arc<AppState>>,
  Query(params): Query<WsParams>,
) -> Response {
  info!(target: "codegym_backend", "WebSocket upgrade requested");
  let resume = params.session.filter(|s| !s.trim().is_empty());
  if let Some(Err(e)) = resume.as_deref().map(check_session_id) {
    return ApiError::from(e).into_response();
  }
  ws.on_upgrade(move |socket| handle_ws(socket, state, resume))
}

#[instrument(level = "info", skip(socket, state))]
async fn handle_ws(socket: WebSocket, state: Arc<AppState>, resume: Option<String>) {
  let session = match state.attach_session(resume).await {
    Ok(session) => session,
    Err(e) => {
      error!(target: "codegym_backend", error = %e, "WebSocket session refused");
      return;
    }
  };
  info!(target: "codegym_backend", id = %session.id(), "WebSocket connected");

  let (mut sink, mut stream) = socket.split();
  let (tx, mut rx) = mpsc::unbounded_channel::<ServerWsMessage>();

  let writer = tokio::spawn(async move {
    while let Some(msg) = rx.recv().await {
      let out = serde_json::to_string(&msg).unwrap_or_else(|e| {
        serde_json::json!({ "type": "error", "message": format!("Serialization error: {}", e) }).to_string()
      });
      if let Err(e) = sink.send(Message::Text(out)).await {
        error!(target: "codegym_backend", error = %e, "WS send error");
        break;
      }
    }
  });

  // Initial snapshot, then every change.
  let mut views = session.subscribe();
  let _ = tx.send(ServerWsMessage::State { view: views.borrow_and_update().clone() });
  let forwarder = {
    let tx = tx.clone();
    tokio::spawn(async move {
      while views.changed().await.is_ok() {
        let view = views.borrow_and_update().clone();
        if tx.send(ServerWsMessage::State { view }).is_err() {
          break;
        }
      }
    })
  };

  while let Some(Ok(msg)) = stream.next().await {
    match msg {
      Message::Text(txt) => match serde_json::from_str::<ClientWsMessage>(&txt) {
        Ok(incoming) => {
          debug!(target: "codegym_backend", "WS received: {}", kind(&incoming));
          handle_client_ws(incoming, &session, &tx).await;
        }
        Err(e) => {
          let _ = tx.send(ServerWsMessage::Error { message: format!("Invalid JSON: {}", e) });
        }
      },
      Message::Close(_) => break,
      _ => {}
    }
  }

  forwarder.abort();
  drop(tx);
  // In-flight intents still hold the outbox; the writer stops once they finish.
  let _ = writer.await;
  state.detach_session(session.id()).await;
  info!(target: "codegym_backend", id = %session.id(), "WebSocket disconnected");
}

fn kind(msg: &ClientWsMessage) -> &'static str {
  match msg {
    ClientWsMessage::Ping => "ping",
    ClientWsMessage::Generate { .. } => "generate",
    ClientWsMessage::UpdateCode { .. } => "update_code",
    ClientWsMessage::Check => "check",
    ClientWsMessage::Run => "run",
    ClientWsMessage::Chat { .. } => "chat",
    ClientWsMessage::Import { .. } => "import",
    ClientWsMessage::NewChat => "new_chat",
    ClientWsMessage::Progress => "progress",
  }
}

/// Cheap intents are answered in order; model-backed ones are spawned.
async fn handle_client_ws(msg: ClientWsMessage, session: &Arc<Session>, tx: &Outbox) {
  match msg {
    ClientWsMessage::Ping => {
      let _ = tx.send(ServerWsMessage::Pong);
    }
    ClientWsMessage::UpdateCode { code } => {
      session.update_code(code).await;
    }
    ClientWsMessage::NewChat => {
      session.new_chat().await;
    }
    ClientWsMessage::Progress => {
      let _ = tx.send(ServerWsMessage::progress(session.progress().await));
    }
    other => {
      let (session, tx) = (session.clone(), tx.clone());
      tokio::spawn(async move { run_intent(other, &session, &tx).await });
    }
  }
}

#[instrument(level = "info", skip_all, fields(id = %session.id(), intent = kind(&msg)))]
async fn run_intent(msg: ClientWsMessage, session: &Session, tx: &Outbox) {
  let outcome = match msg {
    ClientWsMessage::Generate { selection } => session.generate(selection).await,
    ClientWsMessage::Check => session.check().await,
    ClientWsMessage::Run => session.run().await,
    ClientWsMessage::Chat { message, response_length } => {
      session.chat(&message, parse_response_length(response_length.as_deref())).await
    }
    ClientWsMessage::Import { problem } => session.import(problem).await,
    ClientWsMessage::Ping
    | ClientWsMessage::UpdateCode { .. }
    | ClientWsMessage::NewChat
    | ClientWsMessage::Progress => return,
  };
  if let Some(notice) = outcome.notice {
    let _ = tx.send(ServerWsMessage::Notice { notice });
  }
}
