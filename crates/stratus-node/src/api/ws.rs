//! Progress channel.
//!
//! One WebSocket per client, multiplexing any number of sessions. Inbound
//! frames start or cancel sessions; outbound frames carry the events of every
//! session started on this connection.

use std::collections::HashMap;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use stratus_core::{ClientMessage, ControlFrame, ServerMessage};
use stratus_session::{Outbound, SessionManager};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::state::AppState;

/// Progress channel upgrade.
pub async fn progress_channel(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_progress_channel(socket, state))
}

async fn handle_progress_channel(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();
    debug!("progress channel opened");

    let writer = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let json = match serde_json::to_string(&message) {
                Ok(json) => json,
                Err(e) => {
                    warn!("Dropping unserializable message: {}", e);
                    continue;
                }
            };
            if sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    // Sessions started here, by id, with the run that owns the id.
    let mut owned: HashMap<String, Uuid> = HashMap::new();

    while let Some(frame) = receiver.next().await {
        match frame {
            Ok(Message::Text(text)) => dispatch(&state, &text, &tx, &mut owned).await,
            Ok(Message::Close(_)) | Err(_) => break,
            _ => {}
        }
    }

    for (id, run_id) in owned {
        if state.sessions.cancel_run(&id, run_id).await.is_some() {
            info!("🔌 Client disconnected, cancelled session {}", id);
        }
    }

    drop(tx);
    writer.abort();
    debug!("progress channel closed");
}

async fn dispatch(
    state: &AppState,
    text: &str,
    tx: &Outbound,
    owned: &mut HashMap<String, Uuid>,
) {
    let message = match ClientMessage::from_json(text) {
        Ok(message) => message,
        Err(e) => {
            let _ = tx.send(ServerMessage::error(None, format!("Malformed message: {}", e)));
            return;
        }
    };

    match message {
        ClientMessage::Ping => {
            let _ = tx.send(ServerMessage::Control(ControlFrame::Pong));
        }
        ClientMessage::Cancel { session_id } => {
            if let Err(e) = state.sessions.cancel(&session_id).await {
                let _ = tx.send(ServerMessage::error(Some(session_id), e.to_string()));
            } else {
                owned.remove(&session_id);
            }
        }
        start => {
            let Some(request) = start.into_request() else {
                return;
            };
            let session_id = request.session_id.clone();
            prune_finished(&state.sessions, owned).await;
            match state.start_session(request, tx.clone()).await {
                Ok(session) => {
                    owned.insert(session.id, session.run_id);
                }
                Err(e) => {
                    debug!(%session_id, error = %e, "session rejected");
                    let _ = tx.send(ServerMessage::error(Some(session_id), e.to_string()));
                }
            }
        }
    }
}

/// Forget owned sessions whose run is no longer live.
async fn prune_finished(sessions: &SessionManager, owned: &mut HashMap<String, Uuid>) {
    let mut finished = Vec::new();
    for (id, run_id) in owned.iter() {
        if sessions.get(id).await.map(|s| s.run_id) != Some(*run_id) {
            finished.push(id.clone());
        }
    }
    for id in finished {
        owned.remove(&id);
    }
}
