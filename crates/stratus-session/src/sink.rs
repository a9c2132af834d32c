//! Per-session event sink and cancel handle.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use stratus_core::{
    CancelTrigger, EventEnvelope, ProgressEvent, ProgressSink, ServerMessage, SessionKind,
    SessionStatus, StatusState,
};
use tokio::sync::{mpsc, Mutex};
use tokio::task::AbortHandle;
use tracing::debug;
use uuid::Uuid;

use crate::manager::SessionManager;

/// Writer half of a client connection.
pub type Outbound = mpsc::UnboundedSender<ServerMessage>;

#[derive(Debug, Default)]
struct SinkState {
    seq: u64,
    closed: bool,
}

/// Registration to drop from the session table when the run ends.
#[derive(Debug, Clone)]
struct Registration {
    sessions: SessionManager,
    run_id: Uuid,
}

/// Numbers and forwards the events of one session.
///
/// Numbering and sending happen under one lock, so the connection writer sees
/// each session's events in `seq` order. Once a terminal status went out the
/// sink is closed and later events are dropped.
#[derive(Debug, Clone)]
pub struct EventSink {
    session_id: String,
    kind: SessionKind,
    tx: Outbound,
    state: Arc<Mutex<SinkState>>,
    registration: Option<Registration>,
}

impl EventSink {
    pub fn new(session_id: impl Into<String>, kind: SessionKind, tx: Outbound) -> Self {
        Self {
            session_id: session_id.into(),
            kind,
            tx,
            state: Arc::new(Mutex::new(SinkState::default())),
            registration: None,
        }
    }

    /// Deregister `run_id` from `sessions` before the terminal status is sent,
    /// so a client that sees it can reuse the session id straight away.
    pub fn deregister_on_terminal(mut self, sessions: SessionManager, run_id: Uuid) -> Self {
        self.registration = Some(Registration { sessions, run_id });
        self
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub async fn is_closed(&self) -> bool {
        self.state.lock().await.closed
    }
}

#[async_trait]
impl ProgressSink for EventSink {
    async fn emit(&self, event: ProgressEvent) {
        let mut state = self.state.lock().await;
        if state.closed {
            debug!(session_id = %self.session_id, "dropping event after terminal status");
            return;
        }

        state.seq += 1;
        if event.is_terminal() {
            state.closed = true;
            if let Some(registration) = &self.registration {
                registration
                    .sessions
                    .finish(&self.session_id, registration.run_id, terminal_status(&event))
                    .await;
            }
        }

        let envelope = EventEnvelope {
            session_id: self.session_id.clone(),
            session_kind: self.kind,
            seq: state.seq,
            event,
        };
        if self.tx.send(ServerMessage::Event(envelope)).is_err() {
            debug!(session_id = %self.session_id, "client connection gone");
        }
    }
}

fn terminal_status(event: &ProgressEvent) -> SessionStatus {
    match event {
        ProgressEvent::Status {
            status: StatusState::Completed,
            ..
        } => SessionStatus::Completed,
        ProgressEvent::Status { data: Some(data), .. } if data["cancelled"] == true => {
            SessionStatus::Cancelled
        }
        _ => SessionStatus::Failed,
    }
}

/// Everything needed to stop a running session.
#[derive(Debug)]
pub struct CancelHandle {
    trigger: CancelTrigger,
    abort: AbortHandle,
    sink: EventSink,
}

impl CancelHandle {
    pub fn new(trigger: CancelTrigger, abort: AbortHandle, sink: EventSink) -> Self {
        Self {
            trigger,
            abort,
            sink,
        }
    }

    /// Stop the run and report the cancellation as its terminal status.
    ///
    /// Best effort: a write the management API already accepted is not undone.
    pub async fn fire(self) {
        self.trigger.trigger();
        self.abort.abort();

        self.sink
            .warning(
                "🛑 Operation cancelled. Resources created before this point were kept."
                    .to_string(),
            )
            .await;
        self.sink
            .emit(ProgressEvent::failed(json!({
                "cancelled": true,
                "error": "Operation cancelled by user",
            })))
            .await;
    }
}
