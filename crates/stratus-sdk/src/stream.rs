//! Per-session event stream.

use futures::Stream;
use stratus_core::{ControlFrame, EventEnvelope, ServerMessage};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::StreamExt;

use crate::error::{Result, SdkError};

/// Something that happened to a session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionUpdate {
    /// A progress event.
    Event(EventEnvelope),
    /// The node refused the session.
    Rejected(String),
}

impl SessionUpdate {
    fn from_message(message: ServerMessage) -> Option<Self> {
        match message {
            ServerMessage::Event(envelope) => Some(SessionUpdate::Event(envelope)),
            ServerMessage::Control(ControlFrame::Error { message, .. }) => {
                Some(SessionUpdate::Rejected(message))
            }
            ServerMessage::Control(ControlFrame::Pong) => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        match self {
            SessionUpdate::Event(envelope) => envelope.event.is_terminal(),
            SessionUpdate::Rejected(_) => true,
        }
    }
}

/// Events of one session, in order.
pub struct SessionStream {
    session_id: String,
    receiver: mpsc::UnboundedReceiver<ServerMessage>,
}

impl SessionStream {
    pub(crate) fn new(session_id: String, receiver: mpsc::UnboundedReceiver<ServerMessage>) -> Self {
        Self {
            session_id,
            receiver,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Get the next update. `None` once the session is over.
    pub async fn next(&mut self) -> Option<SessionUpdate> {
        loop {
            let message = self.receiver.recv().await?;
            if let Some(update) = SessionUpdate::from_message(message) {
                return Some(update);
            }
        }
    }

    /// Collect events up to and including the terminal status.
    pub async fn finish(mut self) -> Result<Vec<EventEnvelope>> {
        let mut events = Vec::new();
        while let Some(update) = self.next().await {
            match update {
                SessionUpdate::Rejected(message) => return Err(SdkError::Rejected(message)),
                SessionUpdate::Event(envelope) => {
                    let terminal = envelope.event.is_terminal();
                    events.push(envelope);
                    if terminal {
                        return Ok(events);
                    }
                }
            }
        }
        Err(SdkError::Closed)
    }

    /// Adapt into a [`Stream`] of updates.
    pub fn into_stream(self) -> impl Stream<Item = SessionUpdate> {
        UnboundedReceiverStream::new(self.receiver).filter_map(SessionUpdate::from_message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use stratus_core::{LogLevel, ProgressEvent, SessionKind};

    fn envelope(seq: u64, event: ProgressEvent) -> ServerMessage {
        ServerMessage::Event(EventEnvelope {
            session_id: "s-1".to_string(),
            session_kind: SessionKind::InitialSetup,
            seq,
            event,
        })
    }

    #[tokio::test]
    async fn test_finish_stops_at_terminal_status() {
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(envelope(1, ProgressEvent::starting())).unwrap();
        tx.send(ServerMessage::Control(ControlFrame::Pong)).unwrap();
        tx.send(envelope(2, ProgressEvent::log(LogLevel::Info, "hi"))).unwrap();
        tx.send(envelope(3, ProgressEvent::completed(json!({})))).unwrap();

        let events = SessionStream::new("s-1".to_string(), rx).finish().await.unwrap();
        assert_eq!(events.iter().map(|e| e.seq).collect::<Vec<_>>(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_rejection_and_early_close() {
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(ServerMessage::error(Some("s-1".to_string()), "Session already in progress: s-1"))
            .unwrap();
        let err = SessionStream::new("s-1".to_string(), rx).finish().await.unwrap_err();
        assert!(matches!(err, SdkError::Rejected(_)));

        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(envelope(1, ProgressEvent::starting())).unwrap();
        drop(tx);
        let err = SessionStream::new("s-1".to_string(), rx).finish().await.unwrap_err();
        assert_eq!(err, SdkError::Closed);
    }
}
