//! Stratus client implementation.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use stratus_core::{
    ClientMessage, ControlFrame, OperationRequest, ServerMessage, SessionKind, SessionStatus,
};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use crate::error::{Result, SdkError};
use crate::stream::SessionStream;

type WsWriter = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type Routes = Arc<Mutex<HashMap<String, mpsc::UnboundedSender<ServerMessage>>>>;

/// A live session as reported by the REST API.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub id: String,
    pub kind: SessionKind,
    pub status: SessionStatus,
    pub started_at: DateTime<Utc>,
}

/// Client for a Stratus node.
///
/// Holds one progress channel; any number of sessions can run on it at once.
pub struct StratusClient {
    /// Base URL of the node.
    base_url: String,

    /// HTTP client.
    http_client: reqwest::Client,

    writer: Mutex<WsWriter>,
    routes: Routes,
    control_rx: Mutex<mpsc::UnboundedReceiver<ServerMessage>>,
    reader: JoinHandle<()>,
}

impl StratusClient {
    /// Connect to a node, e.g. `http://127.0.0.1:3000`.
    pub async fn connect(url: &str) -> Result<Self> {
        let base_url = url.trim_end_matches('/').to_string();
        let http_client = reqwest::Client::new();

        http_client
            .get(format!("{}/health", base_url))
            .send()
            .await
            .map_err(|e| SdkError::Connection(e.to_string()))?
            .error_for_status()
            .map_err(|e| SdkError::Connection(e.to_string()))?;

        let (ws_stream, _) = connect_async(channel_url(&base_url))
            .await
            .map_err(|e| SdkError::Connection(e.to_string()))?;
        let (writer, read) = ws_stream.split();

        let routes: Routes = Arc::new(Mutex::new(HashMap::new()));
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let reader = tokio::spawn(route_messages(read, routes.clone(), control_tx));

        Ok(Self {
            base_url,
            http_client,
            writer: Mutex::new(writer),
            routes,
            control_rx: Mutex::new(control_rx),
            reader,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Start a session and follow its events.
    pub async fn start(&self, request: OperationRequest) -> Result<SessionStream> {
        let session_id = request.session_id.clone();
        let (tx, rx) = mpsc::unbounded_channel();
        {
            let mut routes = self.routes.lock().await;
            if routes.contains_key(&session_id) {
                return Err(SdkError::Rejected(format!(
                    "session {} is already followed by this client",
                    session_id
                )));
            }
            routes.insert(session_id.clone(), tx);
        }

        if let Err(e) = self.send(&ClientMessage::start(request)).await {
            self.routes.lock().await.remove(&session_id);
            return Err(e);
        }
        Ok(SessionStream::new(session_id, rx))
    }

    /// Ask the node to cancel a session over the progress channel.
    ///
    /// The outcome arrives as the session's terminal event, or as an error
    /// frame on [`next_control`](Self::next_control) if the id is unknown.
    pub async fn cancel(&self, session_id: &str) -> Result<()> {
        self.send(&ClientMessage::Cancel {
            session_id: session_id.to_string(),
        })
        .await
    }

    pub async fn ping(&self) -> Result<()> {
        self.send(&ClientMessage::Ping).await
    }

    /// Next frame not addressed to a followed session: pongs and errors.
    pub async fn next_control(&self) -> Option<ServerMessage> {
        self.control_rx.lock().await.recv().await
    }

    /// List the node's live sessions.
    pub async fn list_sessions(&self) -> Result<Vec<SessionSummary>> {
        let response = self
            .http_client
            .get(format!("{}/api/v1/sessions", self.base_url))
            .send()
            .await
            .map_err(|e| SdkError::Connection(e.to_string()))?;
        let response = check_status(response).await?;
        response
            .json()
            .await
            .map_err(|e| SdkError::Serialization(e.to_string()))
    }

    /// Cancel a session through the REST API.
    pub async fn cancel_session(&self, session_id: &str) -> Result<()> {
        let response = self
            .http_client
            .delete(format!("{}/api/v1/sessions/{}", self.base_url, session_id))
            .send()
            .await
            .map_err(|e| SdkError::Connection(e.to_string()))?;
        check_status(response).await?;
        Ok(())
    }

    async fn send(&self, message: &ClientMessage) -> Result<()> {
        let json = serde_json::to_string(message)?;
        self.writer
            .lock()
            .await
            .send(Message::Text(json.into()))
            .await
            .map_err(|e| SdkError::Connection(e.to_string()))
    }
}

impl Drop for StratusClient {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

/// Turn a node base URL into its progress channel URL.
fn channel_url(base_url: &str) -> String {
    let ws = if let Some(rest) = base_url.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = base_url.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else {
        base_url.to_string()
    };
    format!("{}/ws", ws)
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response.text().await.unwrap_or_default();
    Err(SdkError::Http {
        status: status.as_u16(),
        message,
    })
}

/// Deliver inbound frames to the session they belong to.
///
/// A route is dropped after its terminal event or a rejection, so the
/// session's stream ends there.
async fn route_messages<S>(
    mut read: S,
    routes: Routes,
    control: mpsc::UnboundedSender<ServerMessage>,
) where
    S: futures::Stream<Item = std::result::Result<Message, tokio_tungstenite::tungstenite::Error>>
        + Unpin,
{
    while let Some(frame) = read.next().await {
        let text = match frame {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) | Err(_) => break,
            _ => continue,
        };

        let message: ServerMessage = match serde_json::from_str(&text) {
            Ok(message) => message,
            Err(e) => {
                warn!("Ignoring unreadable frame: {}", e);
                continue;
            }
        };

        let (session_id, last) = match &message {
            ServerMessage::Event(envelope) => {
                (Some(envelope.session_id.clone()), envelope.event.is_terminal())
            }
            ServerMessage::Control(ControlFrame::Error { session_id, .. }) => {
                (session_id.clone(), true)
            }
            ServerMessage::Control(ControlFrame::Pong) => (None, false),
        };

        let route = match &session_id {
            Some(id) => {
                let mut routes = routes.lock().await;
                let route = routes.get(id).cloned();
                if last && route.is_some() {
                    routes.remove(id);
                }
                route
            }
            None => None,
        };

        match route {
            Some(route) => {
                if route.send(message).is_err() {
                    debug!(session_id = ?session_id, "session stream dropped");
                }
            }
            None => {
                let _ = control.send(message);
            }
        }
    }
    debug!("progress channel closed");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_url() {
        assert_eq!(channel_url("http://127.0.0.1:3000"), "ws://127.0.0.1:3000/ws");
        assert_eq!(channel_url("https://stratus.example.com"), "wss://stratus.example.com/ws");
        assert_eq!(channel_url("ws://localhost:1"), "ws://localhost:1/ws");
    }
}
