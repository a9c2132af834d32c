//! The session table.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stratus_core::{SessionKind, SessionStatus};
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{Result, SessionError};
use crate::sink::CancelHandle;

/// A client-visible provisioning run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub kind: SessionKind,
    pub status: SessionStatus,
    /// Distinguishes successive sessions that reuse the same id.
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
}

struct Entry {
    session: Session,
    handle: Option<CancelHandle>,
}

/// Live sessions by id.
///
/// Handles are fired after the table lock is released; firing emits events
/// and must not hold up other sessions.
#[derive(Clone, Default)]
pub struct SessionManager {
    sessions: Arc<RwLock<HashMap<String, Entry>>>,
}

impl fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionManager").finish_non_exhaustive()
    }
}

impl SessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new pending session. Fails if the id is live.
    pub async fn open(&self, id: &str, kind: SessionKind) -> Result<Session> {
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(id) {
            return Err(SessionError::Conflict(id.to_string()));
        }

        let session = Session {
            id: id.to_string(),
            kind,
            status: SessionStatus::Pending,
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
        };
        sessions.insert(
            id.to_string(),
            Entry {
                session: session.clone(),
                handle: None,
            },
        );
        debug!(session_id = %id, %kind, "session opened");
        Ok(session)
    }

    /// Attach the cancel handle of a started run and mark it running.
    ///
    /// If the session was cancelled before the handle arrived, the handle is
    /// fired here and `NotFound` is returned.
    pub async fn attach(&self, id: &str, run_id: Uuid, handle: CancelHandle) -> Result<()> {
        {
            let mut sessions = self.sessions.write().await;
            if let Some(entry) = sessions.get_mut(id).filter(|e| e.session.run_id == run_id) {
                entry.session.status = SessionStatus::Running;
                entry.handle = Some(handle);
                return Ok(());
            }
        }

        debug!(session_id = %id, "session cancelled before it started");
        handle.fire().await;
        Err(SessionError::NotFound(id.to_string()))
    }

    /// Cancel a live session and remove it immediately.
    pub async fn cancel(&self, id: &str) -> Result<Session> {
        let entry = self
            .sessions
            .write()
            .await
            .remove(id)
            .ok_or_else(|| SessionError::NotFound(id.to_string()))?;
        Ok(Self::fire(entry).await)
    }

    /// Cancel `id` only if it still belongs to `run_id`.
    pub async fn cancel_run(&self, id: &str, run_id: Uuid) -> Option<Session> {
        let entry = {
            let mut sessions = self.sessions.write().await;
            if sessions.get(id).is_some_and(|e| e.session.run_id == run_id) {
                sessions.remove(id)
            } else {
                None
            }
        }?;
        Some(Self::fire(entry).await)
    }

    async fn fire(entry: Entry) -> Session {
        let mut session = entry.session;
        session.status = SessionStatus::Cancelled;
        info!("🛑 Cancelling session {} ({})", session.id, session.kind);
        if let Some(handle) = entry.handle {
            handle.fire().await;
        }
        session
    }

    /// Deregister a run that reached a terminal state on its own.
    pub async fn finish(&self, id: &str, run_id: Uuid, status: SessionStatus) {
        let mut sessions = self.sessions.write().await;
        if sessions.get(id).is_some_and(|e| e.session.run_id == run_id) {
            sessions.remove(id);
            info!("Session {} finished: {:?}", id, status);
        }
    }

    pub async fn get(&self, id: &str) -> Option<Session> {
        self.sessions.read().await.get(id).map(|e| e.session.clone())
    }

    /// Live sessions, oldest first.
    pub async fn list(&self) -> Vec<Session> {
        let mut sessions: Vec<Session> = self
            .sessions
            .read()
            .await
            .values()
            .map(|e| e.session.clone())
            .collect();
        sessions.sort_by_key(|s| s.started_at);
        sessions
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::EventSink;
    use stratus_core::{cancel_pair, ServerMessage};
    use tokio::sync::mpsc;

    fn handle(id: &str) -> (CancelHandle, mpsc::UnboundedReceiver<ServerMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = EventSink::new(id, SessionKind::InitialSetup, tx);
        let (trigger, _signal) = cancel_pair();
        let task = tokio::spawn(std::future::pending::<()>());
        (CancelHandle::new(trigger, task.abort_handle(), sink), rx)
    }

    #[tokio::test]
    async fn test_open_rejects_live_duplicate() {
        let manager = SessionManager::new();
        manager.open("s-1", SessionKind::InitialSetup).await.unwrap();

        let err = manager.open("s-1", SessionKind::CicdSetup).await.unwrap_err();
        assert!(matches!(err, SessionError::Conflict(id) if id == "s-1"));
        assert_eq!(manager.len().await, 1);
    }

    #[tokio::test]
    async fn test_cancel_twice_is_not_found() {
        let manager = SessionManager::new();
        let session = manager.open("s-1", SessionKind::InitialSetup).await.unwrap();
        let (handle, mut rx) = handle("s-1");
        manager.attach("s-1", session.run_id, handle).await.unwrap();
        assert_eq!(manager.get("s-1").await.unwrap().status, SessionStatus::Running);

        let cancelled = manager.cancel("s-1").await.unwrap();
        assert_eq!(cancelled.status, SessionStatus::Cancelled);
        assert!(manager.is_empty().await);
        assert!(rx.try_recv().is_ok());

        let err = manager.cancel("s-1").await.unwrap_err();
        assert!(matches!(err, SessionError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_attach_after_cancel_fires_handle() {
        let manager = SessionManager::new();
        let session = manager.open("s-1", SessionKind::InitialSetup).await.unwrap();
        manager.cancel("s-1").await.unwrap();

        let (handle, mut rx) = handle("s-1");
        let err = manager.attach("s-1", session.run_id, handle).await.unwrap_err();
        assert!(matches!(err, SessionError::NotFound(_)));

        let mut terminal = 0;
        while let Ok(ServerMessage::Event(envelope)) = rx.try_recv() {
            if envelope.event.is_terminal() {
                terminal += 1;
            }
        }
        assert_eq!(terminal, 1);
    }

    #[tokio::test]
    async fn test_stale_finish_keeps_newer_session() {
        let manager = SessionManager::new();
        let first = manager.open("s-1", SessionKind::ImageDeploy).await.unwrap();
        manager.finish("s-1", first.run_id, SessionStatus::Completed).await;
        assert!(manager.is_empty().await);

        let second = manager.open("s-1", SessionKind::ImageDeploy).await.unwrap();
        manager.finish("s-1", first.run_id, SessionStatus::Completed).await;
        assert_eq!(manager.get("s-1").await.map(|s| s.run_id), Some(second.run_id));

        assert!(manager.cancel_run("s-1", first.run_id).await.is_none());
        assert!(manager.cancel_run("s-1", second.run_id).await.is_some());
    }

    #[tokio::test]
    async fn test_list_is_oldest_first() {
        let manager = SessionManager::new();
        manager.open("b", SessionKind::InitialSetup).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        manager.open("a", SessionKind::CicdSetup).await.unwrap();

        let ids: Vec<String> = manager.list().await.into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec!["b".to_string(), "a".to_string()]);
    }
}
