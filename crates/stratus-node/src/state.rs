//! Application state.

use std::sync::Arc;

use stratus_core::{cancel_pair, OperationRequest, SessionStatus};
use stratus_provision::{
    Authenticator, AzureCliAuthenticator, HttpManagementApi, InMemoryManagementApi, ManagementApi,
    ProvisioningPipeline, StaticTokenAuthenticator,
};
use stratus_session::{CancelHandle, EventSink, Outbound, Session, SessionError, SessionManager};
use tokio::sync::oneshot;
use tracing::debug;

use crate::config::{AuthMode, NodeConfig};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Live sessions.
    pub sessions: SessionManager,

    /// Runs the operations.
    pub pipeline: Arc<ProvisioningPipeline>,
}

impl AppState {
    pub fn new(pipeline: ProvisioningPipeline) -> Self {
        Self {
            sessions: SessionManager::new(),
            pipeline: Arc::new(pipeline),
        }
    }

    /// Wire the management API and authenticator selected by `config`.
    pub fn from_config(config: &NodeConfig) -> Self {
        let scope = config.provision.management_scope.clone();

        let api: Arc<dyn ManagementApi> = if config.dry_run {
            Arc::new(InMemoryManagementApi::new())
        } else {
            Arc::new(HttpManagementApi::new(&config.provision.management_endpoint))
        };

        let authenticator: Arc<dyn Authenticator> = match &config.auth {
            _ if config.dry_run => Arc::new(StaticTokenAuthenticator::new("dry-run", scope)),
            AuthMode::StaticToken(token) => {
                Arc::new(StaticTokenAuthenticator::new(token.clone(), scope))
            }
            AuthMode::AzureCli {
                program,
                interactive,
            } => {
                let cli = AzureCliAuthenticator::new(program.clone(), scope, config.auth_timeout);
                if *interactive {
                    Arc::new(cli)
                } else {
                    Arc::new(cli.reuse_existing_login())
                }
            }
        };

        Self::new(ProvisioningPipeline::new(
            api,
            authenticator,
            config.provision.clone(),
        ))
    }

    /// Register `request` and start its pipeline, streaming events to `tx`.
    ///
    /// The run is held back until its cancel handle is attached, so a cancel
    /// can never miss a started run.
    pub async fn start_session(
        &self,
        request: OperationRequest,
        tx: Outbound,
    ) -> Result<Session, SessionError> {
        request.validate()?;
        let kind = request.kind();
        let session = self.sessions.open(&request.session_id, kind).await?;

        let run_id = session.run_id;
        let sink = EventSink::new(&session.id, kind, tx)
            .deregister_on_terminal(self.sessions.clone(), run_id);
        let (trigger, signal) = cancel_pair();
        let (go_tx, go_rx) = oneshot::channel::<()>();

        let pipeline = self.pipeline.clone();
        let sessions = self.sessions.clone();
        let run_sink = sink.clone();
        let task = tokio::spawn(async move {
            if go_rx.await.is_err() {
                return;
            }
            let status = pipeline.run(&request, &run_sink, &signal).await;
            sessions.finish(&request.session_id, run_id, status).await;
        });

        let handle = CancelHandle::new(trigger, task.abort_handle(), sink);
        if self.sessions.attach(&session.id, run_id, handle).await.is_err() {
            debug!(session_id = %session.id, "session cancelled before its run started");
            return Ok(Session {
                status: SessionStatus::Cancelled,
                ..session
            });
        }

        let _ = go_tx.send(());
        Ok(Session {
            status: SessionStatus::Running,
            ..session
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use stratus_core::{
        Credential, ImageSource, InitialSetupPayload, Operation, ProgressEvent, ProgressSink,
        ServerMessage, StatusState,
    };
    use stratus_provision::{AuthError, ProvisionConfig};
    use tokio::sync::mpsc;

    struct PendingAuthenticator;

    #[async_trait]
    impl Authenticator for PendingAuthenticator {
        async fn authenticate(&self, _sink: &dyn ProgressSink) -> Result<Credential, AuthError> {
            std::future::pending().await
        }
    }

    fn request(id: &str) -> OperationRequest {
        OperationRequest::new(
            id,
            Operation::InitialSetup(InitialSetupPayload {
                resource_group: "rg".to_string(),
                environment_name: "env".to_string(),
                app_name: "web".to_string(),
                location: "westeurope".to_string(),
                image: ImageSource::default(),
            }),
        )
    }

    fn blocked_state() -> AppState {
        AppState::new(ProvisioningPipeline::new(
            Arc::new(InMemoryManagementApi::new()),
            Arc::new(PendingAuthenticator),
            ProvisionConfig::default(),
        ))
    }

    #[tokio::test]
    async fn test_dry_run_session_completes_and_deregisters() {
        let state = AppState::from_config(&NodeConfig {
            dry_run: true,
            ..NodeConfig::default()
        });
        let (tx, mut rx) = mpsc::unbounded_channel();

        let session = state.start_session(request("s-1"), tx).await.unwrap();
        assert_eq!(session.status, SessionStatus::Running);

        loop {
            match rx.recv().await {
                Some(ServerMessage::Event(envelope)) if envelope.event.is_terminal() => {
                    assert!(matches!(
                        envelope.event,
                        ProgressEvent::Status { status: StatusState::Completed, .. }
                    ));
                    break;
                }
                Some(_) => continue,
                None => panic!("channel closed before the terminal status"),
            }
        }

        for _ in 0..50 {
            if state.sessions.is_empty().await {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert!(state.sessions.is_empty().await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_id_is_reusable_once_terminal_status_arrives() {
        let state = AppState::from_config(&NodeConfig {
            dry_run: true,
            ..NodeConfig::default()
        });
        let (tx, mut rx) = mpsc::unbounded_channel();

        for _ in 0..50 {
            state.start_session(request("s-1"), tx.clone()).await.unwrap();
            loop {
                match rx.recv().await {
                    Some(ServerMessage::Event(envelope)) if envelope.event.is_terminal() => break,
                    Some(_) => continue,
                    None => panic!("channel closed before the terminal status"),
                }
            }
        }
        assert!(state.sessions.is_empty().await);
    }

    #[tokio::test]
    async fn test_duplicate_live_id_conflicts() {
        let state = blocked_state();
        let (tx, _rx) = mpsc::unbounded_channel();

        state.start_session(request("s-1"), tx.clone()).await.unwrap();
        let err = state.start_session(request("s-1"), tx).await.unwrap_err();
        assert!(matches!(err, SessionError::Conflict(_)));

        state.sessions.cancel("s-1").await.unwrap();
    }

    #[tokio::test]
    async fn test_invalid_request_is_rejected() {
        let state = blocked_state();
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut bad = request("s-1");
        if let Operation::InitialSetup(payload) = &mut bad.operation {
            payload.app_name = String::new();
        }

        let err = state.start_session(bad, tx).await.unwrap_err();
        assert!(matches!(err, SessionError::InvalidRequest(_)));
        assert!(state.sessions.is_empty().await);
    }
}
