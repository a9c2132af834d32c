//! Progress channel wire protocol.
//!
//! Every inbound message names the session it targets; every outbound event
//! carries the session id and kind so one connection can multiplex sessions.

use serde::{Deserialize, Serialize};

use crate::error::{Result, StratusError};
use crate::event::EventEnvelope;
use crate::types::SessionKind;

/// Messages sent by the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMessage {
    #[serde(rename_all = "camelCase")]
    InitialSetup {
        session_id: String,
        payload: InitialSetupPayload,
    },
    #[serde(rename_all = "camelCase")]
    CicdSetup {
        session_id: String,
        payload: CicdSetupPayload,
    },
    #[serde(rename_all = "camelCase")]
    ImageDeploy {
        session_id: String,
        payload: ImageDeployPayload,
    },
    #[serde(rename_all = "camelCase")]
    Cancel { session_id: String },
    /// Keepalive.
    Ping,
}

impl ClientMessage {
    /// Parse one inbound text frame.
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Wrap an operation request into its wire message.
    pub fn start(request: OperationRequest) -> Self {
        let session_id = request.session_id;
        match request.operation {
            Operation::InitialSetup(payload) => ClientMessage::InitialSetup { session_id, payload },
            Operation::CicdSetup(payload) => ClientMessage::CicdSetup { session_id, payload },
            Operation::ImageDeploy(payload) => ClientMessage::ImageDeploy { session_id, payload },
        }
    }

    /// Extract the operation request, if this message starts one.
    pub fn into_request(self) -> Option<OperationRequest> {
        let (session_id, operation) = match self {
            ClientMessage::InitialSetup { session_id, payload } => {
                (session_id, Operation::InitialSetup(payload))
            }
            ClientMessage::CicdSetup { session_id, payload } => {
                (session_id, Operation::CicdSetup(payload))
            }
            ClientMessage::ImageDeploy { session_id, payload } => {
                (session_id, Operation::ImageDeploy(payload))
            }
            ClientMessage::Cancel { .. } | ClientMessage::Ping => return None,
        };
        Some(OperationRequest {
            session_id,
            operation,
        })
    }
}

/// An operation bound to a session id.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationRequest {
    pub session_id: String,
    pub operation: Operation,
}

impl OperationRequest {
    pub fn new(session_id: impl Into<String>, operation: Operation) -> Self {
        Self {
            session_id: session_id.into(),
            operation,
        }
    }

    pub fn kind(&self) -> SessionKind {
        self.operation.kind()
    }

    /// Check required fields before a session is opened.
    pub fn validate(&self) -> Result<()> {
        let invalid = |message: String| StratusError::InvalidRequest {
            session_id: self.session_id.clone(),
            message,
        };

        if self.session_id.trim().is_empty() {
            return Err(invalid("sessionId cannot be empty".to_string()));
        }

        let (app_name, required): (&str, Vec<(&str, &str)>) = match &self.operation {
            Operation::InitialSetup(p) => (
                p.app_name.as_str(),
                vec![
                    ("resourceGroup", p.resource_group.as_str()),
                    ("environmentName", p.environment_name.as_str()),
                    ("appName", p.app_name.as_str()),
                    ("location", p.location.as_str()),
                ],
            ),
            Operation::CicdSetup(p) => (
                p.app_name.as_str(),
                vec![
                    ("appName", p.app_name.as_str()),
                    ("resourceGroup", p.resource_group.as_str()),
                    ("location", p.location.as_str()),
                    ("owner", p.owner.as_str()),
                    ("repo", p.repo.as_str()),
                ],
            ),
            Operation::ImageDeploy(p) => (
                p.app_name.as_str(),
                vec![("appName", p.app_name.as_str()), ("resourceGroup", p.resource_group.as_str())],
            ),
        };

        if let Some((field, _)) = required.iter().find(|(_, value)| value.trim().is_empty()) {
            return Err(invalid(format!("{} is required", field)));
        }

        if !is_valid_app_name(app_name) {
            return Err(invalid(format!(
                "appName '{}' must be 2-32 lowercase letters, digits or hyphens and start with a letter",
                app_name
            )));
        }

        Ok(())
    }
}

fn is_valid_app_name(name: &str) -> bool {
    let len_ok = (2..=32).contains(&name.len());
    let starts_ok = name.chars().next().is_some_and(|c| c.is_ascii_lowercase());
    let ends_ok = !name.ends_with('-');
    let chars_ok = name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    len_ok && starts_ok && ends_ok && chars_ok
}

/// The fixed operation kinds the pipeline runs.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    InitialSetup(InitialSetupPayload),
    CicdSetup(CicdSetupPayload),
    ImageDeploy(ImageDeployPayload),
}

impl Operation {
    pub fn kind(&self) -> SessionKind {
        match self {
            Operation::InitialSetup(_) => SessionKind::InitialSetup,
            Operation::CicdSetup(_) => SessionKind::CicdSetup,
            Operation::ImageDeploy(_) => SessionKind::ImageDeploy,
        }
    }
}

/// The image fields a client may supply, in any combination.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageSource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub github_container_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_image_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitialSetupPayload {
    pub resource_group: String,
    pub environment_name: String,
    pub app_name: String,
    pub location: String,
    #[serde(flatten)]
    pub image: ImageSource,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CicdSetupPayload {
    pub app_name: String,
    pub resource_group: String,
    pub location: String,
    pub owner: String,
    pub repo: String,
    /// Branch trusted by the federated credential. Defaults to the configured branch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageDeployPayload {
    pub app_name: String,
    pub resource_group: String,
    #[serde(flatten)]
    pub image: ImageSource,
}

/// Messages sent by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServerMessage {
    Event(EventEnvelope),
    Control(ControlFrame),
}

/// Frames that are not part of a session's event stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ControlFrame {
    /// A request could not be honoured.
    #[serde(rename_all = "camelCase")]
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
        message: String,
    },
    /// Keepalive response.
    Pong,
}

impl ServerMessage {
    pub fn error(session_id: Option<String>, message: impl Into<String>) -> Self {
        ServerMessage::Control(ControlFrame::Error {
            session_id,
            message: message.into(),
        })
    }

    /// Session this message belongs to, if any.
    pub fn session_id(&self) -> Option<&str> {
        match self {
            ServerMessage::Event(envelope) => Some(&envelope.session_id),
            ServerMessage::Control(ControlFrame::Error { session_id, .. }) => session_id.as_deref(),
            ServerMessage::Control(ControlFrame::Pong) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::ProgressEvent;
    use serde_json::json;

    #[test]
    fn test_parse_initial_setup() {
        let raw = json!({
            "type": "initial-setup",
            "sessionId": "abc",
            "payload": {
                "resourceGroup": "rg",
                "environmentName": "env",
                "appName": "web",
                "location": "westeurope",
                "githubContainerUrl": "https://github.com/acme/widgets/pkgs/container/widgets-api"
            }
        });

        let msg: ClientMessage = serde_json::from_value(raw).unwrap();
        let request = msg.into_request().unwrap();
        assert_eq!(request.session_id, "abc");
        assert_eq!(request.kind(), SessionKind::InitialSetup);
        match request.operation {
            Operation::InitialSetup(p) => {
                assert_eq!(p.app_name, "web");
                assert!(p.image.github_container_url.is_some());
                assert!(p.image.owner.is_none());
            }
            other => panic!("unexpected operation {:?}", other),
        }
    }

    #[test]
    fn test_parse_cancel_and_ping() {
        let cancel: ClientMessage =
            serde_json::from_str(r#"{"type":"cancel","sessionId":"s-9"}"#).unwrap();
        assert_eq!(cancel, ClientMessage::Cancel { session_id: "s-9".to_string() });
        assert!(cancel.into_request().is_none());

        let ping: ClientMessage = serde_json::from_str(r#"{"type":"ping"}"#).unwrap();
        assert_eq!(ping, ClientMessage::Ping);
    }

    #[test]
    fn test_from_json_reports_malformed_frames() {
        assert_eq!(ClientMessage::from_json(r#"{"type":"ping"}"#).unwrap(), ClientMessage::Ping);

        let err = ClientMessage::from_json(r#"{"type":"teleport"}"#).unwrap_err();
        assert!(matches!(err, StratusError::SerializationError(_)));
        assert!(err.session_id().is_none());
    }

    #[test]
    fn test_unknown_type_rejected() {
        let result = serde_json::from_str::<ClientMessage>(r#"{"type":"github-setup","sessionId":"x"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_requires_fields() {
        let request = OperationRequest::new(
            "s-1",
            Operation::CicdSetup(CicdSetupPayload {
                app_name: "web".to_string(),
                resource_group: "rg".to_string(),
                location: "westeurope".to_string(),
                owner: "acme".to_string(),
                repo: " ".to_string(),
                branch: None,
            }),
        );
        let err = request.validate().unwrap_err();
        assert!(err.to_string().contains("repo is required"));
        assert_eq!(err.session_id(), Some("s-1"));
    }

    #[test]
    fn test_validate_app_name() {
        let mk = |name: &str| {
            OperationRequest::new(
                "s-1",
                Operation::ImageDeploy(ImageDeployPayload {
                    app_name: name.to_string(),
                    resource_group: "rg".to_string(),
                    image: ImageSource::default(),
                }),
            )
        };
        assert!(mk("widgets-api").validate().is_ok());
        assert!(mk("Widgets").validate().is_err());
        assert!(mk("9lives").validate().is_err());
        assert!(mk("trailing-").validate().is_err());
    }

    #[test]
    fn test_server_message_untagged_roundtrip() {
        let event = ServerMessage::Event(EventEnvelope {
            session_id: "s-1".to_string(),
            session_kind: SessionKind::ImageDeploy,
            seq: 1,
            event: ProgressEvent::starting(),
        });
        let text = serde_json::to_string(&event).unwrap();
        assert_eq!(serde_json::from_str::<ServerMessage>(&text).unwrap(), event);

        let error = ServerMessage::error(Some("s-1".to_string()), "no such session");
        let text = serde_json::to_string(&error).unwrap();
        assert!(text.contains(r#""type":"error""#));
        let back: ServerMessage = serde_json::from_str(&text).unwrap();
        assert_eq!(back.session_id(), Some("s-1"));

        let pong: ServerMessage = serde_json::from_str(r#"{"type":"pong"}"#).unwrap();
        assert_eq!(pong, ServerMessage::Control(ControlFrame::Pong));
    }
}
