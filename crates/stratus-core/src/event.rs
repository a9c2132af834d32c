//! Progress events streamed to clients.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::SessionKind;

/// Severity/channel of a log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Info,
    Warning,
    Error,
    /// A management call about to be issued.
    Command,
    /// Captured standard output of an external process.
    Stdout,
    /// Captured standard error of an external process.
    Stderr,
}

/// Lifecycle state carried by a status event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusState {
    Starting,
    Completed,
    Failed,
}

impl StatusState {
    /// Returns true if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, StatusState::Completed | StatusState::Failed)
    }
}

/// A single progress event of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    /// A log line.
    Log {
        level: LogLevel,
        message: String,
        timestamp: DateTime<Utc>,
    },
    /// A lifecycle transition.
    Status {
        status: StatusState,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<serde_json::Value>,
    },
}

impl ProgressEvent {
    /// Create a log event stamped now.
    pub fn log(level: LogLevel, message: impl Into<String>) -> Self {
        ProgressEvent::Log {
            level,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn starting() -> Self {
        ProgressEvent::Status {
            status: StatusState::Starting,
            data: None,
        }
    }

    pub fn completed(data: serde_json::Value) -> Self {
        ProgressEvent::Status {
            status: StatusState::Completed,
            data: Some(data),
        }
    }

    pub fn failed(data: serde_json::Value) -> Self {
        ProgressEvent::Status {
            status: StatusState::Failed,
            data: Some(data),
        }
    }

    /// Returns true if no further event may follow this one.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProgressEvent::Status { status, .. } if status.is_terminal())
    }
}

/// An event as delivered on the progress channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope {
    pub session_id: String,
    pub session_kind: SessionKind,
    /// Per-session sequence number, starting at 1.
    pub seq: u64,
    #[serde(flatten)]
    pub event: ProgressEvent,
}

/// Destination for the events of one session.
#[async_trait]
pub trait ProgressSink: Send + Sync {
    /// Deliver an event. Events after a terminal status are dropped.
    async fn emit(&self, event: ProgressEvent);

    async fn info(&self, message: String) {
        self.emit(ProgressEvent::log(LogLevel::Info, message)).await;
    }

    async fn warning(&self, message: String) {
        self.emit(ProgressEvent::log(LogLevel::Warning, message)).await;
    }

    async fn error(&self, message: String) {
        self.emit(ProgressEvent::log(LogLevel::Error, message)).await;
    }

    async fn command(&self, message: String) {
        self.emit(ProgressEvent::log(LogLevel::Command, message)).await;
    }
}
