//! # Stratus Core
//!
//! Core primitives shared by every Stratus crate.
//!
//! This crate provides:
//! - [`SessionKind`] / [`SessionStatus`] - the lifecycle vocabulary of a provisioning session
//! - [`ResourceDescriptor`] - what the ensurer creates
//! - [`ProgressEvent`] / [`EventEnvelope`] - what the progress channel carries
//! - [`ClientMessage`] / [`ServerMessage`] - the WebSocket wire protocol
//! - [`StratusError`] - protocol error types

pub mod cancel;
pub mod error;
pub mod event;
pub mod protocol;
pub mod types;

pub use cancel::{cancel_pair, CancelSignal, CancelTrigger};
pub use error::{Result, StratusError};
pub use event::{EventEnvelope, LogLevel, ProgressEvent, ProgressSink, StatusState};
pub use protocol::{
    CicdSetupPayload, ClientMessage, ControlFrame, ImageDeployPayload, ImageSource,
    InitialSetupPayload, Operation, OperationRequest, ServerMessage,
};
pub use types::*;

/// Prelude module for common imports
pub mod prelude {
    pub use crate::error::{Result, StratusError};
    pub use crate::event::{EventEnvelope, LogLevel, ProgressEvent, ProgressSink, StatusState};
    pub use crate::protocol::{ClientMessage, Operation, OperationRequest, ServerMessage};
    pub use crate::types::{ResourceDescriptor, ResourceKind, SessionKind, SessionStatus};
}
