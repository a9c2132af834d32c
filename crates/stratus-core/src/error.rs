//! Error types for the Stratus wire protocol.

use thiserror::Error;

/// Main error type for protocol-level operations.
#[derive(Error, Debug, Clone)]
pub enum StratusError {
    /// An operation request failed validation.
    #[error("Invalid request for session {session_id}: {message}")]
    InvalidRequest { session_id: String, message: String },

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl StratusError {
    /// Returns the session id if the error is tied to one.
    pub fn session_id(&self) -> Option<&str> {
        match self {
            StratusError::InvalidRequest { session_id, .. } => Some(session_id),
            _ => None,
        }
    }
}

/// Convenience Result type for protocol operations.
pub type Result<T> = std::result::Result<T, StratusError>;

impl From<serde_json::Error> for StratusError {
    fn from(err: serde_json::Error) -> Self {
        StratusError::SerializationError(err.to_string())
    }
}
