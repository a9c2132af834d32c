//! Session table errors.

use stratus_core::StratusError;
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum SessionError {
    /// No live session has this id.
    #[error("Session not found: {0}")]
    NotFound(String),

    /// A live session already uses this id.
    #[error("Session already in progress: {0}")]
    Conflict(String),

    #[error(transparent)]
    InvalidRequest(#[from] StratusError),
}

impl SessionError {
    pub fn session_id(&self) -> Option<&str> {
        match self {
            SessionError::NotFound(id) | SessionError::Conflict(id) => Some(id),
            SessionError::InvalidRequest(e) => e.session_id(),
        }
    }
}

pub type Result<T> = std::result::Result<T, SessionError>;
