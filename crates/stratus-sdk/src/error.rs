//! SDK errors.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SdkError {
    /// The node could not be reached or the connection dropped.
    #[error("Connection error: {0}")]
    Connection(String),

    /// The node answered a REST call with an error status.
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    /// The node refused to start or cancel a session.
    #[error("Rejected: {0}")]
    Rejected(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The event stream ended before a terminal status.
    #[error("Stream closed before the session finished")]
    Closed,
}

impl From<serde_json::Error> for SdkError {
    fn from(err: serde_json::Error) -> Self {
        SdkError::Serialization(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SdkError>;
