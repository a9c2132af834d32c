//! # Stratus SDK
//!
//! Client SDK for starting, following and cancelling provisioning sessions
//! on a Stratus node.

pub mod client;
pub mod error;
pub mod stream;

pub use client::{SessionSummary, StratusClient};
pub use error::{Result, SdkError};
pub use stream::{SessionStream, SessionUpdate};

/// Prelude module for common imports.
pub mod prelude {
    pub use crate::client::StratusClient;
    pub use crate::stream::{SessionStream, SessionUpdate};
    pub use stratus_core::prelude::*;
}
