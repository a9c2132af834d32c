//! # Stratus Session
//!
//! Tracks in-flight provisioning sessions and the ordered event stream of each.

pub mod error;
pub mod manager;
pub mod sink;

pub use error::{Result, SessionError};
pub use manager::{Session, SessionManager};
pub use sink::{CancelHandle, EventSink, Outbound};
