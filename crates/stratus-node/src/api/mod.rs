//! HTTP and WebSocket endpoints.

pub mod health;
pub mod sessions;
pub mod ws;
