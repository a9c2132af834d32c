//! Health check endpoint.

use axum::{extract::State, Json};
use serde::Serialize;

use crate::state::AppState;

/// Health check response.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub protocol: String,
    pub active_sessions: usize,
}

/// Health check endpoint.
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        protocol: "stratus/1.0".to_string(),
        active_sessions: state.sessions.len().await,
    })
}
