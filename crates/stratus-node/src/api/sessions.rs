//! Session API endpoints.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use stratus_session::Session;

use crate::state::AppState;

/// List live sessions, oldest first.
pub async fn list_sessions(State(state): State<AppState>) -> Json<Vec<Session>> {
    Json(state.sessions.list().await)
}

/// Get a live session by id.
pub async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Session>, (StatusCode, String)> {
    state
        .sessions
        .get(&id)
        .await
        .map(Json)
        .ok_or_else(|| (StatusCode::NOT_FOUND, format!("Session {} not found", id)))
}

/// Cancel a live session.
///
/// Best effort: management calls that already went through are not undone.
pub async fn cancel_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, (StatusCode, String)> {
    state
        .sessions
        .cancel(&id)
        .await
        .map(|_| StatusCode::NO_CONTENT)
        .map_err(|e| (StatusCode::NOT_FOUND, e.to_string()))
}
