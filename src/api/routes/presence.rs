//! Presence Routes
//!
//! Read-only views of who is connected, served from the latest published
//! snapshot without going through the hub loop.
//!
//! - GET /api/v1/presence - All online users
//! - GET /api/v1/presence/:user_id - One user

use axum::{
    extract::{Path, State},
    Json,
};
use std::sync::Arc;

use crate::api::dto::{PresenceResponse, UserPresenceResponse};
use crate::api::state::AppState;
use crate::websocket::UserId;

/// GET /api/v1/presence
pub async fn list_online(State(state): State<Arc<AppState>>) -> Json<PresenceResponse> {
    let snapshot = state.hub.presence().snapshot();

    Json(PresenceResponse {
        online_user_ids: snapshot.online_user_ids(),
        sessions: snapshot.total_sessions(),
        as_of: snapshot.taken_at(),
    })
}

/// GET /api/v1/presence/:user_id
pub async fn user_presence(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<UserId>,
) -> Json<UserPresenceResponse> {
    let snapshot = state.hub.presence().snapshot();

    Json(UserPresenceResponse {
        user_id,
        online: snapshot.is_online(user_id),
        sessions: snapshot.session_count(user_id),
    })
}
