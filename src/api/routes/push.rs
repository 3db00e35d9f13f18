//! Push Routes
//!
//! Server-side producers (the rest of the backend) push messages to
//! connected users through the hub.
//!
//! - POST /api/v1/push/users/:user_id - Deliver to every session of one user
//! - POST /api/v1/push/broadcast - Deliver to every session

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use std::sync::Arc;

use crate::api::auth::verify_push_token;
use crate::api::dto::{PushRequest, PushResponse};
use crate::api::error::{ApiError, ApiResult};
use crate::api::state::AppState;
use crate::websocket::{Message, Payload, UserId};

/// POST /api/v1/push/users/:user_id
///
/// Dropped silently when the user is offline; there is no persistence.
pub async fn push_to_user(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<UserId>,
    headers: HeaderMap,
    Json(request): Json<PushRequest>,
) -> ApiResult<(StatusCode, Json<PushResponse>)> {
    verify_push_token(state.push_token.as_deref(), &headers)?;

    if user_id <= 0 {
        return Err(ApiError::Validation(format!("Invalid user id {}", user_id)));
    }

    let message = build_message(&request)?.with_receiver(user_id);
    state.hub.send_to_user(user_id, message).await?;

    tracing::debug!(user_id, message_type = %request.kind, "Pushed message to user");

    Ok((
        StatusCode::ACCEPTED,
        Json(PushResponse {
            status: "accepted".to_string(),
            kind: request.kind,
            user_id: Some(user_id),
        }),
    ))
}

/// POST /api/v1/push/broadcast
pub async fn broadcast(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<PushRequest>,
) -> ApiResult<(StatusCode, Json<PushResponse>)> {
    verify_push_token(state.push_token.as_deref(), &headers)?;

    let message = build_message(&request)?;
    state.hub.broadcast(message).await?;

    tracing::debug!(message_type = %request.kind, "Broadcast message");

    Ok((
        StatusCode::ACCEPTED,
        Json(PushResponse {
            status: "accepted".to_string(),
            kind: request.kind,
            user_id: None,
        }),
    ))
}

fn build_message(request: &PushRequest) -> Result<Message, ApiError> {
    let payload = Payload::decode(&request.kind, request.data.clone())?;
    if matches!(payload, Payload::Ping | Payload::Pong) {
        return Err(ApiError::Validation(format!(
            "Message type '{}' cannot be pushed",
            request.kind
        )));
    }
    Ok(Message::new(payload))
}
