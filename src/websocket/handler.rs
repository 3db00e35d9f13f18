//! WebSocket Handler
//!
//! Authenticates upgrade requests and hands accepted connections to a
//! [`ClientSession`]. Unauthenticated requests are rejected with `401` before
//! any session state exists.

use axum::{
    extract::{ws::WebSocketUpgrade, Query, State},
    http::HeaderMap,
    response::Response,
};
use futures_util::StreamExt;
use std::sync::Arc;

use super::session::ClientSession;
use crate::api::auth::UpgradeParams;
use crate::api::{ApiResult, AppState};

/// WebSocket upgrade handler
///
/// This is the entry point for WebSocket connections.
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<UpgradeParams>,
) -> ApiResult<Response> {
    let user_id = state.authenticator.authenticate(&headers, &params).await?;

    let session = ClientSession::new(state.hub.clone(), user_id, Arc::clone(&state.session));
    let guard = state.connections.track();

    tracing::debug!(session_id = %session.id(), user_id, "Upgrading connection");

    Ok(ws
        .max_message_size(state.session.max_frame_bytes)
        .on_failed_upgrade(move |e| {
            tracing::debug!(user_id, error = %e, "WebSocket upgrade failed");
        })
        .on_upgrade(move |socket| async move {
            let (sink, stream) = socket.split();
            session.run(stream, sink, guard).await;
        }))
}
