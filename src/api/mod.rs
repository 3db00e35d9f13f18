//! Courier HTTP API
//!
//! HTTP and WebSocket surface, built with Axum.
//!
//! # Endpoints
//!
//! ## WebSocket
//! - `GET /ws` - Upgrade to a real-time session (identity from the auth header)
//!
//! ## Push
//! - `POST /api/v1/push/users/:user_id` - Deliver a message to one user
//! - `POST /api/v1/push/broadcast` - Deliver a message to everyone
//!
//! ## Presence
//! - `GET /api/v1/presence` - Online users
//! - `GET /api/v1/presence/:user_id` - One user's presence
//!
//! ## Health
//! - `GET /health/live` - Liveness probe
//! - `GET /health/ready` - Readiness probe
//! - `GET /health` - Full health status
//!
//! # Example
//!
//! ```rust,ignore
//! use courier::api::{serve, AppState, AuthConfig, ServerConfig};
//! use courier::websocket::{HubConfig, SessionConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let state = AppState::new(
//!         ServerConfig::default(),
//!         HubConfig::default(),
//!         SessionConfig::default(),
//!         &AuthConfig::default(),
//!     );
//!     serve(state).await?;
//!
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod dto;
pub mod error;
pub mod routes;
pub mod state;

pub use auth::{AuthConfig, AuthError, Authenticator, TrustedHeaderAuthenticator, UpgradeParams};
pub use error::{ApiError, ApiResult};
pub use state::{AppState, ServerConfig};

use axum::{
    http::HeaderValue,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};

use crate::websocket::websocket_handler;

/// Build the router with all routes and middleware
pub fn build_router(state: AppState) -> Router {
    let api_routes = Router::new()
        // Push routes
        .route("/push/users/:user_id", post(routes::push::push_to_user))
        .route("/push/broadcast", post(routes::push::broadcast))
        // Presence routes
        .route("/presence", get(routes::presence::list_online))
        .route("/presence/:user_id", get(routes::presence::user_presence));

    let health_routes = Router::new()
        .route("/live", get(routes::health::liveness))
        .route("/ready", get(routes::health::readiness))
        .route("/", get(routes::health::full_health));

    let cors = cors_layer(&state.config.cors_origins);
    let shared_state = Arc::new(state);

    Router::new()
        .route("/ws", get(websocket_handler))
        .nest("/api/v1", api_routes)
        .nest("/health", health_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(shared_state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.is_empty() {
        return CorsLayer::permissive();
    }

    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(Any)
        .allow_headers(Any)
}

/// Start the server and run until a shutdown signal arrives.
///
/// On shutdown the hub closes every session, then live sessions get the
/// configured grace period to finish before they are force-closed.
pub async fn serve(state: AppState) -> Result<(), ApiError> {
    let config = Arc::clone(&state.config);
    let hub = state.hub.clone();
    let connections = state.connections.clone();
    let router = build_router(state);

    let addr = config.addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Courier listening on {}", addr);

    let shutdown_hub = hub.clone();
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            if let Err(e) = shutdown_hub.shutdown().await {
                tracing::warn!(error = %e, "Hub already stopped");
            }
        })
        .await
        .map_err(|e| ApiError::Internal(format!("Server error: {}", e)))?;

    if connections.drain(config.shutdown_grace()).await {
        tracing::info!("Courier shut down gracefully");
    } else {
        tracing::warn!("Courier shut down with sessions force-closed");
    }
    Ok(())
}

/// Wait for shutdown signal
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, starting graceful shutdown");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::{outbound_queue, HubConfig, SessionConfig};
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use serde_json::Value;
    use tower::util::ServiceExt;

    fn create_test_state(push_token: Option<&str>) -> AppState {
        let auth = AuthConfig {
            push_token: push_token.map(str::to_string),
            ..Default::default()
        };
        AppState::new(
            ServerConfig::default(),
            HubConfig::default(),
            SessionConfig::default(),
            &auth,
        )
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn push_request(uri: &str, body: &'static str, token: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri(uri)
            .header("Content-Type", "application/json");
        if let Some(token) = token {
            builder = builder.header("Authorization", format!("Bearer {}", token));
        }
        builder.body(Body::from(body)).unwrap()
    }

    #[tokio::test]
    async fn test_health_live() {
        let app = build_router(create_test_state(None));

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/health/live")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_health_ready_tracks_hub() {
        let state = create_test_state(None);
        let hub = state.hub.clone();
        let app = build_router(state);

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/health/ready")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        hub.shutdown().await.unwrap();
        // Give the loop a moment to drop its receiver
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/health/ready")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_health_full() {
        let app = build_router(create_test_state(None));

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["sessions"], 0);
    }

    #[tokio::test]
    async fn test_presence_lists_registered_users() {
        let state = create_test_state(None);
        let hub = state.hub.clone();
        let app = build_router(state);

        let (tx, _rx) = outbound_queue(8);
        hub.register(hub.next_session_id(), 5, tx).await.unwrap();
        hub.stats().await.unwrap();

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/api/v1/presence")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["online_user_ids"], serde_json::json!([5]));
        assert_eq!(body["sessions"], 1);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/v1/presence/6")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let body = body_json(response).await;
        assert_eq!(body["online"], false);
    }

    #[tokio::test]
    async fn test_push_to_user_reaches_session() {
        let state = create_test_state(None);
        let hub = state.hub.clone();
        let app = build_router(state);

        let (tx, mut rx) = outbound_queue(8);
        hub.register(hub.next_session_id(), 3, tx).await.unwrap();

        let response = app
            .oneshot(push_request(
                "/api/v1/push/users/3",
                r#"{"type": "comment_added", "data": {"post_id": 9}}"#,
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        hub.stats().await.unwrap();
        let types: Vec<String> = rx.drain().iter().map(|m| m.type_tag().to_string()).collect();
        assert_eq!(types, vec!["online_users", "comment_added"]);
    }

    #[tokio::test]
    async fn test_push_requires_token_when_configured() {
        let app = build_router(create_test_state(Some("secret")));
        let body = r#"{"type": "comment_added", "data": {}}"#;

        let response = app
            .clone()
            .oneshot(push_request("/api/v1/push/broadcast", body, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let json = body_json(response).await;
        assert_eq!(json["error"]["code"], "UNAUTHORIZED");

        let response = app
            .oneshot(push_request("/api/v1/push/broadcast", body, Some("secret")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }

    #[tokio::test]
    async fn test_push_rejects_invalid_payload() {
        let app = build_router(create_test_state(None));

        let response = app
            .oneshot(push_request(
                "/api/v1/push/users/1",
                r#"{"type": "presence", "data": {"user_id": "x"}}"#,
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_push_after_shutdown_is_unavailable() {
        let state = create_test_state(None);
        let hub = state.hub.clone();
        let app = build_router(state);
        hub.shutdown().await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let response = app
            .oneshot(push_request(
                "/api/v1/push/broadcast",
                r#"{"type": "comment_added"}"#,
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_ws_requires_upgrade() {
        let app = build_router(create_test_state(None));

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/ws")
                    .header("x-user-id", "1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert!(response.status().is_client_error());
    }
}
