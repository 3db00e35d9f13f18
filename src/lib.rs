//! # Courier
//!
//! Real-time connection hub: authenticated WebSocket clients exchange direct
//! chat messages, typing indicators and presence events, and the rest of the
//! backend pushes domain events to them over HTTP.
//!
//! ## Features
//!
//! - **Single-owner routing**: one hub task owns all session state
//! - **Backpressure**: slow clients are evicted instead of stalling others
//! - **Presence**: online status derived from live sessions, readable lock-free
//! - **Multi-device**: any number of sessions per user
//!
//! ## Modules
//!
//! - [`websocket`]: Hub, sessions, presence and the wire format
//! - [`api`]: HTTP server with Axum (WebSocket gateway, push, presence, health)
//! - [`config`]: TOML configuration with environment overrides
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use courier::websocket::{outbound_queue, ConnectionHub, HubConfig, Message};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let hub = ConnectionHub::start(HubConfig::default());
//!
//!     // Register a session and push to its user
//!     let (tx, mut rx) = outbound_queue(hub.config().queue_capacity);
//!     hub.register(hub.next_session_id(), 42, tx).await?;
//!     hub.send_to_user(42, Message::event("comment_added", serde_json::json!({"post_id": 1})))
//!         .await?;
//!
//!     while let Some(message) = rx.recv().await {
//!         println!("{}", message.to_json()?);
//!     }
//!
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod config;
pub mod websocket;

// Re-export top-level types for convenience
pub use api::{build_router, serve, ApiError, AppState, AuthConfig, Authenticator, ServerConfig};

pub use websocket::{
    websocket_handler, ClientSession, CloseReason, ConnectionHub, ConnectionTracker, HubConfig,
    HubError, HubStats, Message, Payload, PresenceSnapshot, PresenceTracker, SessionConfig,
    SessionId, SessionPolicy, UserId,
};

pub use config::{Config, ConfigError, LogFormat, LoggingConfig};
