//! Application State
//!
//! Shared state accessible by all API handlers.
//! Wrapped in Arc for thread-safe sharing across async tasks.

use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::auth::{AuthConfig, Authenticator, TrustedHeaderAuthenticator};
use crate::websocket::{ConnectionHub, ConnectionTracker, HubConfig, SessionConfig};

/// Shared application state for all handlers
#[derive(Clone)]
pub struct AppState {
    /// Connection hub routing messages between sessions
    pub hub: ConnectionHub,
    /// Resolves the user behind an upgrade request
    pub authenticator: Arc<dyn Authenticator>,
    /// Limits applied to every new session
    pub session: Arc<SessionConfig>,
    /// Live sessions, drained on shutdown
    pub connections: ConnectionTracker,
    /// Token required on push routes
    pub push_token: Option<String>,
    /// Server configuration
    pub config: Arc<ServerConfig>,
    /// Server start time for uptime tracking
    pub start_time: Instant,
}

impl AppState {
    /// Start a hub and build state with the trusted-header authenticator
    pub fn new(
        config: ServerConfig,
        hub_config: HubConfig,
        session: SessionConfig,
        auth: &AuthConfig,
    ) -> Self {
        Self::with_authenticator(
            config,
            ConnectionHub::start(hub_config),
            session,
            Arc::new(TrustedHeaderAuthenticator::new(auth)),
            auth.push_token.clone(),
        )
    }

    /// Build state around an existing hub and a custom authenticator
    pub fn with_authenticator(
        config: ServerConfig,
        hub: ConnectionHub,
        session: SessionConfig,
        authenticator: Arc<dyn Authenticator>,
        push_token: Option<String>,
    ) -> Self {
        Self {
            hub,
            authenticator,
            session: Arc::new(session),
            connections: ConnectionTracker::new(),
            push_token,
            config: Arc::new(config),
            start_time: Instant::now(),
        }
    }

    /// Get server uptime in seconds
    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Allowed CORS origins; empty allows any
    #[serde(default)]
    pub cors_origins: Vec<String>,

    /// How long shutdown waits for sessions before forcing them closed
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_shutdown_grace() -> u64 {
    5
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origins: Vec::new(),
            shutdown_grace_secs: default_shutdown_grace(),
        }
    }
}

impl ServerConfig {
    /// Get the socket address string
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}
