//! Data Transfer Objects
//!
//! Request and response types for the API endpoints.
//! These types are serialized/deserialized to/from JSON.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::websocket::UserId;

// ============================================
// PUSH DTOs
// ============================================

/// Server-originated message pushed to users
#[derive(Debug, Deserialize)]
pub struct PushRequest {
    /// Message type tag, e.g. `comment_added`
    #[serde(rename = "type")]
    pub kind: String,
    /// Type-specific payload
    #[serde(default)]
    pub data: Value,
}

/// Push accepted by the hub
#[derive(Debug, Serialize)]
pub struct PushResponse {
    /// Status: "accepted"
    pub status: String,
    /// Message type that was queued
    #[serde(rename = "type")]
    pub kind: String,
    /// Target user, absent for broadcasts
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<UserId>,
}

// ============================================
// PRESENCE DTOs
// ============================================

/// Everyone currently online
#[derive(Debug, Serialize, Deserialize)]
pub struct PresenceResponse {
    /// Online user ids, ascending
    pub online_user_ids: Vec<UserId>,
    /// Live sessions across all users
    pub sessions: usize,
    /// When the snapshot was published
    pub as_of: DateTime<Utc>,
}

/// Presence of a single user
#[derive(Debug, Serialize, Deserialize)]
pub struct UserPresenceResponse {
    pub user_id: UserId,
    pub online: bool,
    pub sessions: usize,
}

// ============================================
// HEALTH DTOs
// ============================================

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Overall status: "healthy" or "unhealthy"
    pub status: String,
    /// Hub status: "ok" or "stopped"
    pub hub: String,
    /// Live sessions
    pub sessions: usize,
    /// Online users
    pub users: usize,
    /// Server uptime in seconds
    pub uptime_seconds: u64,
    /// Server version
    pub version: String,
}
