//! Connection Authentication
//!
//! Identity is established before a session exists. The gateway asks an
//! [`Authenticator`] for the user id behind an upgrade request; token
//! validation itself happens upstream (a reverse proxy or auth middleware),
//! which forwards the verified id in a trusted header.

use async_trait::async_trait;
use axum::http::{header, HeaderMap};
use serde::Deserialize;
use thiserror::Error;

use crate::websocket::UserId;

/// Authentication settings
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Header carrying the verified user id
    #[serde(default = "default_user_header")]
    pub user_header: String,

    /// Also accept `?user_id=` on the upgrade URL (browsers cannot set headers)
    #[serde(default)]
    pub allow_query_user_id: bool,

    /// Bearer token required on push routes; push is open when unset
    #[serde(default)]
    pub push_token: Option<String>,
}

fn default_user_header() -> String {
    "x-user-id".to_string()
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            user_header: default_user_header(),
            allow_query_user_id: false,
            push_token: None,
        }
    }
}

/// Authentication failures
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("Missing user identity")]
    MissingIdentity,

    #[error("Invalid user id '{0}'")]
    InvalidUserId(String),

    #[error("Missing or invalid bearer token")]
    InvalidToken,
}

/// Query parameters accepted on the upgrade URL
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpgradeParams {
    pub user_id: Option<String>,
}

/// Resolves the user behind an upgrade request
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(
        &self,
        headers: &HeaderMap,
        params: &UpgradeParams,
    ) -> Result<UserId, AuthError>;
}

/// Trusts a header set by an upstream proxy
#[derive(Debug, Clone)]
pub struct TrustedHeaderAuthenticator {
    header: String,
    allow_query: bool,
}

impl TrustedHeaderAuthenticator {
    pub fn new(config: &AuthConfig) -> Self {
        Self {
            header: config.user_header.to_ascii_lowercase(),
            allow_query: config.allow_query_user_id,
        }
    }
}

#[async_trait]
impl Authenticator for TrustedHeaderAuthenticator {
    async fn authenticate(
        &self,
        headers: &HeaderMap,
        params: &UpgradeParams,
    ) -> Result<UserId, AuthError> {
        let raw = match headers.get(self.header.as_str()) {
            Some(value) => value
                .to_str()
                .map_err(|_| AuthError::InvalidUserId("<non-ascii>".to_string()))?,
            None if self.allow_query => params
                .user_id
                .as_deref()
                .ok_or(AuthError::MissingIdentity)?,
            None => return Err(AuthError::MissingIdentity),
        };

        parse_user_id(raw)
    }
}

fn parse_user_id(raw: &str) -> Result<UserId, AuthError> {
    match raw.trim().parse::<UserId>() {
        Ok(id) if id > 0 => Ok(id),
        _ => Err(AuthError::InvalidUserId(raw.to_string())),
    }
}

/// Check `Authorization: Bearer <token>` against the configured push token
pub fn verify_push_token(expected: Option<&str>, headers: &HeaderMap) -> Result<(), AuthError> {
    let Some(expected) = expected else {
        return Ok(());
    };

    let provided = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or(AuthError::InvalidToken)?;

    if constant_time_eq(provided.trim().as_bytes(), expected.as_bytes()) {
        Ok(())
    } else {
        Err(AuthError::InvalidToken)
    }
}

/// Compare without short-circuiting on the first differing byte
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
