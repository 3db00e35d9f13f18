//! Presence Tracking
//!
//! Presence is derived from the registry: a user is online while at least one
//! of their sessions is registered. The hub loop publishes an immutable
//! [`PresenceSnapshot`] over a `watch` channel after every registry change, so
//! readers never go through the loop and never see a half-applied update.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;

use super::messages::UserId;

/// Point-in-time view of who is online
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PresenceSnapshot {
    sessions_by_user: BTreeMap<UserId, usize>,
    taken_at: DateTime<Utc>,
}

impl PresenceSnapshot {
    pub fn new(sessions_by_user: BTreeMap<UserId, usize>) -> Self {
        Self {
            sessions_by_user,
            taken_at: Utc::now(),
        }
    }

    pub fn empty() -> Self {
        Self::new(BTreeMap::new())
    }

    pub fn is_online(&self, user_id: UserId) -> bool {
        self.sessions_by_user.contains_key(&user_id)
    }

    /// Online users in ascending id order
    pub fn online_user_ids(&self) -> Vec<UserId> {
        self.sessions_by_user.keys().copied().collect()
    }

    pub fn session_count(&self, user_id: UserId) -> usize {
        self.sessions_by_user.get(&user_id).copied().unwrap_or(0)
    }

    pub fn total_sessions(&self) -> usize {
        self.sessions_by_user.values().sum()
    }

    pub fn user_count(&self) -> usize {
        self.sessions_by_user.len()
    }

    pub fn taken_at(&self) -> DateTime<Utc> {
        self.taken_at
    }
}

/// Read side of the published presence view
#[derive(Debug, Clone)]
pub struct PresenceTracker {
    rx: watch::Receiver<Arc<PresenceSnapshot>>,
}

impl PresenceTracker {
    pub(crate) fn new(rx: watch::Receiver<Arc<PresenceSnapshot>>) -> Self {
        Self { rx }
    }

    /// Latest published snapshot
    pub fn snapshot(&self) -> Arc<PresenceSnapshot> {
        Arc::clone(&self.rx.borrow())
    }

    pub fn is_online(&self, user_id: UserId) -> bool {
        self.rx.borrow().is_online(user_id)
    }

    pub fn online_user_ids(&self) -> Vec<UserId> {
        self.rx.borrow().online_user_ids()
    }

    /// Wait for the next published snapshot.
    ///
    /// Returns `None` once the hub has stopped.
    pub async fn changed(&mut self) -> Option<Arc<PresenceSnapshot>> {
        self.rx.changed().await.ok()?;
        Some(Arc::clone(&self.rx.borrow_and_update()))
    }
}
