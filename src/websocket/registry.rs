//! Live-session registry
//!
//! Arena of live sessions keyed by an opaque [`SessionId`], plus the set of
//! sessions per user. Owned and mutated only by the hub loop.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use super::messages::UserId;
use super::presence::PresenceSnapshot;
use super::queue::OutboundSender;

/// Opaque identifier of one physical connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What the hub keeps per session: identity and the queue write handle
#[derive(Debug)]
pub struct SessionEntry {
    pub user_id: UserId,
    pub queue: OutboundSender,
}

/// Outcome of [`Registry::insert`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Insertion {
    /// The session id was already live; nothing changed
    AlreadyRegistered,
    /// The user had no live session before this one
    FirstForUser,
    /// The user already had other live sessions
    AdditionalForUser,
}

/// A session taken out of the registry
#[derive(Debug)]
pub struct Removal {
    pub entry: SessionEntry,
    /// The user has no live session left
    pub last_for_user: bool,
}

#[derive(Debug, Default)]
pub struct Registry {
    sessions: HashMap<SessionId, SessionEntry>,
    users: BTreeMap<UserId, BTreeSet<SessionId>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: SessionId, entry: SessionEntry) -> Insertion {
        if self.sessions.contains_key(&id) {
            return Insertion::AlreadyRegistered;
        }

        let user_sessions = self.users.entry(entry.user_id).or_default();
        let first = user_sessions.is_empty();
        user_sessions.insert(id);
        self.sessions.insert(id, entry);

        if first {
            Insertion::FirstForUser
        } else {
            Insertion::AdditionalForUser
        }
    }

    /// Remove a session; `None` if it was never registered or already gone
    pub fn remove(&mut self, id: SessionId) -> Option<Removal> {
        let entry = self.sessions.remove(&id)?;

        let mut last_for_user = false;
        if let Some(user_sessions) = self.users.get_mut(&entry.user_id) {
            user_sessions.remove(&id);
            if user_sessions.is_empty() {
                self.users.remove(&entry.user_id);
                last_for_user = true;
            }
        }

        Some(Removal {
            entry,
            last_for_user,
        })
    }

    pub fn get(&self, id: SessionId) -> Option<&SessionEntry> {
        self.sessions.get(&id)
    }

    pub fn contains(&self, id: SessionId) -> bool {
        self.sessions.contains_key(&id)
    }

    /// Live sessions of one user, in id order
    pub fn sessions_of(&self, user_id: UserId) -> Vec<SessionId> {
        self.users
            .get(&user_id)
            .map(|sessions| sessions.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Every live session, grouped by user id
    pub fn all_sessions(&self) -> Vec<SessionId> {
        self.users.values().flatten().copied().collect()
    }

    pub fn session_count(&self, user_id: UserId) -> usize {
        self.users.get(&user_id).map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_online(&self, user_id: UserId) -> bool {
        self.users.contains_key(&user_id)
    }

    pub fn online_user_ids(&self) -> Vec<UserId> {
        self.users.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    /// Take every session out, leaving the registry empty
    pub fn drain(&mut self) -> Vec<(SessionId, SessionEntry)> {
        self.users.clear();
        self.sessions.drain().collect()
    }

    pub fn snapshot(&self) -> PresenceSnapshot {
        PresenceSnapshot::new(
            self.users
                .iter()
                .map(|(user_id, sessions)| (*user_id, sessions.len()))
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::queue::outbound_queue;

    fn entry(user_id: UserId) -> SessionEntry {
        let (queue, _rx) = outbound_queue(4);
        SessionEntry { user_id, queue }
    }

    #[test]
    fn test_insert_and_remove_counts() {
        let mut registry = Registry::new();

        assert_eq!(registry.insert(SessionId::new(1), entry(10)), Insertion::FirstForUser);
        assert_eq!(
            registry.insert(SessionId::new(2), entry(10)),
            Insertion::AdditionalForUser
        );
        assert_eq!(registry.insert(SessionId::new(3), entry(20)), Insertion::FirstForUser);

        assert_eq!(registry.session_count(10), 2);
        assert_eq!(registry.len(), 3);
        assert_eq!(registry.online_user_ids(), vec![10, 20]);

        let removal = registry.remove(SessionId::new(1)).unwrap();
        assert!(!removal.last_for_user);
        assert!(registry.is_online(10));

        let removal = registry.remove(SessionId::new(2)).unwrap();
        assert!(removal.last_for_user);
        assert!(!registry.is_online(10));
        assert_eq!(registry.session_count(10), 0);
    }

    #[test]
    fn test_double_insert_and_double_remove_are_noops() {
        let mut registry = Registry::new();

        registry.insert(SessionId::new(1), entry(10));
        assert_eq!(
            registry.insert(SessionId::new(1), entry(10)),
            Insertion::AlreadyRegistered
        );
        assert_eq!(registry.session_count(10), 1);

        assert!(registry.remove(SessionId::new(1)).is_some());
        assert!(registry.remove(SessionId::new(1)).is_none());
        assert!(registry.remove(SessionId::new(42)).is_none());
        assert!(registry.is_empty());
        assert_eq!(registry.user_count(), 0);
    }

    #[test]
    fn test_counts_match_interleaved_sequence() {
        let mut registry = Registry::new();
        let mut open: HashMap<UserId, usize> = HashMap::new();

        // Deterministic interleaving of registers and unregisters over 5 users
        for step in 0u64..200 {
            let user = (step % 5) as UserId;
            let id = SessionId::new(step % 17);
            if step % 3 == 0 {
                if let Some(removal) = registry.remove(id) {
                    *open.get_mut(&removal.entry.user_id).unwrap() -= 1;
                }
            } else if registry.insert(id, entry(user)) != Insertion::AlreadyRegistered {
                *open.entry(user).or_default() += 1;
            }

            for (user, count) in &open {
                assert_eq!(registry.session_count(*user), *count);
                assert_eq!(registry.is_online(*user), *count > 0);
            }
        }
    }

    #[test]
    fn test_snapshot() {
        let mut registry = Registry::new();
        registry.insert(SessionId::new(1), entry(7));
        registry.insert(SessionId::new(2), entry(7));
        registry.insert(SessionId::new(3), entry(3));

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.online_user_ids(), vec![3, 7]);
        assert_eq!(snapshot.session_count(7), 2);
        assert_eq!(snapshot.total_sessions(), 3);
    }
}
