//! WebSocket Connection Hub
//!
//! A single task owns the session registry and makes every routing decision.
//! Everything else talks to it through [`ConnectionHub`], a cloneable handle
//! that sends commands over one bounded channel. Commands are processed
//! strictly in arrival order, so a session's registration is always seen
//! before anything it dispatches.
//!
//! Enqueueing onto a session never waits: a session whose queue is full is
//! evicted on the spot.

use std::collections::{BTreeSet, VecDeque};
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};

use super::messages::{Message, Payload, PresenceStatus, UserId};
use super::presence::{PresenceSnapshot, PresenceTracker};
use super::queue::{CloseReason, EnqueueError, Outbound, OutboundSender};
use super::registry::{Insertion, Registry, SessionEntry, SessionId};

/// How many concurrent sessions a user may hold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPolicy {
    /// Any number of sessions; deliveries fan out to all of them
    Multiple,
    /// A new session evicts the user's previous ones
    LastConnectWins,
}

/// Configuration for the connection hub
#[derive(Debug, Clone, Deserialize)]
pub struct HubConfig {
    /// Capacity of each session's outbound queue
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Capacity of the hub's command channel
    #[serde(default = "default_command_capacity")]
    pub command_capacity: usize,

    #[serde(default = "default_session_policy")]
    pub session_policy: SessionPolicy,

    /// Copy direct chat messages to the sender's other sessions
    #[serde(default = "default_echo_direct_messages")]
    pub echo_direct_messages: bool,

    /// Domain event types clients may broadcast to everyone else
    #[serde(default = "default_relayed_event_types")]
    pub relayed_event_types: Vec<String>,
}

fn default_queue_capacity() -> usize {
    256
}

fn default_command_capacity() -> usize {
    1024
}

fn default_session_policy() -> SessionPolicy {
    SessionPolicy::Multiple
}

fn default_echo_direct_messages() -> bool {
    true
}

fn default_relayed_event_types() -> Vec<String> {
    [
        "comment_added",
        "comment_updated",
        "comment_deleted",
        "post_reactions_updated",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            command_capacity: default_command_capacity(),
            session_policy: default_session_policy(),
            echo_direct_messages: default_echo_direct_messages(),
            relayed_event_types: default_relayed_event_types(),
        }
    }
}

impl HubConfig {
    fn relays(&self, event: &str) -> bool {
        self.relayed_event_types.iter().any(|t| t == event)
    }
}

/// Counters reported by the hub loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HubStats {
    pub sessions: usize,
    pub users: usize,
}

enum HubCommand {
    Register {
        id: SessionId,
        user_id: UserId,
        queue: OutboundSender,
    },
    Unregister {
        id: SessionId,
    },
    Dispatch {
        origin: SessionId,
        message: Message,
    },
    SendToSession {
        id: SessionId,
        message: Message,
    },
    SendToUser {
        user_id: UserId,
        message: Message,
    },
    Broadcast {
        message: Message,
    },
    Stats {
        reply: oneshot::Sender<HubStats>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Handle to the hub task
#[derive(Clone)]
pub struct ConnectionHub {
    commands: mpsc::Sender<HubCommand>,
    presence: watch::Receiver<Arc<PresenceSnapshot>>,
    next_session: Arc<AtomicU64>,
    config: Arc<HubConfig>,
}

impl ConnectionHub {
    /// Spawn the hub loop on the current tokio runtime
    pub fn start(config: HubConfig) -> Self {
        let config = Arc::new(config);
        let (commands, rx) = mpsc::channel(config.command_capacity.max(1));
        let (presence_tx, presence) = watch::channel(Arc::new(PresenceSnapshot::empty()));

        let hub = HubLoop {
            config: Arc::clone(&config),
            registry: Registry::new(),
            presence: presence_tx,
            presence_dirty: false,
        };
        tokio::spawn(hub.run(rx));

        Self {
            commands,
            presence,
            next_session: Arc::new(AtomicU64::new(1)),
            config,
        }
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// Allocate a fresh session id
    pub fn next_session_id(&self) -> SessionId {
        SessionId::new(self.next_session.fetch_add(1, Ordering::Relaxed))
    }

    /// Register an authenticated session. Registering a live id again is a no-op.
    pub async fn register(
        &self,
        id: SessionId,
        user_id: UserId,
        queue: OutboundSender,
    ) -> Result<(), HubError> {
        self.send(HubCommand::Register { id, user_id, queue }).await
    }

    /// Remove a session. Unknown ids are ignored.
    pub async fn unregister(&self, id: SessionId) -> Result<(), HubError> {
        self.send(HubCommand::Unregister { id }).await
    }

    /// Route a message received from a live session
    pub async fn dispatch(&self, origin: SessionId, message: Message) -> Result<(), HubError> {
        self.send(HubCommand::Dispatch { origin, message }).await
    }

    /// Deliver to one session only
    pub async fn send_to_session(&self, id: SessionId, message: Message) -> Result<(), HubError> {
        self.send(HubCommand::SendToSession { id, message }).await
    }

    /// Deliver to every live session of a user; dropped if the user is offline
    pub async fn send_to_user(&self, user_id: UserId, message: Message) -> Result<(), HubError> {
        self.send(HubCommand::SendToUser { user_id, message }).await
    }

    /// Deliver to every live session
    pub async fn broadcast(&self, message: Message) -> Result<(), HubError> {
        self.send(HubCommand::Broadcast { message }).await
    }

    /// Round trip through the loop; everything sent before has been processed on return
    pub async fn stats(&self) -> Result<HubStats, HubError> {
        let (reply, rx) = oneshot::channel();
        self.send(HubCommand::Stats { reply }).await?;
        rx.await.map_err(|_| HubError::Closed)
    }

    /// Close every session queue and stop the loop
    pub async fn shutdown(&self) -> Result<(), HubError> {
        let (reply, rx) = oneshot::channel();
        self.send(HubCommand::Shutdown { reply }).await?;
        rx.await.map_err(|_| HubError::Closed)
    }

    pub fn presence(&self) -> PresenceTracker {
        PresenceTracker::new(self.presence.clone())
    }

    pub fn is_online(&self, user_id: UserId) -> bool {
        self.presence.borrow().is_online(user_id)
    }

    pub fn online_user_ids(&self) -> Vec<UserId> {
        self.presence.borrow().online_user_ids()
    }

    pub fn is_running(&self) -> bool {
        !self.commands.is_closed()
    }

    async fn send(&self, command: HubCommand) -> Result<(), HubError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| HubError::Closed)
    }
}

/// Errors reaching the hub
#[derive(Debug, Error)]
pub enum HubError {
    #[error("Connection hub is not running")]
    Closed,
}

/// Why a dispatched message could not be routed
#[derive(Debug, Error)]
enum RoutingError {
    #[error("Session {0} is not registered")]
    UnknownSession(SessionId),

    #[error("Message type '{0}' requires receiver_id")]
    MissingReceiver(&'static str),

    #[error("Message type '{0}' cannot be sent by clients")]
    ServerOnly(String),

    #[error("Presence for user {claimed} cannot be sent by user {sender}")]
    ForeignPresence { sender: UserId, claimed: UserId },

    #[error("Unknown message type '{0}'")]
    UnknownType(String),
}

/// A pending removal; `None` means the session itself asked to leave
type Eviction = (SessionId, Option<CloseReason>);

struct HubLoop {
    config: Arc<HubConfig>,
    registry: Registry,
    presence: watch::Sender<Arc<PresenceSnapshot>>,
    presence_dirty: bool,
}

impl HubLoop {
    async fn run(mut self, mut commands: mpsc::Receiver<HubCommand>) {
        tracing::info!("Connection hub started");

        while let Some(command) = commands.recv().await {
            let flow = self.handle(command);
            self.publish_presence();
            if flow.is_break() {
                tracing::info!("Connection hub stopped");
                return;
            }
        }

        // Reached when every handle is dropped without an explicit shutdown
        self.close_all(CloseReason::ServerShutdown);
        tracing::info!("Connection hub stopped");
    }

    fn handle(&mut self, command: HubCommand) -> ControlFlow<()> {
        match command {
            HubCommand::Register { id, user_id, queue } => self.register(id, user_id, queue),
            HubCommand::Unregister { id } => self.evict_all(vec![(id, None)]),
            HubCommand::Dispatch { origin, message } => {
                if let Err(e) = self.dispatch(origin, message) {
                    self.reject(origin, e);
                }
            }
            HubCommand::SendToSession { id, message } => {
                self.deliver(vec![id], &Arc::new(message));
            }
            HubCommand::SendToUser { user_id, message } => self.send_to_user(user_id, message),
            HubCommand::Broadcast { message } => {
                let targets = self.registry.all_sessions();
                self.deliver(targets, &Arc::new(message));
            }
            HubCommand::Stats { reply } => {
                let _ = reply.send(HubStats {
                    sessions: self.registry.len(),
                    users: self.registry.user_count(),
                });
            }
            HubCommand::Shutdown { reply } => {
                self.close_all(CloseReason::ServerShutdown);
                let _ = reply.send(());
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    fn register(&mut self, id: SessionId, user_id: UserId, queue: OutboundSender) {
        let was_online = self.registry.is_online(user_id);

        if self.registry.contains(id) {
            tracing::debug!(session_id = %id, user_id, "Session already registered");
            return;
        }

        if self.config.session_policy == SessionPolicy::LastConnectWins {
            for previous in self.registry.sessions_of(user_id) {
                if let Some(removal) = self.registry.remove(previous) {
                    tracing::info!(session_id = %previous, user_id, "Session replaced");
                    removal.entry.queue.close(CloseReason::Replaced);
                }
            }
        }

        let insertion = self.registry.insert(id, SessionEntry { user_id, queue });
        self.presence_dirty = true;

        tracing::info!(
            session_id = %id,
            user_id,
            user_sessions = self.registry.session_count(user_id),
            total_sessions = self.registry.len(),
            "Session registered"
        );

        let mut failures = Vec::new();

        if insertion == Insertion::FirstForUser && !was_online {
            let online = Arc::new(Message::presence(user_id, PresenceStatus::Online));
            let others: Vec<_> = self
                .registry
                .all_sessions()
                .into_iter()
                .filter(|s| *s != id)
                .collect();
            failures.extend(self.enqueue(others, &online));
        }

        let roster: Vec<UserId> = self
            .registry
            .online_user_ids()
            .into_iter()
            .filter(|u| *u != user_id)
            .collect();
        failures.extend(self.enqueue(vec![id], &Arc::new(Message::roster(roster))));

        self.evict_all(failures);
    }

    fn dispatch(&mut self, origin: SessionId, message: Message) -> Result<(), RoutingError> {
        let origin_user = self
            .registry
            .get(origin)
            .map(|entry| entry.user_id)
            .ok_or(RoutingError::UnknownSession(origin))?;

        let targets = match message.payload() {
            Payload::Chat(_) => {
                let receiver = message
                    .receiver_id()
                    .ok_or(RoutingError::MissingReceiver("chat"))?;
                let mut targets: BTreeSet<SessionId> =
                    self.registry.sessions_of(receiver).into_iter().collect();
                if self.config.echo_direct_messages {
                    targets.extend(self.registry.sessions_of(origin_user));
                }
                targets.remove(&origin);
                if self.registry.session_count(receiver) == 0 {
                    tracing::debug!(sender = origin_user, receiver, "Receiver offline, chat not delivered live");
                }
                targets.into_iter().collect()
            }
            Payload::Typing(_) => match message.receiver_id() {
                Some(receiver) => self.registry.sessions_of(receiver),
                None => self.all_except(origin),
            },
            Payload::Ping => {
                self.deliver(vec![origin], &Arc::new(Message::pong()));
                return Ok(());
            }
            Payload::Pong => return Ok(()),
            Payload::Presence(p) if p.user_id == origin_user => self.all_except(origin),
            Payload::Presence(p) => {
                return Err(RoutingError::ForeignPresence {
                    sender: origin_user,
                    claimed: p.user_id,
                })
            }
            Payload::Event { name, .. } if self.config.relays(name) => self.all_except(origin),
            Payload::Event { name, .. } => return Err(RoutingError::UnknownType(name.clone())),
            Payload::Roster(_) | Payload::Error(_) => {
                return Err(RoutingError::ServerOnly(message.type_tag().to_string()))
            }
        };

        tracing::trace!(
            session_id = %origin,
            message_type = message.type_tag(),
            targets = targets.len(),
            "Dispatching message"
        );
        self.deliver(targets, &Arc::new(message));
        Ok(())
    }

    /// Log a routing failure and tell the originating session, if it is still live
    fn reject(&mut self, origin: SessionId, error: RoutingError) {
        match error {
            RoutingError::UnknownSession(_) => {
                tracing::debug!(session_id = %origin, error = %error, "Dropped message");
            }
            _ => {
                tracing::warn!(session_id = %origin, error = %error, "Protocol error, message dropped");
                self.deliver(vec![origin], &Arc::new(Message::error(error.to_string())));
            }
        }
    }

    fn send_to_user(&mut self, user_id: UserId, message: Message) {
        let targets = self.registry.sessions_of(user_id);
        if targets.is_empty() {
            tracing::debug!(
                user_id,
                message_type = message.type_tag(),
                "User offline, message dropped"
            );
            return;
        }
        self.deliver(targets, &Arc::new(message));
    }

    fn all_except(&self, origin: SessionId) -> Vec<SessionId> {
        self.registry
            .all_sessions()
            .into_iter()
            .filter(|s| *s != origin)
            .collect()
    }

    /// Enqueue onto each target, evicting any that cannot take it
    fn deliver(&mut self, targets: Vec<SessionId>, message: &Outbound) {
        let failures = self.enqueue(targets, message);
        self.evict_all(failures);
    }

    /// Enqueue onto each target without touching the registry; returns the failures
    fn enqueue(&self, targets: Vec<SessionId>, message: &Outbound) -> Vec<Eviction> {
        let mut failures = Vec::new();
        for id in targets {
            let Some(entry) = self.registry.get(id) else {
                continue;
            };
            match entry.queue.try_enqueue(Arc::clone(message)) {
                Ok(()) => {}
                Err(EnqueueError::Full) => failures.push((id, Some(CloseReason::QueueOverflow))),
                // The session is already on its way out
                Err(EnqueueError::Closed) => failures.push((id, None)),
            }
        }
        failures
    }

    /// Remove sessions, broadcasting offline presence for users who lose their last one.
    ///
    /// Broadcasting presence can overflow further queues; those join the worklist.
    fn evict_all(&mut self, evictions: Vec<Eviction>) {
        let mut pending: VecDeque<Eviction> = evictions.into();

        while let Some((id, reason)) = pending.pop_front() {
            let Some(removal) = self.registry.remove(id) else {
                continue;
            };
            self.presence_dirty = true;
            let user_id = removal.entry.user_id;

            match reason {
                Some(reason) => {
                    tracing::warn!(session_id = %id, user_id, reason = %reason, "Evicting session");
                    removal.entry.queue.close(reason);
                }
                None => {
                    tracing::info!(session_id = %id, user_id, "Session unregistered");
                }
            }

            if removal.last_for_user {
                let offline = Arc::new(Message::presence(user_id, PresenceStatus::Offline));
                let everyone = self.registry.all_sessions();
                pending.extend(self.enqueue(everyone, &offline));
            }
        }
    }

    fn close_all(&mut self, reason: CloseReason) {
        let sessions = self.registry.drain();
        if !sessions.is_empty() {
            tracing::info!(sessions = sessions.len(), reason = %reason, "Closing all sessions");
        }
        for (_, entry) in sessions {
            entry.queue.close(reason);
        }
        self.presence_dirty = true;
        self.publish_presence();
    }

    fn publish_presence(&mut self) {
        if self.presence_dirty {
            self.presence_dirty = false;
            self.presence.send_replace(Arc::new(self.registry.snapshot()));
        }
    }
}
