//! Client Session
//!
//! One authenticated connection, driven by two tasks:
//!
//! - **Read pump**: reads frames under an idle deadline, decodes them and
//!   hands them to the hub. Malformed frames get an error reply; transport
//!   failures end the session.
//! - **Write pump**: drains the outbound queue onto the socket and sends a
//!   heartbeat ping on a fixed interval. Every write has a deadline. When the
//!   hub closes the queue it sends a close frame and exits.
//!
//! Whichever pump finishes first takes the other down with it, and the session
//! unregisters from the hub exactly once after both are gone.

use std::borrow::Cow;
use std::error::Error as StdError;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message as WsMessage};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::{watch, Notify};
use tokio::time::{interval_at, timeout, Instant, MissedTickBehavior};

use super::hub::ConnectionHub;
use super::messages::{InboundFrame, Message, UserId};
use super::queue::{outbound_queue, CloseReason, OutboundReceiver};
use super::registry::SessionId;

type BoxError = Box<dyn StdError + Send + Sync>;

/// Per-connection timing and size limits
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Idle time after which a silent peer is dropped
    #[serde(default = "default_read_timeout")]
    pub read_timeout_ms: u64,

    /// Deadline for each outbound write
    #[serde(default = "default_write_timeout")]
    pub write_timeout_ms: u64,

    /// Heartbeat period; must be shorter than the read timeout
    #[serde(default = "default_ping_interval")]
    pub ping_interval_ms: u64,

    /// Largest inbound frame accepted
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
}

fn default_read_timeout() -> u64 {
    60_000
}

fn default_write_timeout() -> u64 {
    10_000
}

fn default_ping_interval() -> u64 {
    // 9/10 of the read timeout
    54_000
}

fn default_max_frame_bytes() -> usize {
    512
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            read_timeout_ms: default_read_timeout(),
            write_timeout_ms: default_write_timeout(),
            ping_interval_ms: default_ping_interval(),
            max_frame_bytes: default_max_frame_bytes(),
        }
    }
}

impl SessionConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }
}

/// Why a pump stopped
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("No frame received within the read timeout")]
    ReadTimeout,

    #[error("Connection stream ended")]
    StreamEnded,

    #[error("Peer closed the connection")]
    PeerClosed,

    #[error("Read failed: {0}")]
    Read(#[source] BoxError),

    #[error("Frame of {size} bytes exceeds limit of {limit}")]
    FrameTooLarge { size: usize, limit: usize },

    #[error("Write deadline exceeded")]
    WriteTimeout,

    #[error("Write failed: {0}")]
    Write(#[source] BoxError),

    #[error("Connection hub is not running")]
    HubClosed,
}

/// A registered connection, ready to pump frames
pub struct ClientSession {
    id: SessionId,
    user_id: UserId,
    hub: ConnectionHub,
    config: Arc<SessionConfig>,
}

impl ClientSession {
    pub fn new(hub: ConnectionHub, user_id: UserId, config: Arc<SessionConfig>) -> Self {
        Self {
            id: hub.next_session_id(),
            user_id,
            hub,
            config,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Register with the hub and pump frames until the connection ends
    pub async fn run<S, K, E>(self, stream: S, sink: K, mut guard: ConnectionGuard) -> CloseReason
    where
        S: Stream<Item = Result<WsMessage, E>> + Unpin + Send + 'static,
        E: StdError + Send + Sync + 'static,
        K: Sink<WsMessage> + Unpin + Send + 'static,
        K::Error: StdError + Send + Sync + 'static,
    {
        let Self {
            id,
            user_id,
            hub,
            config,
        } = self;

        let (queue_tx, queue_rx) = outbound_queue(hub.config().queue_capacity);
        if hub.register(id, user_id, queue_tx).await.is_err() {
            tracing::warn!(session_id = %id, user_id, "Hub stopped before session could register");
            return CloseReason::ServerShutdown;
        }

        let mut read_task = tokio::spawn(read_pump(
            id,
            user_id,
            hub.clone(),
            stream,
            Arc::clone(&config),
        ));
        let mut write_task = tokio::spawn(write_pump(id, queue_rx, sink, Arc::clone(&config)));

        let reason = tokio::select! {
            result = &mut read_task => {
                write_task.abort();
                match result {
                    Ok(e) => tracing::debug!(session_id = %id, user_id, error = %e, "Read pump stopped"),
                    Err(e) => tracing::error!(session_id = %id, user_id, error = %e, "Read pump panicked"),
                }
                CloseReason::ReadFailed
            }
            result = &mut write_task => {
                read_task.abort();
                match result {
                    Ok(Ok(reason)) => reason,
                    Ok(Err(e)) => {
                        tracing::debug!(session_id = %id, user_id, error = %e, "Write pump stopped");
                        CloseReason::WriteFailed
                    }
                    Err(e) => {
                        tracing::error!(session_id = %id, user_id, error = %e, "Write pump panicked");
                        CloseReason::WriteFailed
                    }
                }
            }
            _ = guard.force_closed() => {
                read_task.abort();
                write_task.abort();
                CloseReason::ServerShutdown
            }
        };

        // Already gone if the hub evicted us; unregistering again is a no-op
        let _ = hub.unregister(id).await;
        tracing::info!(session_id = %id, user_id, reason = %reason, "Session closed");

        reason
    }
}

/// Read frames and forward them to the hub until the connection fails
pub(crate) async fn read_pump<S, E>(
    id: SessionId,
    user_id: UserId,
    hub: ConnectionHub,
    mut stream: S,
    config: Arc<SessionConfig>,
) -> SessionError
where
    S: Stream<Item = Result<WsMessage, E>> + Unpin,
    E: StdError + Send + Sync + 'static,
{
    let limit = config.max_frame_bytes;

    loop {
        let frame = match timeout(config.read_timeout(), stream.next()).await {
            Err(_) => return SessionError::ReadTimeout,
            Ok(None) => return SessionError::StreamEnded,
            Ok(Some(Err(e))) => return SessionError::Read(Box::new(e)),
            Ok(Some(Ok(frame))) => frame,
        };

        let reply = match frame {
            WsMessage::Text(text) => {
                if text.len() > limit {
                    return SessionError::FrameTooLarge {
                        size: text.len(),
                        limit,
                    };
                }
                match InboundFrame::decode(&text) {
                    Ok(inbound) => {
                        if hub.dispatch(id, inbound.into_message(user_id)).await.is_err() {
                            return SessionError::HubClosed;
                        }
                        None
                    }
                    Err(e) => {
                        tracing::debug!(session_id = %id, user_id, error = %e, "Invalid frame");
                        Some(format!("Invalid message: {}", e))
                    }
                }
            }
            WsMessage::Binary(data) => {
                if data.len() > limit {
                    return SessionError::FrameTooLarge {
                        size: data.len(),
                        limit,
                    };
                }
                Some("Binary frames are not supported".to_string())
            }
            // The transport answers pings; either way the peer is alive
            WsMessage::Ping(_) | WsMessage::Pong(_) => None,
            WsMessage::Close(_) => return SessionError::PeerClosed,
        };

        if let Some(error) = reply {
            if hub.send_to_session(id, Message::error(error)).await.is_err() {
                return SessionError::HubClosed;
            }
        }
    }
}

/// Drain the outbound queue onto the socket, interleaving heartbeats.
///
/// Returns the hub's close reason once the queue is closed.
pub(crate) async fn write_pump<K>(
    id: SessionId,
    mut queue: OutboundReceiver,
    mut sink: K,
    config: Arc<SessionConfig>,
) -> Result<CloseReason, SessionError>
where
    K: Sink<WsMessage> + Unpin,
    K::Error: StdError + Send + Sync + 'static,
{
    let deadline = config.write_timeout();
    let period = config.ping_interval();
    let mut heartbeat = interval_at(Instant::now() + period, period);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            next = queue.recv() => match next {
                Some(message) => {
                    let text = match message.to_json() {
                        Ok(text) => text,
                        Err(e) => {
                            tracing::error!(session_id = %id, error = %e, "Failed to serialize message");
                            continue;
                        }
                    };
                    write_frame(&mut sink, WsMessage::Text(text), deadline).await?;
                }
                None => {
                    let reason = queue.close_reason().unwrap_or(CloseReason::ServerShutdown);
                    let (code, text) = reason.close_code();
                    let frame = WsMessage::Close(Some(CloseFrame {
                        code,
                        reason: Cow::Borrowed(text),
                    }));
                    if let Err(e) = write_frame(&mut sink, frame, deadline).await {
                        tracing::debug!(session_id = %id, error = %e, "Failed to send close frame");
                    }
                    return Ok(reason);
                }
            },
            _ = heartbeat.tick() => {
                write_frame(&mut sink, WsMessage::Ping(Vec::new()), deadline).await?;
            }
        }
    }
}

async fn write_frame<K>(sink: &mut K, frame: WsMessage, deadline: Duration) -> Result<(), SessionError>
where
    K: Sink<WsMessage> + Unpin,
    K::Error: StdError + Send + Sync + 'static,
{
    match timeout(deadline, sink.send(frame)).await {
        Err(_) => Err(SessionError::WriteTimeout),
        Ok(Err(e)) => Err(SessionError::Write(Box::new(e))),
        Ok(Ok(())) => Ok(()),
    }
}

/// Counts live sessions so shutdown can wait for them
#[derive(Debug, Clone)]
pub struct ConnectionTracker {
    inner: Arc<TrackerInner>,
}

#[derive(Debug)]
struct TrackerInner {
    live: AtomicUsize,
    drained: Notify,
    force_close: watch::Sender<bool>,
}

impl Default for ConnectionTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionTracker {
    pub fn new() -> Self {
        let (force_close, _) = watch::channel(false);
        Self {
            inner: Arc::new(TrackerInner {
                live: AtomicUsize::new(0),
                drained: Notify::new(),
                force_close,
            }),
        }
    }

    pub fn track(&self) -> ConnectionGuard {
        self.inner.live.fetch_add(1, Ordering::SeqCst);
        ConnectionGuard {
            force_close: self.inner.force_close.subscribe(),
            inner: Arc::clone(&self.inner),
        }
    }

    pub fn live(&self) -> usize {
        self.inner.live.load(Ordering::SeqCst)
    }

    /// Wait up to `grace` for every tracked session to end, then force-close
    /// the rest. Returns `true` if everything drained in time.
    pub async fn drain(&self, grace: Duration) -> bool {
        let wait = async {
            loop {
                let notified = self.inner.drained.notified();
                if self.live() == 0 {
                    return;
                }
                notified.await;
            }
        };

        if timeout(grace, wait).await.is_ok() {
            return true;
        }

        tracing::warn!(remaining = self.live(), "Grace period elapsed, force closing sessions");
        self.inner.force_close.send_replace(true);
        false
    }
}

/// Held by a running session; releases its slot on drop
#[derive(Debug)]
pub struct ConnectionGuard {
    inner: Arc<TrackerInner>,
    force_close: watch::Receiver<bool>,
}

impl ConnectionGuard {
    /// Resolves once the tracker gives up waiting
    pub async fn force_closed(&mut self) {
        // The sender lives in `inner`, so this only fails if it never fires
        if self.force_close.wait_for(|forced| *forced).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        if self.inner.live.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.inner.drained.notify_waiters();
        }
    }
}
