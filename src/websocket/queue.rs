//! Per-session outbound queue
//!
//! A bounded FIFO of routed messages. The hub holds the only
//! [`OutboundSender`]; the session's write pump owns the [`OutboundReceiver`].
//! Dropping the sender closes the queue, and the reason it was closed is left
//! in a write-once cell both ends share.

use std::fmt;
use std::sync::{Arc, OnceLock};

use tokio::sync::mpsc::{self, error::TrySendError};

use super::messages::Message;

/// Queue entry: one routed message shared by every target queue
pub type Outbound = Arc<Message>;

/// Why a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Read error, idle timeout, oversized frame or peer close
    ReadFailed,
    /// Write error or write deadline exceeded
    WriteFailed,
    /// The outbound queue was full when the hub tried to enqueue
    QueueOverflow,
    /// The process is shutting down
    ServerShutdown,
    /// A newer session of the same user took over
    Replaced,
}

impl CloseReason {
    /// WebSocket close code and reason sent when the hub closes a queue
    pub fn close_code(&self) -> (u16, &'static str) {
        match self {
            CloseReason::ReadFailed | CloseReason::WriteFailed => (1011, "connection failed"),
            CloseReason::QueueOverflow => (1008, "outbound queue overflow"),
            CloseReason::ServerShutdown => (1001, "server shutting down"),
            CloseReason::Replaced => (1000, "replaced by a newer session"),
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CloseReason::ReadFailed => "read_failed",
            CloseReason::WriteFailed => "write_failed",
            CloseReason::QueueOverflow => "queue_overflow",
            CloseReason::ServerShutdown => "server_shutdown",
            CloseReason::Replaced => "replaced",
        };
        f.write_str(name)
    }
}

/// Create a bounded outbound queue
pub fn outbound_queue(capacity: usize) -> (OutboundSender, OutboundReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let reason = Arc::new(OnceLock::new());
    (
        OutboundSender {
            tx,
            reason: Arc::clone(&reason),
        },
        OutboundReceiver { rx, reason },
    )
}

/// Non-blocking enqueue failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueError {
    Full,
    Closed,
}

/// Write half, held by the hub
#[derive(Debug)]
pub struct OutboundSender {
    tx: mpsc::Sender<Outbound>,
    reason: Arc<OnceLock<CloseReason>>,
}

impl OutboundSender {
    /// Enqueue without waiting
    pub fn try_enqueue(&self, message: Outbound) -> Result<(), EnqueueError> {
        self.tx.try_send(message).map_err(|e| match e {
            TrySendError::Full(_) => EnqueueError::Full,
            TrySendError::Closed(_) => EnqueueError::Closed,
        })
    }

    /// Close the queue. Only the first recorded reason is kept.
    pub fn close(self, reason: CloseReason) {
        let _ = self.reason.set(reason);
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Read half, owned by the session's write pump
#[derive(Debug)]
pub struct OutboundReceiver {
    rx: mpsc::Receiver<Outbound>,
    reason: Arc<OnceLock<CloseReason>>,
}

impl OutboundReceiver {
    /// Next message, or `None` once the hub has closed the queue and it is drained
    pub async fn recv(&mut self) -> Option<Outbound> {
        self.rx.recv().await
    }

    /// Everything currently buffered
    pub fn drain(&mut self) -> Vec<Outbound> {
        let mut messages = Vec::new();
        while let Ok(message) = self.rx.try_recv() {
            messages.push(message);
        }
        messages
    }

    /// Reason recorded by the hub when it closed this queue
    pub fn close_reason(&self) -> Option<CloseReason> {
        self.reason.get().copied()
    }
}
