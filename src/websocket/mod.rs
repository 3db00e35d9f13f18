//! WebSocket Real-Time Messaging
//!
//! Fans messages out between authenticated WebSocket clients.
//!
//! ## Architecture
//!
//! - **ConnectionHub**: single task owning the session registry; routes every
//!   message and evicts sessions that fall behind
//! - **ClientSession**: one connection, a read pump and a write pump
//! - **PresenceTracker**: lock-free view of who is online
//! - **Messages**: the JSON envelope and typed payloads
//!
//! ## Usage
//!
//! Clients connect to `/ws` (authenticated upstream) and exchange frames such
//! as:
//!
//! ```javascript
//! const ws = new WebSocket('ws://localhost:8080/ws');
//!
//! ws.onopen = () => {
//!   ws.send(JSON.stringify({type: 'chat', receiver_id: 2, data: {content: 'hi'}}));
//! };
//!
//! ws.onmessage = (event) => {
//!   const msg = JSON.parse(event.data);
//!   console.log(msg.type, msg.data);
//! };
//! ```

mod handler;
mod hub;
mod messages;
mod presence;
mod queue;
mod registry;
mod session;

pub use handler::websocket_handler;
pub use hub::{ConnectionHub, HubConfig, HubError, HubStats, SessionPolicy};
pub use messages::{
    ChatPayload, DecodeError, ErrorPayload, InboundFrame, Message, Payload, PresencePayload,
    PresenceStatus, RosterPayload, TypingPayload, UserId,
};
pub use presence::{PresenceSnapshot, PresenceTracker};
pub use queue::{outbound_queue, CloseReason, EnqueueError, OutboundReceiver, OutboundSender};
pub use registry::SessionId;
pub use session::{ClientSession, ConnectionGuard, ConnectionTracker, SessionConfig, SessionError};
