//! WebSocket Message Types
//!
//! Defines the wire envelope exchanged with clients and the routed
//! [`Message`] the hub fans out.
//!
//! Every frame is a JSON object of the form:
//!
//! ```json
//! {"type": "chat", "data": {"content": "hi"}, "receiver_id": 2, "timestamp": "..."}
//! ```
//!
//! Decoding is done in two stages: the envelope is parsed with `data` left as
//! an untyped JSON value, then the `type` tag selects the payload type the
//! data is decoded into. Tags outside the built-in set are carried as domain
//! events.

use chrono::{DateTime, Utc};
use serde::ser::SerializeStruct;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use thiserror::Error;

/// Authenticated user identity
pub type UserId = i64;

const TYPE_CHAT: &str = "chat";
const TYPE_TYPING: &str = "typing";
const TYPE_PRESENCE: &str = "presence";
const TYPE_ROSTER: &str = "online_users";
const TYPE_ERROR: &str = "error";
const TYPE_PING: &str = "ping";
const TYPE_PONG: &str = "pong";

/// Online status carried by presence events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceStatus {
    Online,
    Offline,
}

/// Private chat message body
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatPayload {
    pub content: String,
}

// Clients send either `"data": "hi"` or `"data": {"content": "hi"}`.
impl<'de> Deserialize<'de> for ChatPayload {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Text(String),
            Object { content: String },
        }

        match Repr::deserialize(deserializer)? {
            Repr::Text(content) | Repr::Object { content } => Ok(Self { content }),
        }
    }
}

/// Typing indicator body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypingPayload {
    #[serde(default = "default_is_typing")]
    pub is_typing: bool,
}

fn default_is_typing() -> bool {
    true
}

impl Default for TypingPayload {
    fn default() -> Self {
        Self {
            is_typing: default_is_typing(),
        }
    }
}

/// Presence change for one user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresencePayload {
    pub user_id: UserId,
    pub status: PresenceStatus,
}

/// Point-in-time list of online users
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RosterPayload {
    pub user_ids: Vec<UserId>,
}

/// Error notice sent to a single session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub message: String,
}

/// Type-specific message body
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Chat(ChatPayload),
    Typing(TypingPayload),
    Presence(PresencePayload),
    Roster(RosterPayload),
    Error(ErrorPayload),
    Ping,
    Pong,
    /// Domain broadcast (e.g. `comment_added`), transported as-is
    Event { name: String, data: Value },
}

impl Payload {
    /// Decode `data` according to the `type` tag
    pub fn decode(kind: &str, data: Value) -> Result<Self, DecodeError> {
        let payload = match kind {
            "" => return Err(DecodeError::MissingType),
            TYPE_CHAT => Payload::Chat(typed(kind, data)?),
            TYPE_TYPING if data.is_null() => Payload::Typing(TypingPayload::default()),
            TYPE_TYPING => Payload::Typing(typed(kind, data)?),
            TYPE_PRESENCE => Payload::Presence(typed(kind, data)?),
            TYPE_ROSTER => Payload::Roster(typed(kind, data)?),
            TYPE_ERROR => Payload::Error(typed(kind, data)?),
            TYPE_PING => Payload::Ping,
            TYPE_PONG => Payload::Pong,
            _ => Payload::Event {
                name: kind.to_string(),
                data,
            },
        };
        Ok(payload)
    }

    /// Wire `type` tag
    pub fn type_tag(&self) -> &str {
        match self {
            Payload::Chat(_) => TYPE_CHAT,
            Payload::Typing(_) => TYPE_TYPING,
            Payload::Presence(_) => TYPE_PRESENCE,
            Payload::Roster(_) => TYPE_ROSTER,
            Payload::Error(_) => TYPE_ERROR,
            Payload::Ping => TYPE_PING,
            Payload::Pong => TYPE_PONG,
            Payload::Event { name, .. } => name,
        }
    }
}

fn typed<T: serde::de::DeserializeOwned>(kind: &str, data: Value) -> Result<T, DecodeError> {
    serde_json::from_value(data).map_err(|source| DecodeError::InvalidPayload {
        kind: kind.to_string(),
        source,
    })
}

/// A fully stamped message ready for routing
///
/// Sender and timestamp are always set by the server. Fields are private so
/// a message cannot change once it has been handed to the hub.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    payload: Payload,
    sender_id: Option<UserId>,
    receiver_id: Option<UserId>,
    timestamp: DateTime<Utc>,
}

impl Message {
    /// Create a server-originated message stamped with the current time
    pub fn new(payload: Payload) -> Self {
        Self {
            payload,
            sender_id: None,
            receiver_id: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_sender(mut self, sender_id: UserId) -> Self {
        self.sender_id = Some(sender_id);
        self
    }

    pub fn with_receiver(mut self, receiver_id: UserId) -> Self {
        self.receiver_id = Some(receiver_id);
        self
    }

    pub fn chat(content: impl Into<String>) -> Self {
        Self::new(Payload::Chat(ChatPayload {
            content: content.into(),
        }))
    }

    pub fn typing(is_typing: bool) -> Self {
        Self::new(Payload::Typing(TypingPayload { is_typing }))
    }

    pub fn presence(user_id: UserId, status: PresenceStatus) -> Self {
        Self::new(Payload::Presence(PresencePayload { user_id, status }))
    }

    pub fn roster(user_ids: Vec<UserId>) -> Self {
        Self::new(Payload::Roster(RosterPayload { user_ids }))
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(Payload::Error(ErrorPayload {
            message: message.into(),
        }))
    }

    pub fn pong() -> Self {
        Self::new(Payload::Pong)
    }

    /// Domain event such as `comment_added`
    pub fn event(name: impl Into<String>, data: Value) -> Self {
        Self::new(Payload::Event {
            name: name.into(),
            data,
        })
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn type_tag(&self) -> &str {
        self.payload.type_tag()
    }

    pub fn sender_id(&self) -> Option<UserId> {
        self.sender_id
    }

    pub fn receiver_id(&self) -> Option<UserId> {
        self.receiver_id
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Encode as a JSON text frame
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl Serialize for Message {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut envelope = serializer.serialize_struct("Message", 5)?;
        envelope.serialize_field("type", self.type_tag())?;
        match &self.payload {
            Payload::Chat(data) => envelope.serialize_field("data", data)?,
            Payload::Typing(data) => envelope.serialize_field("data", data)?,
            Payload::Presence(data) => envelope.serialize_field("data", data)?,
            Payload::Roster(data) => envelope.serialize_field("data", data)?,
            Payload::Error(data) => envelope.serialize_field("data", data)?,
            Payload::Ping | Payload::Pong => envelope.skip_field("data")?,
            Payload::Event { data, .. } => envelope.serialize_field("data", data)?,
        }
        match self.sender_id {
            Some(id) => envelope.serialize_field("sender_id", &id)?,
            None => envelope.skip_field("sender_id")?,
        }
        match self.receiver_id {
            Some(id) => envelope.serialize_field("receiver_id", &id)?,
            None => envelope.skip_field("receiver_id")?,
        }
        envelope.serialize_field("timestamp", &self.timestamp)?;
        envelope.end()
    }
}

/// Envelope as sent by a client, before the type-directed decode
#[derive(Debug, Deserialize)]
struct RawFrame {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    data: Value,
    #[serde(default)]
    receiver_id: Option<UserId>,
    /// Older clients put chat text next to the type instead of in `data`
    #[serde(default)]
    content: Option<String>,
}

/// A decoded client frame, not yet attributed to a sender
#[derive(Debug, Clone, PartialEq)]
pub struct InboundFrame {
    pub payload: Payload,
    pub receiver_id: Option<UserId>,
}

impl InboundFrame {
    /// Decode a text frame. Client-supplied `sender_id` and `timestamp` are ignored.
    pub fn decode(text: &str) -> Result<Self, DecodeError> {
        let raw: RawFrame = serde_json::from_str(text).map_err(DecodeError::Malformed)?;

        let data = match (raw.data, raw.content) {
            (Value::Null, Some(content)) if raw.kind == TYPE_CHAT => Value::String(content),
            (data, _) => data,
        };

        let payload = Payload::decode(&raw.kind, data)?;

        Ok(Self {
            payload,
            // Browser clients send `0` for "no receiver"
            receiver_id: raw.receiver_id.filter(|id| *id > 0),
        })
    }

    /// Stamp the authenticated sender and the server clock
    pub fn into_message(self, sender_id: UserId) -> Message {
        let message = Message::new(self.payload).with_sender(sender_id);
        match self.receiver_id {
            Some(receiver) => message.with_receiver(receiver),
            None => message,
        }
    }
}

/// Errors decoding a client frame
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Malformed frame: {0}")]
    Malformed(#[source] serde_json::Error),

    #[error("Frame has no message type")]
    MissingType,

    #[error("Invalid {kind} payload: {source}")]
    InvalidPayload {
        kind: String,
        #[source]
        source: serde_json::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_chat_object() {
        let frame = InboundFrame::decode(
            r#"{"type": "chat", "data": {"content": "hi"}, "receiver_id": 2, "sender_id": 99}"#,
        )
        .unwrap();
        assert_eq!(frame.receiver_id, Some(2));
        assert_eq!(
            frame.payload,
            Payload::Chat(ChatPayload {
                content: "hi".to_string()
            })
        );
    }

    #[test]
    fn test_decode_chat_bare_string_and_top_level_content() {
        let frame = InboundFrame::decode(r#"{"type": "chat", "data": "hey", "receiver_id": 3}"#)
            .unwrap();
        assert!(matches!(frame.payload, Payload::Chat(ref c) if c.content == "hey"));

        let frame =
            InboundFrame::decode(r#"{"type": "chat", "receiver_id": 2, "content": "hi"}"#).unwrap();
        assert!(matches!(frame.payload, Payload::Chat(ref c) if c.content == "hi"));
    }

    #[test]
    fn test_decode_typing_defaults() {
        let frame = InboundFrame::decode(r#"{"type": "typing"}"#).unwrap();
        assert_eq!(frame.payload, Payload::Typing(TypingPayload { is_typing: true }));
        assert_eq!(frame.receiver_id, None);

        let frame =
            InboundFrame::decode(r#"{"type": "typing", "data": {"is_typing": false}, "receiver_id": 0}"#)
                .unwrap();
        assert_eq!(frame.payload, Payload::Typing(TypingPayload { is_typing: false }));
        assert_eq!(frame.receiver_id, None);
    }

    #[test]
    fn test_decode_unknown_type_is_event() {
        let frame =
            InboundFrame::decode(r#"{"type": "comment_added", "data": {"post_id": 7}}"#).unwrap();
        match frame.payload {
            Payload::Event { name, data } => {
                assert_eq!(name, "comment_added");
                assert_eq!(data, json!({"post_id": 7}));
            }
            other => panic!("Expected Event, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_errors() {
        assert!(matches!(
            InboundFrame::decode("not json"),
            Err(DecodeError::Malformed(_))
        ));
        assert!(matches!(
            InboundFrame::decode(r#"{"data": 1}"#),
            Err(DecodeError::MissingType)
        ));
        assert!(matches!(
            InboundFrame::decode(r#"{"type": "chat", "data": 42}"#),
            Err(DecodeError::InvalidPayload { ref kind, .. }) if kind == "chat"
        ));
    }

    #[test]
    fn test_into_message_stamps_sender() {
        let frame = InboundFrame::decode(r#"{"type": "chat", "data": "hi", "receiver_id": 2}"#)
            .unwrap();
        let message = frame.into_message(1);
        assert_eq!(message.sender_id(), Some(1));
        assert_eq!(message.receiver_id(), Some(2));
        assert_eq!(message.type_tag(), "chat");
    }

    #[test]
    fn test_serialize_envelope() {
        let message = Message::chat("hi").with_sender(1).with_receiver(2);
        let value: Value = serde_json::from_str(&message.to_json().unwrap()).unwrap();
        assert_eq!(value["type"], "chat");
        assert_eq!(value["data"]["content"], "hi");
        assert_eq!(value["sender_id"], 1);
        assert_eq!(value["receiver_id"], 2);
        assert!(value["timestamp"].is_string());
    }

    #[test]
    fn test_serialize_server_messages_omit_ids() {
        let message = Message::presence(5, PresenceStatus::Offline);
        let value: Value = serde_json::from_str(&message.to_json().unwrap()).unwrap();
        assert_eq!(value["type"], "presence");
        assert_eq!(value["data"], json!({"user_id": 5, "status": "offline"}));
        assert!(value.get("sender_id").is_none());
        assert!(value.get("receiver_id").is_none());

        let value: Value = serde_json::from_str(&Message::pong().to_json().unwrap()).unwrap();
        assert_eq!(value["type"], "pong");
        assert!(value.get("data").is_none());
    }

    #[test]
    fn test_event_keeps_name_as_type() {
        let message = Message::event("post_reactions_updated", json!({"id": 3, "like_count": 4}));
        let value: Value = serde_json::from_str(&message.to_json().unwrap()).unwrap();
        assert_eq!(value["type"], "post_reactions_updated");
        assert_eq!(value["data"]["like_count"], 4);
    }
}
