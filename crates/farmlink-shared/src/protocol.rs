//! Socket wire protocol.
//!
//! Every frame is a JSON text frame of the form
//! `{"event": "<name>", "data": <payload>}`.

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;
use crate::types::{Message, UserId};

/// Events pushed from the server to a connected client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ServerEvent {
    /// Full set of online users. Always a replacement, never a diff.
    PresenceSnapshot(PresenceSnapshot),

    /// A counterpart started or stopped typing.
    TypingStatus(TypingNotice),

    /// A message addressed to this client was stored.
    NewMessage(Message),
}

/// Events sent from a client to the server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ClientEvent {
    /// Ask for a fresh presence snapshot (answered by a global broadcast).
    RequestPresenceSnapshot,

    /// Typing indicator for a single recipient.
    TypingStatus(TypingUpdate),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PresenceSnapshot {
    /// Registry mutation counter at the time the snapshot was taken.
    /// A client ignores snapshots older than the last one it applied.
    pub version: u64,
    pub online_users: Vec<UserId>,
}

/// Client -> server typing update.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TypingUpdate {
    pub receiver_id: UserId,
    pub is_typing: bool,
}

/// Server -> client typing notice.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TypingNotice {
    pub sender_id: UserId,
    pub is_typing: bool,
}

/// REST body for `POST /api/messages/send/{id}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SendMessageRequest {
    pub text: String,
}

impl ServerEvent {
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Event name as it appears on the wire, for logging.
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::PresenceSnapshot(_) => "presenceSnapshot",
            ServerEvent::TypingStatus(_) => "typingStatus",
            ServerEvent::NewMessage(_) => "newMessage",
        }
    }
}

impl ClientEvent {
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }
}
