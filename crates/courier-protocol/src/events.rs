//! Event types for the Courier protocol.
//!
//! The inbound set is deliberately closed: every event a client may send is
//! a variant here, dispatched through one typed match on the server side.

use crate::model::PopulatedMessage;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Events a client may send over an established connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Relay a chat message to another user.
    ///
    /// `receiver_id` is optional at the wire level so that a missing
    /// receiver surfaces as a validation failure in the acknowledgment
    /// rather than a decode error.
    SendMessage {
        #[serde(rename = "receiverId", default)]
        receiver_id: Option<Uuid>,
        #[serde(default)]
        content: String,
    },
    /// Mark every unread message from `sender_id` to the caller as read.
    MarkRead {
        #[serde(rename = "senderId")]
        sender_id: Uuid,
    },
    /// The caller started composing a message to `receiver_id`.
    Typing {
        #[serde(rename = "receiverId")]
        receiver_id: Uuid,
    },
    /// The caller stopped composing.
    StopTyping {
        #[serde(rename = "receiverId")]
        receiver_id: Uuid,
    },
}

/// Events the server pushes to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    /// A user became reachable. Sent to everyone except that user.
    UserOnline {
        #[serde(rename = "userId")]
        user_id: Uuid,
    },
    /// A user became unreachable. Sent to everyone remaining.
    UserOffline {
        #[serde(rename = "userId")]
        user_id: Uuid,
    },
    /// Snapshot of all reachable users, sent once to a newly connected
    /// client (the snapshot includes the client itself).
    OnlineUsers(Vec<Uuid>),
    /// A chat message addressed to this connection's user.
    ReceiveMessage(PopulatedMessage),
    /// The receiver viewed `count` previously unread messages.
    MessagesRead {
        #[serde(rename = "readBy")]
        read_by: Uuid,
        count: u64,
    },
    /// Another user is composing a message to this connection's user.
    UserTyping {
        #[serde(rename = "userId")]
        user_id: Uuid,
    },
    /// Another user stopped composing.
    UserStopTyping {
        #[serde(rename = "userId")]
        user_id: Uuid,
    },
    /// Point-to-point acknowledgment of a `send_message` event.
    SendAck(SendAck),
}

/// Result payload for a `send_message` acknowledgment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendAck {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<PopulatedMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SendAck {
    /// Successful acknowledgment carrying the final persisted message.
    #[must_use]
    pub fn ok(message: PopulatedMessage) -> Self {
        Self {
            success: true,
            message: Some(message),
            error: None,
        }
    }

    /// Failed acknowledgment carrying a structured error description.
    #[must_use]
    pub fn err(error: impl Into<String>) -> Self {
        Self {
            success: false,
            message: None,
            error: Some(error.into()),
        }
    }
}
