//! Wire-format envelope exchanged over the chat socket.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// Every frame on the socket is one of these, discriminated by `event`.
///
/// Required fields are deserialized with `#[serde(default)]` so that a
/// missing field parses to an empty string; [`Envelope::validate`] is the
/// authority on which fields must be present, and names the offender.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Envelope {
    /// Client asks to join a group; answered with `joinGroupAck`.
    JoinGroup {
        #[serde(default)]
        group_id: String,
    },
    /// Client publishes to a group, or the server relays a group message.
    GroupMessage {
        #[serde(default)]
        group_id: String,
        #[serde(default)]
        message: String,
        #[serde(default)]
        sender_id: String,
    },
    /// Echoed back to the sender's own socket only.
    DirectMessage {
        #[serde(default)]
        message: String,
        #[serde(default)]
        sender_id: String,
    },
    /// Liveness probe; answered with `pong`.
    Ping {
        #[serde(default)]
        sender_id: String,
    },
    Pong,
    GroupMessageAck { data: String },
    JoinGroupAck { data: String },
    /// Human-readable failure reason in `data`.
    Error { data: String },
}

impl Envelope {
    /// Check the non-emptiness invariants for this event.
    ///
    /// Returns the human-readable reason for the first violated field, in
    /// the order clients expect it reported.
    pub fn validate(&self) -> Result<(), &'static str> {
        match self {
            Envelope::JoinGroup { group_id } => require(group_id, "groupId is required"),
            Envelope::GroupMessage {
                group_id,
                message,
                sender_id,
            } => {
                require(group_id, "groupId is required")?;
                require(message, "message is required")?;
                require(sender_id, "senderId is required")
            }
            Envelope::DirectMessage { message, sender_id } => {
                require(message, "message is required")?;
                require(sender_id, "senderId is required")
            }
            Envelope::Ping { sender_id } => require(sender_id, "senderId is required"),
            Envelope::Pong
            | Envelope::GroupMessageAck { .. }
            | Envelope::JoinGroupAck { .. }
            | Envelope::Error { .. } => Ok(()),
        }
    }

    /// Build an `error` envelope from a failure reason.
    pub fn error(reason: impl Into<String>) -> Self {
        Envelope::Error { data: reason.into() }
    }
}

fn require<'a>(field: &str, reason: &'a str) -> Result<(), &'a str> {
    if field.is_empty() {
        Err(reason)
    } else {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Broker channel payload
// ---------------------------------------------------------------------------

/// The payload published on a `group:{groupId}` broker channel.
///
/// Deliberately not the full envelope: the group id is implied by the
/// channel name and re-attached on delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupPayload {
    pub sender_id: String,
    pub message: String,
}
