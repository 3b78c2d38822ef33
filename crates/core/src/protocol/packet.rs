//! Packet definitions for the relay protocol
//!
//! The four packet shapes, as a tagged union so the listener's dispatch is
//! exhaustively checked. Field names are the wire names: `type`, `uid`
//! (sender), `destination`, `time` (unix milliseconds) and `content`.

use serde::{Deserialize, Serialize};

use crate::contacts::ContactProfile;
use crate::error::ProtocolError;

/// Encrypted message body: hex-encoded RSA ciphertext.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageBody {
    pub text: String,
}

/// A discrete typed message exchanged over the relay connection.
///
/// Every variant carries the sender uid; a payload missing the `type` tag or
/// the `uid` field fails to decode and is never dispatched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Packet {
    /// Announces this client's identity and profile to the relay on connect
    #[serde(rename = "newConnection")]
    NewConnection { uid: String, content: ContactProfile },

    /// Request to establish a contact relation.
    ///
    /// Built without `content`; the relay attaches the requester's profile
    /// when forwarding, so the recipient learns who is asking.
    #[serde(rename = "friendRequest")]
    FriendRequest {
        uid: String,
        destination: String,
        time: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<ContactProfile>,
    },

    /// Acknowledges and reciprocates a friend request with our profile
    #[serde(rename = "acceptFriendRequest")]
    AcceptFriendRequest {
        uid: String,
        destination: String,
        content: ContactProfile,
    },

    /// A chat message with an encrypted body
    #[serde(rename = "messagePacket")]
    Message {
        uid: String,
        destination: String,
        time: u64,
        content: MessageBody,
    },
}

impl Packet {
    /// The sender uid every packet must carry.
    pub fn sender(&self) -> &str {
        match self {
            Packet::NewConnection { uid, .. }
            | Packet::FriendRequest { uid, .. }
            | Packet::AcceptFriendRequest { uid, .. }
            | Packet::Message { uid, .. } => uid,
        }
    }

    /// The destination uid, for packets the relay forwards to another client.
    pub fn destination(&self) -> Option<&str> {
        match self {
            Packet::NewConnection { .. } => None,
            Packet::FriendRequest { destination, .. }
            | Packet::AcceptFriendRequest { destination, .. }
            | Packet::Message { destination, .. } => Some(destination),
        }
    }

    /// Encode to the UTF-8 JSON wire form.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode a single packet from its wire form.
    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_slice(payload)?)
    }
}
