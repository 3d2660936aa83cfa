//! Wire messages exchanged between gossip peers
//!
//! Every datagram carries exactly one [`Message`] encoded as a flat JSON
//! object. Rumors travel with `"type": "multicast"` and acknowledgments with
//! `"type": "notification"`.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::RumorError;

/// Index of a node inside the overlay; also its slot in ack bitmaps
pub type NodeId = usize;

/// Kind of a gossip message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageKind {
    /// Payload disseminated from its origin to every node
    #[serde(rename = "multicast")]
    Rumor,
    /// "Node `origin` has seen rumor `id`"
    #[serde(rename = "notification")]
    Ack,
}

impl MessageKind {
    /// Wire name of the kind
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rumor => "multicast",
            Self::Ack => "notification",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A rumor or an ack as it travels over the network
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Rumor identifier, unique for a given origin
    pub id: u64,
    /// Rumor or ack
    #[serde(rename = "type")]
    pub kind: MessageKind,
    /// Node that last forwarded this message
    pub sender: NodeId,
    /// Rumor originator for rumors, ack issuer for acks
    pub origin: NodeId,
    /// Opaque payload
    pub data: String,
}

impl Message {
    pub fn new(
        id: u64,
        kind: MessageKind,
        sender: NodeId,
        origin: NodeId,
        data: impl Into<String>,
    ) -> Self {
        Self {
            id,
            kind,
            sender,
            origin,
            data: data.into(),
        }
    }

    /// Create a rumor originated (and first sent) by `origin`
    pub fn rumor(id: u64, origin: NodeId, data: impl Into<String>) -> Self {
        Self::new(id, MessageKind::Rumor, origin, origin, data)
    }

    /// Create the ack `issuer` emits after seeing rumor `id`
    pub fn ack(id: u64, issuer: NodeId) -> Self {
        Self::new(id, MessageKind::Ack, issuer, issuer, "ack")
    }

    /// Copy of this message with `sender` rewritten for the next hop
    pub fn forwarded_by(&self, sender: NodeId) -> Self {
        Self {
            sender,
            ..self.clone()
        }
    }

    /// Serialize into a datagram payload
    pub fn to_bytes(&self) -> Result<Vec<u8>, RumorError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Deserialize a datagram payload
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, RumorError> {
        if bytes.is_empty() {
            return Err(RumorError::message("empty datagram"));
        }
        Ok(serde_json::from_slice(bytes)?)
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{ ID: {} MsgType: {} Sender: {} Origin: {} Data: {} }}",
            self.id, self.kind, self.sender, self.origin, self.data
        )
    }
}
