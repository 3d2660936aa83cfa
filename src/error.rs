//! Error types for the rumormesh gossip simulator

use std::net::SocketAddr;
use thiserror::Error;

use crate::message::NodeId;

/// Main error type for rumormesh operations
#[derive(Error, Debug)]
pub enum RumorError {
    /// A node could not bind its listening socket
    #[error("Node {node_id} failed to bind {address}: {source}")]
    Bind {
        node_id: NodeId,
        address: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// The rumor id is already known to the injecting node
    #[error("Rumor {id} has been sent already")]
    DuplicateRumor { id: u64 },

    /// No node with this index exists in the network
    #[error("Unknown node: {node_id}")]
    UnknownNode { node_id: NodeId },

    /// Message serialization/deserialization errors
    #[error("Message error: {message}")]
    Message { message: String },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Topology provider errors
    #[error("Topology error: {message}")]
    Topology { message: String },

    /// Operation not valid in the current lifecycle state
    #[error("Invalid state: {message}")]
    State { message: String },

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RumorError {
    /// Create a message error
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a topology error
    pub fn topology(message: impl Into<String>) -> Self {
        Self::Topology {
            message: message.into(),
        }
    }

    /// Create a lifecycle state error
    pub fn state(message: impl Into<String>) -> Self {
        Self::State {
            message: message.into(),
        }
    }

    /// Whether this error reports a repeated rumor injection
    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::DuplicateRumor { .. })
    }
}
