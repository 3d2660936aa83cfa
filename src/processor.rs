//! Per-node rumor/ack state machine
//!
//! Rumors and acks are two independent epidemics over the same overlay:
//! rumors spread the payload, acks spread "node X has seen rumor Y". Only the
//! node that originated a rumor keeps an ack bitmap for it, and that bitmap
//! is the only place where network-wide delivery is detected.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use tracing::{debug, info, warn};

use crate::error::RumorError;
use crate::message::{Message, MessageKind, NodeId};
use crate::queue::DistributionQueue;

/// Report that every node of the network acked a tracked rumor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Convergence {
    /// Node that originated and tracked the rumor
    pub node_id: NodeId,
    /// The rumor that reached every node
    pub rumor_id: u64,
    /// Rounds elapsed between injection and the last ack
    pub rounds: u64,
}

/// Snapshot of a processor's bookkeeping
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessorStats {
    pub seen_rumors: usize,
    pub tracked_rumors: usize,
    pub queued_rumors: usize,
    pub queued_acks: usize,
}

/// Protocol state of one node
#[derive(Debug)]
pub struct NodeProcessor {
    /// This node's id
    node_id: NodeId,
    /// Neighbor id -> address
    neighbors: HashMap<NodeId, SocketAddr>,
    /// Rumor ids already processed
    seen_rumors: HashSet<u64>,
    /// Rumor id -> ack issuers already processed
    seen_acks: HashMap<u64, HashSet<NodeId>>,
    /// Rumor id -> per-node ack flags, only for rumors this node tracks
    ack_bitmaps: HashMap<u64, Vec<bool>>,
    /// Rumor id -> round at which tracking began
    track_start: HashMap<u64, u64>,
    rumor_queue: DistributionQueue,
    ack_queue: DistributionQueue,
}

impl NodeProcessor {
    pub fn new(
        node_id: NodeId,
        neighbors: impl IntoIterator<Item = (NodeId, SocketAddr)>,
        ttl: u32,
    ) -> Self {
        Self {
            node_id,
            neighbors: neighbors.into_iter().collect(),
            seen_rumors: HashSet::new(),
            seen_acks: HashMap::new(),
            ack_bitmaps: HashMap::new(),
            track_start: HashMap::new(),
            rumor_queue: DistributionQueue::new(ttl),
            ack_queue: DistributionQueue::new(ttl),
        }
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    pub fn neighbors(&self) -> &HashMap<NodeId, SocketAddr> {
        &self.neighbors
    }

    /// Start disseminating and tracking a rumor originated by this node
    ///
    /// Fails with [`RumorError::DuplicateRumor`] without touching any state
    /// when the id is already known here. Returns a convergence right away
    /// when this node is the whole network.
    pub fn init_new_message(
        &mut self,
        message: Message,
        network_size: usize,
        current_round: u64,
    ) -> Result<Option<Convergence>, RumorError> {
        let id = message.id;
        if self.seen_rumors.contains(&id) {
            return Err(RumorError::DuplicateRumor { id });
        }

        let mut bitmap = vec![false; network_size];
        match bitmap.get_mut(self.node_id) {
            Some(own) => *own = true,
            None => warn!(
                node_id = self.node_id,
                network_size, "Node id outside of the ack bitmap"
            ),
        }

        self.seen_rumors.insert(id);
        self.seen_acks.entry(id).or_default().insert(self.node_id);

        let rumor = Message {
            kind: MessageKind::Rumor,
            sender: self.node_id,
            ..message
        };
        let recipients = self.recipients(None);
        self.rumor_queue.put(rumor, recipients);

        if !bitmap.is_empty() && bitmap.iter().all(|acked| *acked) {
            return Ok(Some(Convergence {
                node_id: self.node_id,
                rumor_id: id,
                rounds: 0,
            }));
        }

        self.ack_bitmaps.insert(id, bitmap);
        self.track_start.insert(id, current_round);
        info!(node_id = self.node_id, rumor_id = id, round = current_round, "Tracking new rumor");
        Ok(None)
    }

    /// Apply one inbound message
    ///
    /// Returns a convergence the first time a tracked rumor becomes acked by
    /// every node.
    pub fn process_msg(&mut self, message: Message, current_round: u64) -> Option<Convergence> {
        match message.kind {
            MessageKind::Rumor => {
                self.process_rumor(message);
                None
            }
            MessageKind::Ack => self.process_ack(message, current_round),
        }
    }

    fn process_rumor(&mut self, message: Message) {
        if !self.seen_rumors.insert(message.id) {
            debug!(node_id = self.node_id, rumor_id = message.id, "Ignoring known rumor");
            return;
        }

        let forward_to = self.recipients(Some(message.sender));
        let everyone = self.recipients(None);

        self.seen_acks
            .entry(message.id)
            .or_default()
            .insert(self.node_id);
        self.ack_queue.put(Message::ack(message.id, self.node_id), everyone);
        self.rumor_queue.put(message.forwarded_by(self.node_id), forward_to);
    }

    fn process_ack(&mut self, message: Message, current_round: u64) -> Option<Convergence> {
        let id = message.id;
        let issuer = message.origin;

        if !self.seen_acks.entry(id).or_default().insert(issuer) {
            return None;
        }

        let forward_to = self.recipients(Some(message.sender));
        self.ack_queue.put(message.forwarded_by(self.node_id), forward_to);

        let bitmap = self.ack_bitmaps.get_mut(&id)?;
        match bitmap.get_mut(issuer) {
            Some(bit) => *bit = true,
            None => {
                warn!(node_id = self.node_id, rumor_id = id, issuer, "Ack from node outside the network");
                return None;
            }
        }
        debug!(
            node_id = self.node_id,
            rumor_id = id,
            issuer,
            acked = bitmap.iter().filter(|acked| **acked).count(),
            "Rumor acked"
        );

        if !bitmap.iter().all(|acked| *acked) {
            return None;
        }

        self.ack_bitmaps.remove(&id);
        let started = self.track_start.remove(&id).unwrap_or(current_round);
        let rounds = current_round.saturating_sub(started);
        info!(node_id = self.node_id, rumor_id = id, rounds, "Rumor acked by all nodes");

        Some(Convergence {
            node_id: self.node_id,
            rumor_id: id,
            rounds,
        })
    }

    /// Next rumor to send and the address of its recipient
    pub fn get_random_rumor(&mut self) -> Option<(Message, SocketAddr)> {
        let (message, recipient) = self.rumor_queue.get()?;
        self.resolve(message, recipient)
    }

    /// Next ack to send and the address of its recipient
    pub fn get_random_ack(&mut self) -> Option<(Message, SocketAddr)> {
        let (message, recipient) = self.ack_queue.get()?;
        self.resolve(message, recipient)
    }

    fn resolve(&self, message: Message, recipient: NodeId) -> Option<(Message, SocketAddr)> {
        let addr = self.neighbors.get(&recipient).copied();
        if addr.is_none() {
            warn!(node_id = self.node_id, recipient, "No address for recipient");
        }
        addr.map(|addr| (message, addr))
    }

    /// Neighbor ids, optionally without the node a message came from
    fn recipients(&self, except: Option<NodeId>) -> Vec<NodeId> {
        self.neighbors
            .keys()
            .copied()
            .filter(|id| Some(*id) != except)
            .collect()
    }

    /// Whether this node has processed rumor `id`
    pub fn has_seen(&self, id: u64) -> bool {
        self.seen_rumors.contains(&id)
    }

    /// Whether this node still waits for acks of rumor `id`
    pub fn is_tracking(&self, id: u64) -> bool {
        self.ack_bitmaps.contains_key(&id)
    }

    /// Current ack flags of a tracked rumor
    pub fn ack_bitmap(&self, id: u64) -> Option<&[bool]> {
        self.ack_bitmaps.get(&id).map(Vec::as_slice)
    }

    pub fn stats(&self) -> ProcessorStats {
        ProcessorStats {
            seen_rumors: self.seen_rumors.len(),
            tracked_rumors: self.ack_bitmaps.len(),
            queued_rumors: self.rumor_queue.len(),
            queued_acks: self.ack_queue.len(),
        }
    }
}
