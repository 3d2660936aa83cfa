//! Randomized distribution queue with a per-item retransmit budget
//!
//! Each enqueued message may be dequeued at most `ttl` times. Every dequeue
//! draws a random item and a random recipient of that item, so the total
//! number of sends per item is bounded by the budget no matter how many
//! neighbors it targets, while consecutive retries spread across neighbors.

use rand::seq::SliceRandom;
use rand::Rng;

use crate::message::{Message, NodeId};

/// A message waiting for distribution
#[derive(Debug, Clone)]
struct QueuedItem {
    message: Message,
    recipients: Vec<NodeId>,
    budget: u32,
}

/// Distribution queue for one message class of one node
#[derive(Debug)]
pub struct DistributionQueue {
    items: Vec<QueuedItem>,
    ttl: u32,
}

impl DistributionQueue {
    /// Create a queue whose items start with a budget of `ttl`
    pub fn new(ttl: u32) -> Self {
        Self {
            items: Vec::with_capacity(100),
            ttl,
        }
    }

    /// Enqueue `message` for the given recipients
    ///
    /// Duplicate recipient ids are collapsed. Nothing is enqueued when there
    /// is no recipient or the queue was created with a zero budget.
    pub fn put(&mut self, message: Message, recipients: impl IntoIterator<Item = NodeId>) {
        let mut recipients: Vec<NodeId> = recipients.into_iter().collect();
        recipients.sort_unstable();
        recipients.dedup();

        if recipients.is_empty() || self.ttl == 0 {
            return;
        }

        self.items.push(QueuedItem {
            message,
            recipients,
            budget: self.ttl,
        });
    }

    /// Dequeue a random message and a random recipient for it
    pub fn get(&mut self) -> Option<(Message, NodeId)> {
        self.get_with(&mut rand::thread_rng())
    }

    /// Like [`get`](Self::get) with a caller-supplied random source
    pub fn get_with<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Option<(Message, NodeId)> {
        if self.items.is_empty() {
            return None;
        }

        let index = rng.gen_range(0..self.items.len());
        let item = &mut self.items[index];
        let recipient = *item.recipients.choose(rng)?;
        let message = item.message.clone();

        item.budget -= 1;
        if item.budget == 0 {
            self.items.swap_remove(index);
        }

        Some((message, recipient))
    }

    /// Number of items still holding budget
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Budget given to newly enqueued items
    pub fn ttl(&self) -> u32 {
        self.ttl
    }
}
