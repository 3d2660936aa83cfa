//! Gossip node runtime
//!
//! A [`NodeRuntime`] owns one node's protocol state and drives it: it binds
//! the node's UDP port, feeds inbound messages to the processor and, once per
//! round, hands at most one rumor and one ack to the transport writer.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::GossipConfig;
use crate::error::RumorError;
use crate::logging::LogSink;
use crate::message::{Message, NodeId};
use crate::processor::{Convergence, NodeProcessor, ProcessorStats};
use crate::transport::{Outbound, UdpTransport};

/// Lifecycle of a node runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    /// Created, socket not bound yet
    Unbound,
    /// Socket bound, event loop running
    Running,
    /// Event loop exited; terminal
    Stopped,
}

/// Statistics for one node
#[derive(Debug, Clone)]
pub struct NodeStats {
    pub node_id: NodeId,
    pub state: NodeState,
    pub round: u64,
    pub processor: ProcessorStats,
}

/// One simulated gossip node
pub struct NodeRuntime {
    id: NodeId,
    addr: SocketAddr,
    config: GossipConfig,
    processor: Mutex<NodeProcessor>,
    round: AtomicU64,
    state: RwLock<NodeState>,
}

impl NodeRuntime {
    /// Create a node listening on `addr` with the given neighbor table
    pub fn new(
        id: NodeId,
        addr: SocketAddr,
        neighbors: impl IntoIterator<Item = (NodeId, SocketAddr)>,
        config: GossipConfig,
    ) -> Self {
        let processor = NodeProcessor::new(id, neighbors, config.ttl);
        Self {
            id,
            addr,
            config,
            processor: Mutex::new(processor),
            round: AtomicU64::new(0),
            state: RwLock::new(NodeState::Unbound),
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Configured listening address
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub async fn state(&self) -> NodeState {
        *self.state.read().await
    }

    /// Rounds elapsed since the node started
    pub fn round(&self) -> u64 {
        self.round.load(Ordering::SeqCst)
    }

    /// Whether this node has processed rumor `id`
    pub async fn has_seen(&self, id: u64) -> bool {
        self.processor.lock().await.has_seen(id)
    }

    pub async fn stats(&self) -> NodeStats {
        NodeStats {
            node_id: self.id,
            state: self.state().await,
            round: self.round(),
            processor: self.processor.lock().await.stats(),
        }
    }

    /// Originate a rumor at this node, tracked against `network_size` acks
    pub async fn inject_rumor(
        &self,
        message: Message,
        network_size: usize,
    ) -> Result<Option<Convergence>, RumorError> {
        // Forwarders rewrite the sender, so size the datagram with the widest id.
        let widest_sender = network_size.saturating_sub(1).max(self.id);
        let encoded = message.forwarded_by(widest_sender).to_bytes()?.len();
        if encoded > self.config.max_datagram_size {
            return Err(RumorError::message(format!(
                "rumor {} encodes to {} bytes (max: {})",
                message.id, encoded, self.config.max_datagram_size
            )));
        }

        let mut processor = self.processor.lock().await;
        processor.init_new_message(message, network_size, self.round())
    }

    /// Run the node until a shutdown signal arrives
    ///
    /// The outcome of binding is reported once through `bound`; a node that
    /// fails to bind goes straight to [`NodeState::Stopped`].
    pub async fn run(
        self: Arc<Self>,
        log: Arc<dyn LogSink>,
        completions: Option<mpsc::UnboundedSender<Convergence>>,
        mut shutdown: mpsc::Receiver<()>,
        bound: oneshot::Sender<Result<SocketAddr, RumorError>>,
    ) {
        let mut transport = match UdpTransport::bind(self.addr, &self.config).await {
            Ok(transport) => transport,
            Err(source) => {
                error!(node_id = self.id, addr = %self.addr, "Failed to bind: {}", source);
                log.write_line(&format!("[NODE {}] failed to bind {}: {}", self.id, self.addr, source));
                *self.state.write().await = NodeState::Stopped;
                let _ = bound.send(Err(RumorError::Bind {
                    node_id: self.id,
                    address: self.addr,
                    source,
                }));
                return;
            }
        };

        let mut channels = match transport.start() {
            Ok(channels) => channels,
            Err(e) => {
                *self.state.write().await = NodeState::Stopped;
                let _ = bound.send(Err(e));
                return;
            }
        };

        let local_addr = transport.local_addr();
        *self.state.write().await = NodeState::Running;
        log.write_line(&format!("[NODE {}] port {} bound", self.id, local_addr.port()));
        info!(node_id = self.id, addr = %local_addr, "Starting gossip node {}", self.id);
        if bound.send(Ok(local_addr)).is_err() {
            warn!(node_id = self.id, "Coordinator stopped waiting for bind confirmation");
        }

        let mut ticker = interval(self.config.round_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; rounds start one interval in.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                received = channels.inbound.recv() => match received {
                    Some(message) => self.handle_message(message, log.as_ref(), completions.as_ref()).await,
                    None => break,
                },
                _ = ticker.tick() => {
                    if !self.gossip_round(&channels.outbound, log.as_ref()).await {
                        break;
                    }
                }
            }
        }

        transport.stop().await;
        *self.state.write().await = NodeState::Stopped;
        log.write_line(&format!("[NODE {}] stopped at round {}", self.id, self.round()));
        info!(node_id = self.id, round = self.round(), "Gossip node {} stopped", self.id);
    }

    async fn handle_message(
        &self,
        message: Message,
        log: &dyn LogSink,
        completions: Option<&mpsc::UnboundedSender<Convergence>>,
    ) {
        log.write_line(&format!("[NODE {}] message received: {}", self.id, message));
        let convergence = {
            let mut processor = self.processor.lock().await;
            processor.process_msg(message, self.round())
        };

        if let Some(convergence) = convergence {
            report_convergence(&convergence, log, completions);
        }
    }

    /// Advance the round and hand this round's sends to the writer
    ///
    /// Returns `false` once the writer is gone.
    async fn gossip_round(&self, outbound: &mpsc::Sender<Outbound>, log: &dyn LogSink) -> bool {
        let round = self.round.fetch_add(1, Ordering::SeqCst) + 1;
        let sends: Vec<Outbound> = {
            let mut processor = self.processor.lock().await;
            [processor.get_random_rumor(), processor.get_random_ack()]
                .into_iter()
                .flatten()
                .collect()
        };

        for (message, addr) in sends {
            debug!(node_id = self.id, round, rumor_id = message.id, addr = %addr, "Sending {}", message.kind);
            log.write_line(&format!("[NODE {}] sending {} to {}", self.id, message, addr));
            if outbound.send((message, addr)).await.is_err() {
                warn!(node_id = self.id, "Transport writer closed");
                return false;
            }
        }

        true
    }
}

/// Record a convergence in the session log and forward it to the test hook
pub(crate) fn report_convergence(
    convergence: &Convergence,
    log: &dyn LogSink,
    completions: Option<&mpsc::UnboundedSender<Convergence>>,
) {
    log.write_line(&format!(
        "[NODE {}] [MESSAGE {} ACKED BY ALL NODES] rounds {}",
        convergence.node_id, convergence.rumor_id, convergence.rounds
    ));

    if let Some(tx) = completions {
        if tx.send(*convergence).is_err() {
            debug!(rumor_id = convergence.rumor_id, "Convergence receiver dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::MemoryLog;
    use std::time::Duration;
    use tokio::net::UdpSocket;
    use tokio::time::timeout;

    fn test_config() -> GossipConfig {
        GossipConfig::default()
            .with_round_interval(Duration::from_millis(10))
            .with_read_timeout(Duration::from_millis(20))
    }

    #[tokio::test]
    async fn test_node_lifecycle() {
        let node = Arc::new(NodeRuntime::new(
            0,
            "127.0.0.1:0".parse().unwrap(),
            Vec::new(),
            test_config(),
        ));
        assert_eq!(node.state().await, NodeState::Unbound);

        let log = Arc::new(MemoryLog::new());
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let (bound_tx, bound_rx) = oneshot::channel();
        let handle = tokio::spawn(Arc::clone(&node).run(log.clone(), None, shutdown_rx, bound_tx));

        let addr = bound_rx.await.unwrap().unwrap();
        assert_ne!(addr.port(), 0);
        assert_eq!(node.state().await, NodeState::Running);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(node.round() > 0);

        shutdown_tx.send(()).await.unwrap();
        timeout(Duration::from_secs(2), handle).await.unwrap().unwrap();
        assert_eq!(node.state().await, NodeState::Stopped);
        assert!(log.contains("[NODE 0] port"));
        assert!(log.contains("[NODE 0] stopped"));
    }

    #[tokio::test]
    async fn test_bind_failure_is_reported() {
        let occupied = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = occupied.local_addr().unwrap();

        let node = Arc::new(NodeRuntime::new(3, addr, Vec::new(), test_config()));
        let (_shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let (bound_tx, bound_rx) = oneshot::channel();
        let handle = tokio::spawn(Arc::clone(&node).run(
            Arc::new(MemoryLog::new()),
            None,
            shutdown_rx,
            bound_tx,
        ));

        match bound_rx.await.unwrap() {
            Err(RumorError::Bind { node_id, address, .. }) => {
                assert_eq!(node_id, 3);
                assert_eq!(address, addr);
            }
            other => panic!("expected bind error, got {:?}", other),
        }

        handle.await.unwrap();
        assert_eq!(node.state().await, NodeState::Stopped);
    }

    #[tokio::test]
    async fn test_single_node_rumor_converges_immediately() {
        let node = NodeRuntime::new(0, "127.0.0.1:0".parse().unwrap(), Vec::new(), test_config());

        let convergence = node.inject_rumor(Message::rumor(1, 0, "x"), 1).await.unwrap();
        assert_eq!(
            convergence,
            Some(Convergence {
                node_id: 0,
                rumor_id: 1,
                rounds: 0
            })
        );
        assert!(node.has_seen(1).await);

        let err = node.inject_rumor(Message::rumor(1, 0, "x"), 1).await.unwrap_err();
        assert!(err.is_duplicate());
    }

    #[tokio::test]
    async fn test_oversized_rumor_is_rejected_without_state_change() {
        let neighbor: SocketAddr = "127.0.0.1:9081".parse().unwrap();
        let node = NodeRuntime::new(0, "127.0.0.1:0".parse().unwrap(), vec![(1, neighbor)], test_config());

        let err = node
            .inject_rumor(Message::rumor(1, 0, "y".repeat(2000)), 3)
            .await
            .unwrap_err();
        assert!(matches!(err, RumorError::Message { .. }));
        assert!(!node.has_seen(1).await);

        let stats = node.stats().await.processor;
        assert_eq!(stats.tracked_rumors, 0);
        assert_eq!(stats.queued_rumors, 0);

        // The id stays free for a rumor that fits.
        node.inject_rumor(Message::rumor(1, 0, "y"), 3).await.unwrap();
        assert!(node.has_seen(1).await);
    }

    #[tokio::test]
    async fn test_round_sends_reach_neighbor() {
        let neighbor = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let neighbor_addr = neighbor.local_addr().unwrap();

        let node = Arc::new(NodeRuntime::new(
            0,
            "127.0.0.1:0".parse().unwrap(),
            vec![(1, neighbor_addr)],
            test_config(),
        ));
        node.inject_rumor(Message::rumor(7, 0, "payload"), 2).await.unwrap();

        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let (bound_tx, bound_rx) = oneshot::channel();
        let handle = tokio::spawn(Arc::clone(&node).run(
            Arc::new(MemoryLog::new()),
            None,
            shutdown_rx,
            bound_tx,
        ));
        bound_rx.await.unwrap().unwrap();

        let mut buffer = [0u8; 1024];
        let (len, _) = timeout(Duration::from_secs(2), neighbor.recv_from(&mut buffer))
            .await
            .unwrap()
            .unwrap();
        let received = Message::from_bytes(&buffer[..len]).unwrap();
        assert_eq!(received, Message::rumor(7, 0, "payload"));

        let stats = node.stats().await;
        assert_eq!(stats.state, NodeState::Running);
        assert_eq!(stats.processor.tracked_rumors, 1);

        shutdown_tx.send(()).await.unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_convergence_is_reported() {
        let log = MemoryLog::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let convergence = Convergence {
            node_id: 2,
            rumor_id: 9,
            rounds: 4,
        };

        report_convergence(&convergence, &log, Some(&tx));

        assert_eq!(rx.recv().await, Some(convergence));
        assert!(log.contains("[NODE 2] [MESSAGE 9 ACKED BY ALL NODES] rounds 4"));
    }
}
