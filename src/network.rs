//! Network coordinator
//!
//! [`GossipNet`] builds one [`NodeRuntime`] per topology entry, runs them on
//! the tokio runtime for the duration of a session and is the entry point for
//! injecting rumors.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{error, info, warn};

use crate::config::{GossipConfig, BASE_PORT};
use crate::error::RumorError;
use crate::logging::{CorrelationId, LogSink, SessionLog};
use crate::message::{Message, NodeId};
use crate::node::{report_convergence, NodeRuntime, NodeState};
use crate::processor::Convergence;
use crate::topology::{RandomTopology, TopologyProvider};

/// Degree bounds of the overlay built by [`GossipNet::init_net`]
const MIN_DEGREE: usize = 1;
const MAX_DEGREE: usize = 5;

struct NodeHandle {
    shutdown: mpsc::Sender<()>,
    task: JoinHandle<()>,
}

/// A simulated gossip network
pub struct GossipNet {
    config: GossipConfig,
    nodes: Vec<Arc<NodeRuntime>>,
    handles: Vec<NodeHandle>,
    completions: Option<mpsc::UnboundedSender<Convergence>>,
    sink: Option<Arc<dyn LogSink>>,
    session: Option<CorrelationId>,
    running: bool,
}

impl GossipNet {
    /// Build a network from a topology
    ///
    /// Node ids must be unique and lie in `0..size`; node `i` is reachable as
    /// `make_rumour(i, ..)`.
    pub fn build(provider: &impl TopologyProvider, config: GossipConfig) -> Result<Self, RumorError> {
        config.validate()?;
        let topology = provider.topology()?;
        if topology.is_empty() {
            return Err(RumorError::topology("topology has no nodes"));
        }

        let size = topology.len();
        let host = config.bind_host;
        let mut slots: Vec<Option<Arc<NodeRuntime>>> = vec![None; size];

        for entry in topology.entries() {
            let slot = slots.get_mut(entry.id).ok_or_else(|| {
                RumorError::topology(format!("node id {} outside of 0..{}", entry.id, size))
            })?;
            if slot.is_some() {
                return Err(RumorError::topology(format!("duplicate node id {}", entry.id)));
            }

            let neighbors = entry
                .neighbors
                .iter()
                .map(|neighbor| (neighbor.id, SocketAddr::new(host, neighbor.port)));
            *slot = Some(Arc::new(NodeRuntime::new(
                entry.id,
                SocketAddr::new(host, entry.port),
                neighbors,
                config.clone(),
            )));
        }

        let nodes = slots.into_iter().flatten().collect();
        info!("Built gossip network with {} nodes", size);

        Ok(Self {
            config,
            nodes,
            handles: Vec::new(),
            completions: None,
            sink: None,
            session: None,
            running: false,
        })
    }

    /// Random overlay of `size` nodes with degrees in 1..=5, ports from 9080
    pub fn init_net(size: usize, round_interval: Duration) -> Result<Self, RumorError> {
        let topology = RandomTopology::new(size, MIN_DEGREE, MAX_DEGREE).with_base_port(BASE_PORT);
        Self::build(&topology, GossipConfig::default().with_round_interval(round_interval))
    }

    /// Network over a caller-supplied overlay
    pub fn init_net_from_graph(
        graph: &impl TopologyProvider,
        round_interval: Duration,
    ) -> Result<Self, RumorError> {
        Self::build(graph, GossipConfig::default().with_round_interval(round_interval))
    }

    /// Forward convergence reports to the returned receiver
    ///
    /// Must be called before [`start`](Self::start).
    pub fn set_test_mode(&mut self) -> Result<mpsc::UnboundedReceiver<Convergence>, RumorError> {
        if self.running {
            return Err(RumorError::state("test mode must be set before start"));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        self.completions = Some(tx);
        Ok(rx)
    }

    /// Start every node, logging the session to a new file in `log_dir`
    pub async fn start(&mut self, log_dir: impl AsRef<Path>) -> Result<(), RumorError> {
        let log = SessionLog::create(log_dir)?;
        info!("Session log at {}", log.path().display());
        self.start_with_sink(Arc::new(log)).await
    }

    /// Start every node and wait until each one has bound its port
    ///
    /// If any node fails to bind, the nodes already running are stopped and
    /// the bind error is returned.
    pub async fn start_with_sink(&mut self, sink: Arc<dyn LogSink>) -> Result<(), RumorError> {
        if self.running {
            return Err(RumorError::state("network already running"));
        }
        for node in &self.nodes {
            if node.state().await != NodeState::Unbound {
                return Err(RumorError::state(format!(
                    "node {} has already run; build a new network",
                    node.id()
                )));
            }
        }

        let session = CorrelationId::new();
        info!(session = %session.short(), "Starting gossip network with {} nodes", self.size());
        sink.write_line(&format!("Session {} started with {} nodes", session, self.size()));
        self.session = Some(session);
        self.sink = Some(Arc::clone(&sink));

        let mut pending = Vec::with_capacity(self.nodes.len());
        for node in &self.nodes {
            let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
            let (bound_tx, bound_rx) = oneshot::channel();
            let task = tokio::spawn(Arc::clone(node).run(
                Arc::clone(&sink),
                self.completions.clone(),
                shutdown_rx,
                bound_tx,
            ));
            self.handles.push(NodeHandle {
                shutdown: shutdown_tx,
                task,
            });
            pending.push((node.id(), bound_rx));
        }

        for (node_id, bound_rx) in pending {
            let outcome = bound_rx.await.unwrap_or_else(|_| {
                Err(RumorError::state(format!("node {} exited before binding", node_id)))
            });
            if let Err(e) = outcome {
                error!("Failed to start gossip network: {}", e);
                self.running = true;
                self.stop().await;
                return Err(e);
            }
        }

        self.running = true;
        info!("Gossip network started");
        Ok(())
    }

    /// Stop every node, one at a time, then close the session log
    ///
    /// Each node gets `shutdown_grace` to exit before it is aborted; the next
    /// node is signalled `stop_pacing` later.
    pub async fn stop(&mut self) {
        if !self.running {
            return;
        }

        let wait = self.config.shutdown_grace;
        let pacing = self.config.stop_pacing;
        for (index, handle) in self.handles.drain(..).enumerate() {
            if index > 0 && !pacing.is_zero() {
                sleep(pacing).await;
            }

            let NodeHandle { shutdown, mut task } = handle;
            let _ = shutdown.send(()).await;

            match timeout(wait, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("Node {} task failed: {}", index, e),
                Err(_) => {
                    warn!("Node {} did not stop within {:?}, aborting", index, wait);
                    task.abort();
                }
            }
        }

        if let Some(sink) = self.sink.take() {
            sink.close();
        }
        if let Some(session) = self.session.take() {
            info!(session = %session.short(), "Gossip network stopped");
        }
        self.running = false;
    }

    /// Originate `message` at node `node_id`
    pub async fn make_rumour(&self, node_id: NodeId, message: Message) -> Result<(), RumorError> {
        let node = self
            .nodes
            .get(node_id)
            .ok_or(RumorError::UnknownNode { node_id })?;

        let rumor_id = message.id;
        let convergence = node.inject_rumor(message, self.size()).await?;
        info!(node_id, rumor_id, "New rumor injected");

        if let Some(sink) = &self.sink {
            sink.write_line(&format!("[NODE {}] new rumor {}", node_id, rumor_id));
        }
        // A one-node network is fully acked by its own injection.
        if let Some(convergence) = convergence {
            match self.sink.as_deref() {
                Some(sink) => report_convergence(&convergence, sink, self.completions.as_ref()),
                None => {
                    if let Some(tx) = &self.completions {
                        let _ = tx.send(convergence);
                    }
                }
            }
        }

        Ok(())
    }

    pub fn size(&self) -> usize {
        self.nodes.len()
    }

    pub fn node(&self, node_id: NodeId) -> Option<&Arc<NodeRuntime>> {
        self.nodes.get(node_id)
    }

    pub fn nodes(&self) -> &[Arc<NodeRuntime>] {
        &self.nodes
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Correlation id of the running session
    pub fn session(&self) -> Option<&CorrelationId> {
        self.session.as_ref()
    }
}

impl Drop for GossipNet {
    fn drop(&mut self) {
        for handle in &self.handles {
            handle.task.abort();
        }
    }
}
