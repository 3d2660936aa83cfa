//! # rumormesh - Rumor/Ack Broadcast Simulation over Loopback UDP
//!
//! rumormesh runs a network of gossip nodes inside one process. Every node
//! owns a UDP port on the loopback interface and talks to its overlay
//! neighbors only. A rumor injected at one node spreads epidemically; every
//! node that learns it answers with an ack that spreads the same way, and the
//! originator reports how many rounds it took until every node had acked.
//!
//! ## Core Features
//!
//! - **Round-based gossip**: at most one rumor and one ack sent per node per round
//! - **Bounded retransmission**: every queued item is sent at most `ttl` times
//! - **Ack tracking**: originators keep a per-node ack bitmap and report convergence once
//! - **Pluggable overlays**: random bounded-degree graphs or caller-supplied topologies
//! - **Session logs**: one timestamped log file per network session
//!
//! ## Examples
//!
//! ### Measuring Convergence
//!
//! ```rust,no_run
//! use rumormesh::{GossipNet, Message};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // 50 nodes, random overlay, 100 ms rounds
//!     let mut net = GossipNet::init_net(50, Duration::from_millis(100))?;
//!     let mut feedback = net.set_test_mode()?;
//!
//!     net.start("logs").await?;
//!     net.make_rumour(0, Message::rumor(1, 0, "initial message")).await?;
//!
//!     if let Some(convergence) = feedback.recv().await {
//!         println!("Rumor {} acked by all nodes after {} rounds", convergence.rumor_id, convergence.rounds);
//!     }
//!
//!     net.stop().await;
//!     Ok(())
//! }
//! ```
//!
//! ### Custom Topology and Logging
//!
//! ```rust,no_run
//! use rumormesh::{init_logging, development_config, GossipConfig, GossipNet, MemoryLog, Message, Topology};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     init_logging(&development_config())?;
//!
//!     let topology = Topology::fully_connected(4, 9080)?;
//!     let config = GossipConfig::default()
//!         .with_round_interval(Duration::from_millis(20))
//!         .with_ttl(20);
//!
//!     let mut net = GossipNet::build(&topology, config)?;
//!     let log = Arc::new(MemoryLog::new());
//!     net.start_with_sink(log.clone()).await?;
//!
//!     net.make_rumour(2, Message::rumor(7, 2, "hello")).await?;
//!     tokio::time::sleep(Duration::from_secs(1)).await;
//!     net.stop().await;
//!
//!     for line in log.lines() {
//!         println!("{}", line);
//!     }
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod logging;
pub mod message;
pub mod network;
pub mod node;
pub mod processor;
pub mod queue;
pub mod topology;
pub mod transport;

// Re-export main types for convenience
pub use config::{GossipConfig, BASE_PORT, DEFAULT_TTL};
pub use error::RumorError;
pub use logging::{
    development_config, init_logging, production_config, CorrelationId, LogConfig, LogSink,
    MemoryLog, SessionLog,
};
pub use message::{Message, MessageKind, NodeId};
pub use network::GossipNet;
pub use node::{NodeRuntime, NodeState, NodeStats};
pub use processor::{Convergence, NodeProcessor, ProcessorStats};
pub use queue::DistributionQueue;
pub use topology::{Neighbor, RandomTopology, Topology, TopologyEntry, TopologyProvider};
pub use transport::{TransportChannels, UdpTransport};

/// Result type alias for rumormesh operations
pub type Result<T> = std::result::Result<T, RumorError>;
