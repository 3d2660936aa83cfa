//! Configuration for gossip nodes and the network coordinator

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use crate::error::RumorError;

/// Retransmit budget given to every queued rumor or ack
pub const DEFAULT_TTL: u32 = 10;

/// First port handed out by generated topologies
pub const BASE_PORT: u16 = 9080;

/// Configuration shared by every node of a simulated network
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GossipConfig {
    /// Interval between gossip rounds
    pub round_interval: Duration,
    /// Socket read timeout; bounds how long the reader takes to notice shutdown
    pub read_timeout: Duration,
    /// Number of times one queued item may be dequeued before it is dropped
    pub ttl: u32,
    /// Capacity of the reader -> event loop channel
    pub inbound_capacity: usize,
    /// Capacity of the event loop -> writer channel
    pub outbound_capacity: usize,
    /// Largest datagram the transport reads or writes
    pub max_datagram_size: usize,
    /// Delay between per-node shutdown signals
    pub stop_pacing: Duration,
    /// How long `stop` waits for one node to exit before aborting it
    pub shutdown_grace: Duration,
    /// Address every node binds to and every neighbor is reached at
    pub bind_host: IpAddr,
}

impl Default for GossipConfig {
    fn default() -> Self {
        Self {
            round_interval: Duration::from_millis(100),
            read_timeout: Duration::from_millis(100),
            ttl: DEFAULT_TTL,
            inbound_capacity: 100,
            outbound_capacity: 100,
            max_datagram_size: 1024,
            stop_pacing: Duration::from_millis(50),
            shutdown_grace: Duration::from_secs(2),
            bind_host: IpAddr::V4(Ipv4Addr::LOCALHOST),
        }
    }
}

impl GossipConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the gossip round interval
    pub fn with_round_interval(mut self, interval: Duration) -> Self {
        self.round_interval = interval;
        self
    }

    /// Set the socket read timeout
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Set the retransmit budget of queued items
    pub fn with_ttl(mut self, ttl: u32) -> Self {
        self.ttl = ttl;
        self
    }

    /// Set both internal channel capacities
    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.inbound_capacity = capacity;
        self.outbound_capacity = capacity;
        self
    }

    /// Set the delay between per-node shutdown signals
    pub fn with_stop_pacing(mut self, pacing: Duration) -> Self {
        self.stop_pacing = pacing;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), RumorError> {
        if self.round_interval.is_zero() {
            return Err(RumorError::config("Round interval must be greater than zero"));
        }

        if self.read_timeout.is_zero() {
            return Err(RumorError::config("Read timeout must be greater than zero"));
        }

        if self.ttl == 0 {
            return Err(RumorError::config("TTL must be greater than zero"));
        }

        if self.inbound_capacity == 0 || self.outbound_capacity == 0 {
            return Err(RumorError::config("Channel capacities must be greater than zero"));
        }

        if self.max_datagram_size < 64 {
            return Err(RumorError::config("Max datagram size must be at least 64 bytes"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = GossipConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.ttl, DEFAULT_TTL);
        assert_eq!(config.round_interval, Duration::from_millis(100));
        assert!(config.bind_host.is_loopback());
    }

    #[test]
    fn test_config_builder() {
        let config = GossipConfig::new()
            .with_round_interval(Duration::from_millis(20))
            .with_ttl(4)
            .with_channel_capacity(8);

        assert_eq!(config.round_interval, Duration::from_millis(20));
        assert_eq!(config.ttl, 4);
        assert_eq!(config.inbound_capacity, 8);
        assert_eq!(config.outbound_capacity, 8);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let config = GossipConfig::default().with_round_interval(Duration::ZERO);
        assert!(config.validate().is_err());

        let config = GossipConfig::default().with_ttl(0);
        assert!(config.validate().is_err());

        let config = GossipConfig::default().with_channel_capacity(0);
        assert!(config.validate().is_err());

        let mut config = GossipConfig::default();
        config.max_datagram_size = 16;
        assert!(config.validate().is_err());
    }
}
