//! Datagram transport driven by a node's event loop
//!
//! A bound [`UdpTransport`] runs two workers: a reader that decodes inbound
//! datagrams into a bounded channel and a writer that sends queued
//! `(message, address)` pairs. Neither knows anything about the protocol.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::config::GossipConfig;
use crate::error::RumorError;
use crate::message::Message;

/// Outbound work item: a message and the address it goes to
pub type Outbound = (Message, SocketAddr);

/// Channel ends handed to the event loop by [`UdpTransport::start`]
#[derive(Debug)]
pub struct TransportChannels {
    /// Decoded inbound messages
    pub inbound: mpsc::Receiver<Message>,
    /// Messages to send
    pub outbound: mpsc::Sender<Outbound>,
}

/// UDP transport for one node
pub struct UdpTransport {
    socket: Arc<UdpSocket>,
    local_addr: SocketAddr,
    read_timeout: Duration,
    max_datagram_size: usize,
    inbound_capacity: usize,
    outbound_capacity: usize,
    shutdown_tx: watch::Sender<bool>,
    workers: Vec<JoinHandle<()>>,
}

impl UdpTransport {
    /// Bind a socket on `addr`
    pub async fn bind(addr: SocketAddr, config: &GossipConfig) -> std::io::Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        let local_addr = socket.local_addr()?;
        let (shutdown_tx, _) = watch::channel(false);

        debug!("UDP transport bound on {}", local_addr);

        Ok(Self {
            socket: Arc::new(socket),
            local_addr,
            read_timeout: config.read_timeout,
            max_datagram_size: config.max_datagram_size,
            inbound_capacity: config.inbound_capacity,
            outbound_capacity: config.outbound_capacity,
            shutdown_tx,
            workers: Vec::new(),
        })
    }

    /// Address the socket is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Whether the reader and writer are running
    pub fn is_running(&self) -> bool {
        !self.workers.is_empty()
    }

    /// Launch the reader and writer workers
    pub fn start(&mut self) -> Result<TransportChannels, RumorError> {
        if self.is_running() {
            return Err(RumorError::state(format!(
                "transport on {} already started",
                self.local_addr
            )));
        }

        let (inbound_tx, inbound_rx) = mpsc::channel(self.inbound_capacity);
        let (outbound_tx, outbound_rx) = mpsc::channel(self.outbound_capacity);

        let reader = Reader {
            socket: Arc::clone(&self.socket),
            inbound: inbound_tx,
            shutdown: self.shutdown_tx.subscribe(),
            read_timeout: self.read_timeout,
            buffer: vec![0u8; self.max_datagram_size],
        };
        let writer = Writer {
            socket: Arc::clone(&self.socket),
            outbound: outbound_rx,
            shutdown: self.shutdown_tx.subscribe(),
            max_datagram_size: self.max_datagram_size,
        };

        self.workers.push(tokio::spawn(reader.run()));
        self.workers.push(tokio::spawn(writer.run()));

        info!("UDP transport started on {}", self.local_addr);

        Ok(TransportChannels {
            inbound: inbound_rx,
            outbound: outbound_tx,
        })
    }

    /// Signal both workers and wait until they have exited
    pub async fn stop(&mut self) {
        if !self.is_running() {
            return;
        }

        let _ = self.shutdown_tx.send(true);
        for worker in self.workers.drain(..) {
            if let Err(e) = worker.await {
                error!("Transport worker on {} failed: {}", self.local_addr, e);
            }
        }

        info!("UDP transport stopped on {}", self.local_addr);
    }
}

impl Drop for UdpTransport {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
    }
}

struct Reader {
    socket: Arc<UdpSocket>,
    inbound: mpsc::Sender<Message>,
    shutdown: watch::Receiver<bool>,
    read_timeout: Duration,
    buffer: Vec<u8>,
}

impl Reader {
    async fn run(mut self) {
        loop {
            if *self.shutdown.borrow() || self.inbound.is_closed() {
                break;
            }

            let (len, src) = match timeout(self.read_timeout, self.socket.recv_from(&mut self.buffer)).await {
                Err(_) => continue,
                Ok(Ok((0, _))) => continue,
                Ok(Ok(received)) => received,
                Ok(Err(e)) => {
                    warn!("UDP receive error: {}", e);
                    continue;
                }
            };

            let message = match Message::from_bytes(&self.buffer[..len]) {
                Ok(message) => message,
                Err(e) => {
                    debug!("Dropping malformed datagram from {}: {}", src, e);
                    continue;
                }
            };

            // A full channel blocks the reader instead of dropping the message.
            tokio::select! {
                sent = self.inbound.send(message) => {
                    if sent.is_err() {
                        break;
                    }
                }
                _ = self.shutdown.changed() => break,
            }
        }

        debug!("UDP reader shutting down");
    }
}

struct Writer {
    socket: Arc<UdpSocket>,
    outbound: mpsc::Receiver<Outbound>,
    shutdown: watch::Receiver<bool>,
    max_datagram_size: usize,
}

impl Writer {
    async fn run(mut self) {
        loop {
            tokio::select! {
                _ = self.shutdown.changed() => break,
                pack = self.outbound.recv() => match pack {
                    Some((message, addr)) => self.send(&message, addr).await,
                    None => break,
                },
            }
        }

        debug!("UDP writer shutting down");
    }

    async fn send(&self, message: &Message, addr: SocketAddr) {
        let bytes = match message.to_bytes() {
            Ok(bytes) => bytes,
            Err(e) => {
                error!("Failed to encode message {}: {}", message.id, e);
                return;
            }
        };

        if bytes.len() > self.max_datagram_size {
            warn!(
                "Message too large: {} bytes (max: {}), not sent to {}",
                bytes.len(),
                self.max_datagram_size,
                addr
            );
            return;
        }

        if let Err(e) = self.socket.send_to(&bytes, addr).await {
            warn!("Failed to send message {} to {}: {}", message.id, addr, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{sleep, Duration};

    fn test_config() -> GossipConfig {
        GossipConfig::default().with_read_timeout(Duration::from_millis(20))
    }

    async fn bound() -> UdpTransport {
        UdpTransport::bind("127.0.0.1:0".parse().unwrap(), &test_config())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_transport_start_stop() {
        let mut transport = bound().await;
        assert!(!transport.is_running());
        assert_ne!(transport.local_addr().port(), 0);

        let _channels = transport.start().unwrap();
        assert!(transport.is_running());
        assert!(transport.start().is_err());

        transport.stop().await;
        assert!(!transport.is_running());
    }

    #[tokio::test]
    async fn test_message_delivery_between_transports() {
        let mut a = bound().await;
        let mut b = bound().await;
        let a_channels = a.start().unwrap();
        let mut b_channels = b.start().unwrap();

        let message = Message::rumor(1, 0, "x");
        a_channels
            .outbound
            .send((message.clone(), b.local_addr()))
            .await
            .unwrap();

        let received = timeout(Duration::from_secs(2), b_channels.inbound.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received, message);

        a.stop().await;
        b.stop().await;
    }

    #[tokio::test]
    async fn test_malformed_datagrams_are_dropped() {
        let mut transport = bound().await;
        let mut channels = transport.start().unwrap();

        let probe = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        probe.send_to(b"garbage", transport.local_addr()).await.unwrap();
        probe
            .send_to(&Message::ack(3, 2).to_bytes().unwrap(), transport.local_addr())
            .await
            .unwrap();

        let received = timeout(Duration::from_secs(2), channels.inbound.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received, Message::ack(3, 2));

        transport.stop().await;
    }

    #[tokio::test]
    async fn test_full_inbound_channel_applies_back_pressure() {
        let config = test_config().with_channel_capacity(1);
        let mut transport = UdpTransport::bind("127.0.0.1:0".parse().unwrap(), &config)
            .await
            .unwrap();
        let mut channels = transport.start().unwrap();

        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        for id in 0..20 {
            peer.send_to(&Message::rumor(id, 0, "x").to_bytes().unwrap(), transport.local_addr())
                .await
                .unwrap();
        }
        sleep(Duration::from_millis(100)).await;

        let mut received = Vec::new();
        while received.len() < 20 {
            let message = timeout(Duration::from_secs(2), channels.inbound.recv())
                .await
                .unwrap()
                .unwrap();
            received.push(message.id);
        }
        received.sort_unstable();
        assert_eq!(received, (0..20).collect::<Vec<u64>>());

        timeout(Duration::from_secs(2), transport.stop()).await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_with_full_inbound_channel() {
        let config = test_config().with_channel_capacity(1);
        let mut transport = UdpTransport::bind("127.0.0.1:0".parse().unwrap(), &config)
            .await
            .unwrap();
        let _channels = transport.start().unwrap();

        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        for id in 0..5 {
            peer.send_to(&Message::rumor(id, 0, "x").to_bytes().unwrap(), transport.local_addr())
                .await
                .unwrap();
        }
        sleep(Duration::from_millis(100)).await;

        timeout(Duration::from_secs(2), transport.stop()).await.unwrap();
    }

    #[tokio::test]
    async fn test_writer_survives_failed_and_oversized_sends() {
        let mut sender = bound().await;
        let mut receiver = bound().await;
        let sender_channels = sender.start().unwrap();
        let mut receiver_channels = receiver.start().unwrap();

        // An IPv6 destination cannot be reached from an IPv4 socket.
        let unreachable: SocketAddr = "[::1]:9".parse().unwrap();
        sender_channels
            .outbound
            .send((Message::rumor(1, 0, "lost"), unreachable))
            .await
            .unwrap();
        sender_channels
            .outbound
            .send((Message::rumor(2, 0, "z".repeat(2000)), receiver.local_addr()))
            .await
            .unwrap();
        sender_channels
            .outbound
            .send((Message::rumor(3, 0, "kept"), receiver.local_addr()))
            .await
            .unwrap();

        let received = timeout(Duration::from_secs(2), receiver_channels.inbound.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received, Message::rumor(3, 0, "kept"));
        assert!(sender.is_running());

        sender.stop().await;
        receiver.stop().await;
    }
}
