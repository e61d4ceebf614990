//! Abstract transport contract and the in-memory fabric.
//!
//! The kernel never opens sockets. It needs exactly three capabilities:
//! unicast to a peer, broadcast to the group, and a stream of inbound bytes.
//! [`MemoryTransport`] provides all three in-process, with per-link failure
//! injection for tests and random loss for simulations.

use async_trait::async_trait;
use parking_lot::RwLock;
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use vmesh_core::NodeId;

#[derive(Clone, Debug, Error)]
pub enum TransportError {
    #[error("peer {0} not reachable")]
    PeerUnreachable(NodeId),
    #[error("send failed: {0}")]
    SendFailed(String),
    #[error("transport closed")]
    Closed,
}

/// The abstract transport the kernel is written against.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Send bytes to one peer.
    async fn send_unicast(&self, to: NodeId, bytes: Vec<u8>) -> Result<(), TransportError>;

    /// Send bytes to every connected peer.
    async fn send_group(&self, bytes: Vec<u8>) -> Result<(), TransportError>;

    /// Take the inbound stream. Panics if taken twice.
    fn subscribe(&self) -> mpsc::Receiver<(NodeId, Vec<u8>)>;
}

/// Kernels take the transport by value; tests that need to keep a handle for
/// failure injection hand the kernel an `Arc` instead.
#[async_trait]
impl<T: Transport> Transport for Arc<T> {
    async fn send_unicast(&self, to: NodeId, bytes: Vec<u8>) -> Result<(), TransportError> {
        (**self).send_unicast(to, bytes).await
    }

    async fn send_group(&self, bytes: Vec<u8>) -> Result<(), TransportError> {
        (**self).send_group(bytes).await
    }

    fn subscribe(&self) -> mpsc::Receiver<(NodeId, Vec<u8>)> {
        (**self).subscribe()
    }
}

type Inbox = mpsc::Sender<(NodeId, Vec<u8>)>;
type SharedInboxes = Arc<RwLock<HashMap<NodeId, Inbox>>>;

/// In-memory transport for tests and simulation.
///
/// Loss injection is per outbound link: `fail_next` drops the next N sends
/// to one peer deterministically, `set_loss_rate` drops a random fraction of
/// everything.
pub struct MemoryTransport {
    local: NodeId,
    links: SharedInboxes,
    inbox_tx: Inbox,
    inbox_rx: RwLock<Option<mpsc::Receiver<(NodeId, Vec<u8>)>>>,
    fail_next: RwLock<HashMap<NodeId, u32>>,
    loss_rate: RwLock<f64>,
}

impl MemoryTransport {
    pub fn new(local: NodeId) -> Self {
        let (tx, rx) = mpsc::channel(256);
        MemoryTransport {
            local,
            links: Arc::new(RwLock::new(HashMap::new())),
            inbox_tx: tx,
            inbox_rx: RwLock::new(Some(rx)),
            fail_next: RwLock::new(HashMap::new()),
            loss_rate: RwLock::new(0.0),
        }
    }

    pub fn local(&self) -> NodeId {
        self.local
    }

    /// Wire two transports together, both directions.
    pub fn connect_to(&self, other: &MemoryTransport) {
        self.links.write().insert(other.local, other.inbox_tx.clone());
        other.links.write().insert(self.local, self.inbox_tx.clone());
    }

    /// Sever both directions of a link, simulating a crash or partition.
    pub fn disconnect_from(&self, other: &MemoryTransport) {
        self.links.write().remove(&other.local);
        other.links.write().remove(&self.local);
    }

    /// Drop the next `count` sends to `peer`.
    pub fn fail_next(&self, peer: NodeId, count: u32) {
        self.fail_next.write().insert(peer, count);
    }

    /// Drop a random fraction of all sends.
    pub fn set_loss_rate(&self, rate: f64) {
        *self.loss_rate.write() = rate.clamp(0.0, 1.0);
    }

    fn should_drop(&self, to: NodeId) -> bool {
        {
            let mut failures = self.fail_next.write();
            if let Some(remaining) = failures.get_mut(&to) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return true;
                }
            }
        }
        let rate = *self.loss_rate.read();
        rate > 0.0 && rand::thread_rng().gen_bool(rate)
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send_unicast(&self, to: NodeId, bytes: Vec<u8>) -> Result<(), TransportError> {
        let tx = self.links.read().get(&to).cloned();
        let Some(tx) = tx else {
            return Err(TransportError::PeerUnreachable(to));
        };
        if self.should_drop(to) {
            return Ok(());
        }
        tx.send((self.local, bytes))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn send_group(&self, bytes: Vec<u8>) -> Result<(), TransportError> {
        let targets: Vec<(NodeId, Inbox)> = self
            .links
            .read()
            .iter()
            .map(|(&id, tx)| (id, tx.clone()))
            .collect();

        for (id, tx) in targets {
            if self.should_drop(id) {
                continue;
            }
            // A closed inbox means the peer is gone; that is its problem.
            let _ = tx.send((self.local, bytes.clone())).await;
        }
        Ok(())
    }

    fn subscribe(&self) -> mpsc::Receiver<(NodeId, Vec<u8>)> {
        self.inbox_rx
            .write()
            .take()
            .expect("subscribe can only be called once")
    }
}

/// Fully connected mesh of memory transports.
pub fn memory_network(ids: &[NodeId]) -> Vec<MemoryTransport> {
    let transports: Vec<_> = ids.iter().map(|&id| MemoryTransport::new(id)).collect();
    for i in 0..transports.len() {
        for j in (i + 1)..transports.len() {
            transports[i].connect_to(&transports[j]);
        }
    }
    transports
}
