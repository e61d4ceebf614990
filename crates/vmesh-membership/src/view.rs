//! The shared membership view.

use crate::peer::PeerRecord;
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::info;
use vmesh_core::NodeId;

/// The set of known peers plus the current coordinator.
///
/// This is the single point of mutation shared by the failure detector, the
/// election logic and the bootstrap exchange. The kernel serializes access by
/// wrapping it in one mutex; the type itself is plain state.
#[derive(Debug)]
pub struct MembershipView {
    local: NodeId,
    peers: BTreeMap<NodeId, PeerRecord>,
    coordinator: Option<NodeId>,
}

impl MembershipView {
    pub fn new(local: NodeId) -> Self {
        MembershipView {
            local,
            peers: BTreeMap::new(),
            coordinator: None,
        }
    }

    pub fn local(&self) -> NodeId {
        self.local
    }

    pub fn coordinator(&self) -> Option<NodeId> {
        self.coordinator
    }

    pub fn is_coordinator(&self) -> bool {
        self.coordinator == Some(self.local)
    }

    pub fn set_coordinator(&mut self, id: NodeId) {
        if self.coordinator != Some(id) {
            info!(coordinator = %id, "coordinator installed");
        }
        self.coordinator = Some(id);
    }

    pub fn clear_coordinator(&mut self) {
        self.coordinator = None;
    }

    /// Record contact from a peer, creating its record on first sight.
    /// Any inbound message from an unknown id counts as first contact.
    /// Callers never pass the local id; our own record is implicit.
    pub fn observe(&mut self, id: NodeId, now: Instant) -> &mut PeerRecord {
        self.peers.entry(id).or_insert_with(|| {
            info!(peer = %id, "first contact with peer");
            PeerRecord::new(id, now)
        })
    }

    pub fn get(&self, id: NodeId) -> Option<&PeerRecord> {
        self.peers.get(&id)
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut PeerRecord> {
        self.peers.get_mut(&id)
    }

    /// Remove a peer outright (graceful leave). Returns its last record.
    pub fn remove(&mut self, id: NodeId) -> Option<PeerRecord> {
        if self.coordinator == Some(id) {
            self.coordinator = None;
        }
        self.peers.remove(&id)
    }

    /// All known peer ids, regardless of liveness.
    pub fn peer_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.peers.keys().copied()
    }

    /// Peers currently believed alive.
    pub fn active_peers(&self) -> impl Iterator<Item = &PeerRecord> {
        self.peers.values().filter(|p| p.is_active())
    }

    /// Active peers with a strictly higher id than ours, the candidates an
    /// election must defer to.
    pub fn higher_peers(&self) -> Vec<NodeId> {
        self.peers
            .values()
            .filter(|p| p.is_active() && p.id > self.local)
            .map(|p| p.id)
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PeerRecord> {
        self.peers.values()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}
