//! Causally-ordered application events.
//!
//! `OrderedEvent` is the only thing that participates in vector-clock
//! ordering. Liveness probes (heartbeats) are deliberately not representable
//! here: they live in the kernel's wire layer as a clock-less frame, so the
//! two channels cannot be mixed by construction.

use crate::clock::VectorClock;
use crate::id::{EventId, NodeId};
use serde::{Deserialize, Serialize};

/// Closed set of ordered event kinds.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    /// Application-level payload (e.g. a trade protocol message).
    App,
    /// A node joined the group.
    PeerJoined,
    /// A node left the group gracefully.
    PeerLeft,
}

/// An event that participates in causal ordering.
///
/// Carries the originator's clock as it was at send time. Receivers gate
/// delivery on this snapshot and merge it into their own clock on delivery.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OrderedEvent {
    /// The node that originated the event.
    pub origin: NodeId,
    /// The originator's vector clock, snapshotted at send time.
    pub clock: VectorClock,
    /// Unique id, stable across retransmissions.
    pub id: EventId,
    pub kind: EventKind,
    /// Opaque application payload.
    pub payload: serde_json::Value,
}

impl OrderedEvent {
    pub fn new(
        origin: NodeId,
        clock: VectorClock,
        kind: EventKind,
        payload: serde_json::Value,
    ) -> Self {
        OrderedEvent {
            origin,
            clock,
            id: EventId::generate(),
            kind,
            payload,
        }
    }
}
