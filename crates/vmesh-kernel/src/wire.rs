//! Wire frames and their JSON codec.
//!
//! A closed tagged enum, not string dispatch: unknown types fail decoding in
//! one place. `Heartbeat` structurally has no clock field; only `Event`
//! frames carry one, inside the [`OrderedEvent`]. The liveness and causal
//! channels therefore cannot be conflated by construction.

use serde::{Deserialize, Serialize};
use vmesh_core::{EventId, NodeId, OrderedEvent, VectorClock};

/// Everything that crosses the wire.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Frame {
    /// Liveness probe. No clock, ever.
    Heartbeat { sender: NodeId },
    /// Bully challenge to a higher peer.
    Election { sender: NodeId },
    /// Suppression reply to a lower challenger.
    Ok { sender: NodeId },
    /// Leadership claim, broadcast with group reliability.
    Coordinator { sender: NodeId, epoch: u64 },
    /// A new member announcing itself. The joiner has no clock yet.
    Join { sender: NodeId },
    /// Bootstrap snapshot answering a `Join`.
    JoinResponse {
        sender: NodeId,
        clock: VectorClock,
        coordinator: Option<NodeId>,
        peers: Vec<NodeId>,
    },
    /// Graceful departure; bypasses the failure detector's timeouts.
    Leave { sender: NodeId },
    /// A causally ordered event. `ack` asks the receiver to confirm by id,
    /// for point-to-point reliable exchanges.
    Event { event: OrderedEvent, ack: bool },
    /// Confirmation of an `Event` sent with `ack: true`.
    Ack { sender: NodeId, message_id: EventId },
}

impl Frame {
    /// The node the frame came from.
    pub fn sender(&self) -> NodeId {
        match self {
            Frame::Heartbeat { sender }
            | Frame::Election { sender }
            | Frame::Ok { sender }
            | Frame::Coordinator { sender, .. }
            | Frame::Join { sender }
            | Frame::JoinResponse { sender, .. }
            | Frame::Leave { sender }
            | Frame::Ack { sender, .. } => *sender,
            Frame::Event { event, .. } => event.origin,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Frame, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}
