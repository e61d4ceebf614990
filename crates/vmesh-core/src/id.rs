//! Node and event identifiers.

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unique identifier for a node in the cluster.
///
/// Assigned out-of-band, one per process. The numeric value doubles as the
/// node's election priority: a higher `NodeId` always wins a Bully election.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub u32);

impl NodeId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "node-{}", self.0)
    }
}

impl From<u32> for NodeId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

/// Unique identifier for a single event or wire message.
///
/// Stable across retransmissions: every retry of a reliable send carries the
/// same `EventId` so receivers can suppress duplicates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(pub Ulid);

impl EventId {
    /// Generate a fresh id.
    pub fn generate() -> Self {
        Self(Ulid::new())
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
