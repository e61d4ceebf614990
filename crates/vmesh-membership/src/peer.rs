//! Per-peer liveness records.

use std::time::Instant;
use vmesh_core::NodeId;

/// Two-phase liveness state.
///
/// `Failed` is terminal as far as timeouts go; a failed peer comes back only
/// through a fresh probe, which the kernel treats as a rejoin.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Liveness {
    Active,
    Suspected,
    Failed,
}

impl std::fmt::Display for Liveness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Liveness::Active => write!(f, "active"),
            Liveness::Suspected => write!(f, "suspected"),
            Liveness::Failed => write!(f, "failed"),
        }
    }
}

/// What we know about one peer.
#[derive(Clone, Debug)]
pub struct PeerRecord {
    pub id: NodeId,
    pub liveness: Liveness,
    /// When the last liveness probe (or first contact) arrived.
    pub last_seen: Instant,
}

impl PeerRecord {
    pub fn new(id: NodeId, now: Instant) -> Self {
        PeerRecord {
            id,
            liveness: Liveness::Active,
            last_seen: now,
        }
    }

    pub fn is_active(&self) -> bool {
        self.liveness == Liveness::Active
    }
}
