//! Local clock engine: increment on send, merge on delivery, and the
//! causal delivery predicate.

use vmesh_core::{NodeId, OrderedEvent, VectorClock};

/// Owns this node's vector clock and decides event deliverability.
///
/// Our own entry moves only when we originate an event. Delivery merges the
/// event's clock entrywise without touching our entry; bumping it on receive
/// would advance our counter invisibly to peers and permanently fail their
/// next-in-sequence check against our later sends.
#[derive(Clone, Debug)]
pub struct ClockEngine {
    node: NodeId,
    local: VectorClock,
}

impl ClockEngine {
    /// Create an engine with an all-zero clock.
    pub fn new(node: NodeId) -> Self {
        ClockEngine {
            node,
            local: VectorClock::new(),
        }
    }

    /// Create an engine seeded from a bootstrap snapshot.
    ///
    /// A joining node adopts the coordinator's clock rather than starting
    /// from zero; otherwise the delivery predicate would reject every event
    /// originated before the join, permanently.
    pub fn with_snapshot(node: NodeId, snapshot: VectorClock) -> Self {
        ClockEngine {
            node,
            local: snapshot,
        }
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    /// Current clock state.
    pub fn clock(&self) -> &VectorClock {
        &self.local
    }

    /// Bump our own entry and return a snapshot to attach to an outgoing
    /// ordered event.
    pub fn stamp(&mut self) -> VectorClock {
        self.local.increment(self.node);
        self.local.clone()
    }

    /// The causal delivery predicate. Pure: no side effects on any outcome.
    ///
    /// An event is deliverable iff
    /// 1. `incoming[origin] == local[origin] + 1` (next in sequence from its
    ///    originator, no gaps), and
    /// 2. `incoming[k] <= local[k]` for every other node `k` (no missing
    ///    third-party dependency).
    pub fn can_deliver(&self, event: &OrderedEvent) -> bool {
        if event.clock.get(event.origin) != self.local.get(event.origin) + 1 {
            return false;
        }
        event
            .clock
            .iter()
            .filter(|&(node, _)| node != event.origin)
            .all(|(node, counter)| counter <= self.local.get(node))
    }

    /// Merge a delivered event's clock into ours, entrywise max. Call only
    /// after `can_deliver` returned true.
    pub fn merge_delivered(&mut self, event: &OrderedEvent) {
        self.local.merge(&event.clock);
    }
}
