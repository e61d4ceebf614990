//! Inbound pipeline: dedupe, gate, buffer, drain.

use crate::dedupe::DuplicateFilter;
use crate::engine::ClockEngine;
use crate::holdback::HoldbackBuffer;
use tracing::{debug, trace};
use vmesh_core::{NodeId, OrderedEvent, VectorClock};

/// Everything between the wire and the application, for ordered events.
///
/// Ingest order: duplicate filter first, then the delivery predicate. A
/// deliverable event is merged immediately and may release buffered
/// successors; a blocked one goes to the hold-back buffer.
#[derive(Debug)]
pub struct CausalPipeline {
    engine: ClockEngine,
    holdback: HoldbackBuffer,
    dedupe: DuplicateFilter,
}

impl CausalPipeline {
    pub fn new(node: NodeId) -> Self {
        CausalPipeline {
            engine: ClockEngine::new(node),
            holdback: HoldbackBuffer::new(),
            dedupe: DuplicateFilter::new(),
        }
    }

    pub fn with_capacities(node: NodeId, holdback: usize, dedupe: usize) -> Self {
        CausalPipeline {
            engine: ClockEngine::new(node),
            holdback: HoldbackBuffer::with_capacity(holdback),
            dedupe: DuplicateFilter::with_capacity(dedupe),
        }
    }

    /// Adopt a bootstrap snapshot. Only meaningful before any event has been
    /// stamped or delivered locally.
    ///
    /// Events buffered before adoption may satisfy the delivery predicate
    /// against the new clock, and no later arrival will re-check them: the
    /// originator's next event would itself block behind them. The hold-back
    /// buffer is therefore drained here and the released events returned.
    pub fn adopt_snapshot(&mut self, snapshot: VectorClock) -> Vec<OrderedEvent> {
        self.engine = ClockEngine::with_snapshot(self.engine.node(), snapshot);
        self.holdback.drain(&mut self.engine)
    }

    pub fn node(&self) -> NodeId {
        self.engine.node()
    }

    pub fn clock(&self) -> &VectorClock {
        self.engine.clock()
    }

    /// Stamp an outgoing event with a fresh clock snapshot.
    pub fn stamp(&mut self) -> VectorClock {
        self.engine.stamp()
    }

    /// Number of events waiting on missing dependencies.
    pub fn pending(&self) -> usize {
        self.holdback.len()
    }

    /// Feed one inbound event. Returns the events that became deliverable,
    /// in delivery order; empty if the event was a replay or is now buffered.
    pub fn ingest(&mut self, event: OrderedEvent) -> Vec<OrderedEvent> {
        if !self.dedupe.insert(event.id) {
            trace!(event = %event.id, origin = %event.origin, "dropping replayed event");
            return Vec::new();
        }

        if self.engine.can_deliver(&event) {
            self.engine.merge_delivered(&event);
            let mut delivered = vec![event];
            delivered.extend(self.holdback.drain(&mut self.engine));
            delivered
        } else {
            debug!(
                event = %event.id,
                origin = %event.origin,
                pending = self.holdback.len() + 1,
                "buffering event with unmet dependencies"
            );
            self.holdback.enqueue(event);
            Vec::new()
        }
    }
}
