//! Hold-back buffer for events whose causal prerequisites are missing.

use crate::engine::ClockEngine;
use std::collections::{HashMap, VecDeque};
use tracing::{debug, warn};
use vmesh_core::{NodeId, OrderedEvent};

/// Default capacity; overridable through the kernel config.
pub const DEFAULT_CAPACITY: usize = 1024;

/// Buffer of not-yet-deliverable events, keyed by originator.
///
/// Capacity is bounded: on overflow the oldest entry of the longest
/// per-origin queue is evicted with a warning. The evicted gap is recoverable
/// only through the bootstrap path, which is why eviction is loud.
#[derive(Debug)]
pub struct HoldbackBuffer {
    by_origin: HashMap<NodeId, VecDeque<OrderedEvent>>,
    len: usize,
    capacity: usize,
}

impl HoldbackBuffer {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        HoldbackBuffer {
            by_origin: HashMap::new(),
            len: 0,
            capacity: capacity.max(1),
        }
    }

    /// Buffer an event until its dependencies arrive.
    ///
    /// Entries for one originator are kept sorted by the originator's own
    /// counter so the fixed-point drain pops them in sender order. An event
    /// whose counter is already buffered for that originator is a replay
    /// whose id aged out of the duplicate filter; it is dropped rather than
    /// left to linger behind the copy that will deliver.
    pub fn enqueue(&mut self, event: OrderedEvent) {
        let own = event.clock.get(event.origin);
        if let Some(queue) = self.by_origin.get(&event.origin) {
            if queue.iter().any(|buffered| buffered.clock.get(buffered.origin) == own) {
                debug!(
                    origin = %event.origin,
                    event = %event.id,
                    "dropping replay of an already-buffered counter"
                );
                return;
            }
        }

        if self.len >= self.capacity {
            self.evict_one();
        }

        let queue = self.by_origin.entry(event.origin).or_default();
        let pos = queue
            .iter()
            .position(|buffered| buffered.clock.get(buffered.origin) > own)
            .unwrap_or(queue.len());
        queue.insert(pos, event);
        self.len += 1;
    }

    /// Re-evaluate everything against the current clock, repeatedly, until a
    /// fixed point: delivering one event may unblock others from the same or
    /// a different originator. Returns the newly deliverable events in
    /// delivery order. Invoking with nothing newly deliverable is a no-op.
    pub fn drain(&mut self, engine: &mut ClockEngine) -> Vec<OrderedEvent> {
        let mut delivered = Vec::new();

        loop {
            let mut progressed = false;

            let origins: Vec<NodeId> = self.by_origin.keys().copied().collect();
            for origin in origins {
                let Some(queue) = self.by_origin.get_mut(&origin) else {
                    continue;
                };
                while matches!(queue.front(), Some(front) if engine.can_deliver(front)) {
                    if let Some(event) = queue.pop_front() {
                        engine.merge_delivered(&event);
                        self.len -= 1;
                        delivered.push(event);
                        progressed = true;
                    }
                }
            }

            if !progressed {
                break;
            }
        }

        self.by_origin.retain(|_, queue| !queue.is_empty());
        delivered
    }

    /// Number of buffered events.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn evict_one(&mut self) {
        let victim_origin = self
            .by_origin
            .iter()
            .max_by_key(|(_, queue)| queue.len())
            .map(|(&origin, _)| origin);

        if let Some(origin) = victim_origin {
            if let Some(queue) = self.by_origin.get_mut(&origin) {
                if let Some(evicted) = queue.pop_front() {
                    self.len -= 1;
                    warn!(
                        origin = %evicted.origin,
                        event = %evicted.id,
                        "hold-back buffer full, evicting oldest entry"
                    );
                }
            }
        }
    }
}

impl Default for HoldbackBuffer {
    fn default() -> Self {
        Self::new()
    }
}
