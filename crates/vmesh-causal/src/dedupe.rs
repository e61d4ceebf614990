//! Duplicate suppression for retransmitted events.

use std::collections::{HashSet, VecDeque};
use vmesh_core::EventId;

pub const DEFAULT_CAPACITY: usize = 4096;

/// Bounded LRU cache of recently seen event ids.
///
/// Reliable transmission repeats every event, so each receiver must drop
/// replays before they hit the clock. The cache is bounded; once an id ages
/// out, a replay of a delivered event is rejected by the delivery predicate
/// (its counter is no longer `local + 1`) and a replay of a still-buffered
/// one by the hold-back buffer's per-counter check.
#[derive(Debug)]
pub struct DuplicateFilter {
    seen: HashSet<EventId>,
    seen_order: VecDeque<EventId>,
    capacity: usize,
}

impl DuplicateFilter {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        DuplicateFilter {
            seen: HashSet::new(),
            seen_order: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    /// Record an id. Returns true if it was fresh, false for a replay.
    pub fn insert(&mut self, id: EventId) -> bool {
        if self.seen.contains(&id) {
            return false;
        }
        if self.seen_order.len() >= self.capacity {
            if let Some(oldest) = self.seen_order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        self.seen.insert(id);
        self.seen_order.push_back(id);
        true
    }

    pub fn contains(&self, id: &EventId) -> bool {
        self.seen.contains(id)
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

impl Default for DuplicateFilter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replay_is_rejected() {
        let mut filter = DuplicateFilter::new();
        let id = EventId::generate();
        assert!(filter.insert(id));
        assert!(!filter.insert(id));
    }

    #[test]
    fn distinct_ids_are_fresh() {
        let mut filter = DuplicateFilter::new();
        assert!(filter.insert(EventId::generate()));
        assert!(filter.insert(EventId::generate()));
        assert_eq!(filter.len(), 2);
    }

    #[test]
    fn oldest_id_ages_out_at_capacity() {
        let mut filter = DuplicateFilter::with_capacity(2);
        let a = EventId::generate();
        let b = EventId::generate();
        let c = EventId::generate();

        filter.insert(a);
        filter.insert(b);
        filter.insert(c);

        assert!(!filter.contains(&a));
        assert!(filter.contains(&b));
        assert!(filter.contains(&c));
        assert_eq!(filter.len(), 2);
    }
}
