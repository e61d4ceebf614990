//! Vector clock for tracking causality between events.
//!
//! Each node owns one clock; there is no shared or global clock. Entries map
//! `NodeId -> counter` and only ever move upward. Entries are never removed,
//! even for peers declared failed: events already buffered may still depend
//! on that peer's counter, and removing the entry would invalidate their
//! delivery predicates.

use crate::id::NodeId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Causal relationship between two vector clocks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Causality {
    /// `self` happened before the other clock.
    Before,
    /// `self` happened after the other clock.
    After,
    /// The clocks are identical.
    Equal,
    /// Neither clock dominates the other.
    Concurrent,
}

/// Map from node id to the highest counter seen from that node.
///
/// Absent entries read as zero, which keeps dynamic membership cheap: a node
/// nobody has heard from yet is indistinguishable from an explicit zero.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VectorClock {
    entries: BTreeMap<NodeId, u64>,
}

impl VectorClock {
    /// Create an empty clock.
    pub fn new() -> Self {
        VectorClock {
            entries: BTreeMap::new(),
        }
    }

    /// Create a clock from explicit entries; zero entries are dropped.
    pub fn from_entries(entries: impl IntoIterator<Item = (NodeId, u64)>) -> Self {
        VectorClock {
            entries: entries.into_iter().filter(|(_, c)| *c > 0).collect(),
        }
    }

    /// Get the counter for a node (zero if absent).
    pub fn get(&self, node: NodeId) -> u64 {
        self.entries.get(&node).copied().unwrap_or(0)
    }

    /// Set the counter for a node.
    pub fn set(&mut self, node: NodeId, counter: u64) {
        if counter > 0 {
            self.entries.insert(node, counter);
        }
    }

    /// Increment the counter for a node, returning the new value.
    pub fn increment(&mut self, node: NodeId) -> u64 {
        let entry = self.entries.entry(node).or_insert(0);
        *entry += 1;
        *entry
    }

    /// Merge another clock in (entrywise max). Entries never decrease.
    pub fn merge(&mut self, other: &VectorClock) {
        for (&node, &counter) in &other.entries {
            let current = self.entries.entry(node).or_insert(0);
            *current = (*current).max(counter);
        }
    }

    /// Return a merged copy without modifying `self`.
    pub fn merged_with(&self, other: &VectorClock) -> VectorClock {
        let mut result = self.clone();
        result.merge(other);
        result
    }

    /// True if for every node, `self[n] >= other[n]`.
    pub fn dominates(&self, other: &VectorClock) -> bool {
        other
            .entries
            .iter()
            .all(|(&node, &counter)| self.get(node) >= counter)
    }

    /// Determine the causal relationship to another clock.
    pub fn compare(&self, other: &VectorClock) -> Causality {
        let mut less = false;
        let mut greater = false;

        for &node in self.entries.keys().chain(other.entries.keys()) {
            let a = self.get(node);
            let b = other.get(node);
            if a < b {
                less = true;
            } else if a > b {
                greater = true;
            }
        }

        match (less, greater) {
            (true, false) => Causality::Before,
            (false, true) => Causality::After,
            (false, false) => Causality::Equal,
            (true, true) => Causality::Concurrent,
        }
    }

    /// Iterate over the non-zero entries.
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, u64)> + '_ {
        self.entries.iter().map(|(&n, &c)| (n, c))
    }

    /// Number of nodes tracked.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Display for VectorClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[")?;
        for (i, (node, counter)) in self.entries.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}:{}", node.0, counter)?;
        }
        write!(f, "]")
    }
}
