//! Causal delivery engine.
//!
//! Three cooperating pieces, all pure logic with no I/O:
//!
//! - [`ClockEngine`]: the local vector clock plus the delivery predicate.
//! - [`HoldbackBuffer`]: events whose causal prerequisites have not arrived.
//! - [`DuplicateFilter`]: bounded recent-id cache for at-most-once delivery.
//!
//! [`CausalPipeline`] wires them together: feed it every inbound ordered
//! event and it returns the events that became deliverable, in order.

pub mod dedupe;
pub mod engine;
pub mod holdback;
pub mod pipeline;

pub use dedupe::DuplicateFilter;
pub use engine::ClockEngine;
pub use holdback::HoldbackBuffer;
pub use pipeline::CausalPipeline;
