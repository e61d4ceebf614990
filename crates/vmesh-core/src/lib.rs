pub mod clock;
pub mod event;
pub mod id;

pub use clock::{Causality, VectorClock};
pub use event::{EventKind, OrderedEvent};
pub use id::{EventId, NodeId};
