//! Group membership and liveness.
//!
//! [`MembershipView`] is the single shared record of who is in the group and
//! who coordinates it. [`FailureDetector`] drives per-peer liveness through
//! the two-phase ACTIVE / SUSPECTED / FAILED machine from periodic sweeps.
//! Both are pure state: the kernel owns the clocking, the locking and the
//! network.

pub mod detector;
pub mod peer;
pub mod view;

pub use detector::{DetectorEvent, FailureDetector, ProbeOutcome};
pub use peer::{Liveness, PeerRecord};
pub use view::MembershipView;
