//! Two-phase failure detection driven by periodic sweeps.
//!
//! Pure state machine over the membership view: the kernel calls
//! [`FailureDetector::record_probe`] for every inbound liveness probe and
//! [`FailureDetector::sweep`] on a timer, and executes the returned events
//! (notifying the application, triggering an election on coordinator loss).
//! Probes never touch the vector clock.

use crate::peer::Liveness;
use crate::view::MembershipView;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use vmesh_core::NodeId;

/// What a sweep or probe observed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DetectorEvent {
    PeerSuspected(NodeId),
    PeerFailed { peer: NodeId, was_coordinator: bool },
}

/// Classification of an inbound probe.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// First contact with this peer.
    New,
    /// Ordinary refresh of an active peer.
    Refreshed,
    /// The peer was suspected; suspicion cleared.
    Recovered,
    /// The peer was already declared failed. It must rejoin through the
    /// bootstrap exchange rather than silently resume.
    Rejoined,
}

/// Sweeps peers through ACTIVE -> SUSPECTED -> FAILED.
///
/// One `timeout` with no probe moves a peer to SUSPECTED; a second `timeout`
/// while still SUSPECTED moves it to FAILED. The timeout trades detection
/// latency against false suspicion under jitter; it is a tunable, not a
/// correctness parameter.
#[derive(Debug)]
pub struct FailureDetector {
    timeout: Duration,
}

impl FailureDetector {
    pub fn new(timeout: Duration) -> Self {
        FailureDetector { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Apply an inbound liveness probe from `peer`.
    pub fn record_probe(
        &self,
        view: &mut MembershipView,
        peer: NodeId,
        now: Instant,
    ) -> ProbeOutcome {
        let known = view.get(peer).is_some();
        let record = view.observe(peer, now);
        if !known {
            return ProbeOutcome::New;
        }

        let previous = record.liveness;
        record.liveness = Liveness::Active;
        record.last_seen = now;

        match previous {
            Liveness::Active => ProbeOutcome::Refreshed,
            Liveness::Suspected => {
                info!(peer = %peer, "suspected peer recovered");
                ProbeOutcome::Recovered
            }
            Liveness::Failed => {
                warn!(peer = %peer, "probe from failed peer, treating as rejoin");
                ProbeOutcome::Rejoined
            }
        }
    }

    /// Advance every peer's state against `now`. Emits one event per
    /// transition; peers already FAILED stay put.
    pub fn sweep(&self, view: &mut MembershipView, now: Instant) -> Vec<DetectorEvent> {
        let coordinator = view.coordinator();
        let mut events = Vec::new();
        let mut lost_coordinator = false;

        for id in view.peer_ids().collect::<Vec<_>>() {
            let Some(record) = view.get_mut(id) else {
                continue;
            };
            let silent_for = now.saturating_duration_since(record.last_seen);

            match record.liveness {
                Liveness::Active if silent_for > self.timeout => {
                    record.liveness = Liveness::Suspected;
                    warn!(peer = %id, silent_ms = silent_for.as_millis() as u64, "peer suspected");
                    events.push(DetectorEvent::PeerSuspected(id));
                }
                Liveness::Suspected if silent_for > self.timeout * 2 => {
                    record.liveness = Liveness::Failed;
                    let was_coordinator = coordinator == Some(id);
                    warn!(peer = %id, was_coordinator, "peer declared failed");
                    events.push(DetectorEvent::PeerFailed {
                        peer: id,
                        was_coordinator,
                    });
                    lost_coordinator |= was_coordinator;
                }
                _ => {}
            }
        }

        if lost_coordinator {
            view.clear_coordinator();
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(6);

    fn setup(peer: u32) -> (FailureDetector, MembershipView, Instant) {
        let detector = FailureDetector::new(TIMEOUT);
        let mut view = MembershipView::new(NodeId(1));
        let start = Instant::now();
        view.observe(NodeId(peer), start);
        (detector, view, start)
    }

    fn liveness(view: &MembershipView, peer: u32) -> Liveness {
        view.get(NodeId(peer)).map(|p| p.liveness).unwrap()
    }

    #[test]
    fn quiet_peer_is_suspected_after_one_timeout() {
        let (detector, mut view, start) = setup(2);

        assert!(detector.sweep(&mut view, start + TIMEOUT).is_empty());
        let events = detector.sweep(&mut view, start + TIMEOUT + Duration::from_millis(1));
        assert_eq!(events, vec![DetectorEvent::PeerSuspected(NodeId(2))]);
        assert_eq!(liveness(&view, 2), Liveness::Suspected);
    }

    #[test]
    fn silent_for_two_timeouts_means_failed() {
        let (detector, mut view, start) = setup(2);

        detector.sweep(&mut view, start + TIMEOUT + Duration::from_millis(1));
        let events = detector.sweep(&mut view, start + TIMEOUT * 2 + Duration::from_millis(1));
        assert_eq!(
            events,
            vec![DetectorEvent::PeerFailed {
                peer: NodeId(2),
                was_coordinator: false
            }]
        );
        assert_eq!(liveness(&view, 2), Liveness::Failed);
    }

    #[test]
    fn probe_between_timeouts_resets_to_active() {
        let (detector, mut view, start) = setup(2);

        detector.sweep(&mut view, start + TIMEOUT + Duration::from_millis(1));
        assert_eq!(liveness(&view, 2), Liveness::Suspected);

        let probe_at = start + TIMEOUT + Duration::from_secs(2);
        let outcome = detector.record_probe(&mut view, NodeId(2), probe_at);
        assert_eq!(outcome, ProbeOutcome::Recovered);
        assert_eq!(liveness(&view, 2), Liveness::Active);

        // No FAILED transition occurs afterwards: the window restarts.
        let events = detector.sweep(&mut view, start + TIMEOUT * 2 + Duration::from_millis(1));
        assert!(events.is_empty());
    }

    #[test]
    fn failed_coordinator_raises_the_flag_and_clears_the_view() {
        let (detector, mut view, start) = setup(2);
        view.set_coordinator(NodeId(2));

        detector.sweep(&mut view, start + TIMEOUT + Duration::from_millis(1));
        let events = detector.sweep(&mut view, start + TIMEOUT * 2 + Duration::from_millis(1));
        assert_eq!(
            events,
            vec![DetectorEvent::PeerFailed {
                peer: NodeId(2),
                was_coordinator: true
            }]
        );
        assert_eq!(view.coordinator(), None);
    }

    #[test]
    fn failed_peer_revives_only_as_rejoin() {
        let (detector, mut view, start) = setup(2);

        detector.sweep(&mut view, start + TIMEOUT + Duration::from_millis(1));
        detector.sweep(&mut view, start + TIMEOUT * 2 + Duration::from_millis(1));
        assert_eq!(liveness(&view, 2), Liveness::Failed);

        // Further sweeps emit nothing for a failed peer.
        assert!(detector
            .sweep(&mut view, start + TIMEOUT * 10)
            .is_empty());

        let outcome = detector.record_probe(&mut view, NodeId(2), start + TIMEOUT * 10);
        assert_eq!(outcome, ProbeOutcome::Rejoined);
        assert_eq!(liveness(&view, 2), Liveness::Active);
    }

    #[test]
    fn first_probe_from_unknown_peer_is_new_contact() {
        let detector = FailureDetector::new(TIMEOUT);
        let mut view = MembershipView::new(NodeId(1));

        let outcome = detector.record_probe(&mut view, NodeId(7), Instant::now());
        assert_eq!(outcome, ProbeOutcome::New);
        assert_eq!(liveness(&view, 7), Liveness::Active);
    }
}
