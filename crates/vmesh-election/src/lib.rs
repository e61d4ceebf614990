//! Bully leader election.
//!
//! Pure state machine: every input returns the [`ElectionAction`]s the
//! caller must execute (sends, timer scheduling, coordinator installation).
//! No I/O and no timers live here; the kernel owns both.
//!
//! Convergence rule: among nodes electing simultaneously, the highest id
//! wins, because every other node either receives its ELECTION and replies
//! OK (suppressing its own claim) or never blocks it. An installed
//! coordinator is not displaced by a later-joining higher id; elections fire
//! only on loss or absence of a coordinator.

use tracing::{debug, info};
use vmesh_core::NodeId;

/// Where this node currently stands in the protocol.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    /// Not electing.
    Idle,
    /// Sent ELECTION to higher peers; waiting for OK or the timeout.
    AwaitingOk { generation: u64, got_ok: bool },
    /// We are the coordinator.
    DeclaredCoordinator,
}

/// Side effects the kernel must perform.
///
/// `AnnounceCoordinator` must go out with group reliability: it has to reach
/// everyone or the group splits on who leads.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ElectionAction {
    /// Point-to-point ELECTION to a higher peer.
    SendElection { to: NodeId },
    /// Point-to-point OK back to a lower challenger.
    SendOk { to: NodeId },
    /// Broadcast our claim to the whole group.
    AnnounceCoordinator { epoch: u64 },
    /// Arm the election timeout; deliver it back via `on_timeout`.
    ScheduleTimeout { generation: u64 },
    /// The locally known coordinator changed; update the membership view
    /// and notify the application.
    CoordinatorChanged { id: NodeId, epoch: u64 },
}

/// The per-node election state machine.
#[derive(Debug)]
pub struct ElectionCoordinator {
    local: NodeId,
    phase: Phase,
    /// Highest election epoch seen or produced. Disambiguates stale
    /// COORDINATOR announcements from earlier rounds.
    epoch: u64,
    /// Monotonic stamp for timers. A fired timer whose generation no longer
    /// matches the phase it was scheduled against is a no-op.
    next_generation: u64,
    coordinator: Option<NodeId>,
}

impl ElectionCoordinator {
    pub fn new(local: NodeId) -> Self {
        ElectionCoordinator {
            local,
            phase: Phase::Idle,
            epoch: 0,
            next_generation: 0,
            coordinator: None,
        }
    }

    pub fn local(&self) -> NodeId {
        self.local
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn coordinator(&self) -> Option<NodeId> {
        self.coordinator
    }

    pub fn is_electing(&self) -> bool {
        matches!(self.phase, Phase::AwaitingOk { .. })
    }

    /// Begin an election. `higher` is the set of active peers with a
    /// strictly greater id. With no higher peer we win immediately.
    pub fn start(&mut self, higher: &[NodeId]) -> Vec<ElectionAction> {
        if higher.is_empty() {
            return self.declare_self();
        }

        let generation = self.fresh_generation();
        self.phase = Phase::AwaitingOk {
            generation,
            got_ok: false,
        };
        info!(candidates = higher.len(), "starting election");

        let mut actions: Vec<ElectionAction> = higher
            .iter()
            .map(|&to| ElectionAction::SendElection { to })
            .collect();
        actions.push(ElectionAction::ScheduleTimeout { generation });
        actions
    }

    /// A peer challenged us with ELECTION.
    pub fn on_election(&mut self, from: NodeId, higher: &[NodeId]) -> Vec<ElectionAction> {
        if from >= self.local {
            // A higher challenger needs nothing from us; its own protocol
            // run will produce a COORDINATOR announcement.
            return Vec::new();
        }

        let mut actions = vec![ElectionAction::SendOk { to: from }];
        match self.phase {
            // Suppress the lower challenger and press our own claim.
            Phase::Idle => actions.extend(self.start(higher)),
            // Already electing; the OK alone suppresses the challenger.
            Phase::AwaitingOk { .. } => {}
            // We already hold the seat; restate it so the challenger and
            // anyone else who missed the announcement converge.
            Phase::DeclaredCoordinator => {
                actions.push(ElectionAction::AnnounceCoordinator { epoch: self.epoch })
            }
        }
        actions
    }

    /// A higher peer replied OK: our claim is suppressed, and that peer now
    /// owes the group a COORDINATOR announcement within the timeout.
    pub fn on_ok(&mut self, from: NodeId) -> Vec<ElectionAction> {
        match self.phase {
            Phase::AwaitingOk { got_ok: false, .. } => {
                debug!(from = %from, "election suppressed by higher peer");
                let generation = self.fresh_generation();
                self.phase = Phase::AwaitingOk {
                    generation,
                    got_ok: true,
                };
                vec![ElectionAction::ScheduleTimeout { generation }]
            }
            // Duplicate OKs and OKs outside an election change nothing.
            _ => Vec::new(),
        }
    }

    /// A COORDINATOR announcement arrived. Accepted iff its epoch is not
    /// stale; acceptance discards any in-flight election of our own.
    pub fn on_coordinator(&mut self, from: NodeId, epoch: u64) -> Vec<ElectionAction> {
        if epoch < self.epoch {
            debug!(from = %from, epoch, known = self.epoch, "ignoring stale coordinator claim");
            return Vec::new();
        }

        self.epoch = epoch;
        self.phase = Phase::Idle;
        self.fresh_generation();
        if self.coordinator == Some(from) {
            return Vec::new();
        }
        self.coordinator = Some(from);
        info!(coordinator = %from, epoch, "accepted coordinator");
        vec![ElectionAction::CoordinatorChanged { id: from, epoch }]
    }

    /// The election timeout fired. Stale generations are no-ops.
    pub fn on_timeout(&mut self, generation: u64, higher: &[NodeId]) -> Vec<ElectionAction> {
        match self.phase {
            Phase::AwaitingOk {
                generation: current,
                got_ok,
            } if current == generation => {
                if got_ok {
                    // The higher peer that suppressed us never announced.
                    info!("suppressor went quiet, restarting election");
                    self.phase = Phase::Idle;
                    self.start(higher)
                } else {
                    // No higher peer answered; the seat is ours.
                    self.declare_self()
                }
            }
            _ => Vec::new(),
        }
    }

    /// The installed coordinator is gone (detector or graceful leave).
    pub fn on_coordinator_lost(&mut self, higher: &[NodeId]) -> Vec<ElectionAction> {
        self.coordinator = None;
        match self.phase {
            Phase::AwaitingOk { .. } => Vec::new(),
            _ => {
                self.phase = Phase::Idle;
                self.start(higher)
            }
        }
    }

    fn declare_self(&mut self) -> Vec<ElectionAction> {
        self.epoch += 1;
        self.phase = Phase::DeclaredCoordinator;
        self.coordinator = Some(self.local);
        self.fresh_generation();
        info!(epoch = self.epoch, "declaring self coordinator");
        vec![
            ElectionAction::AnnounceCoordinator { epoch: self.epoch },
            ElectionAction::CoordinatorChanged {
                id: self.local,
                epoch: self.epoch,
            },
        ]
    }

    fn fresh_generation(&mut self) -> u64 {
        self.next_generation += 1;
        self.next_generation
    }
}
