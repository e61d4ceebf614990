//! Node orchestration: the tasks, the locks and the frame handlers.
//!
//! One `Kernel` per node. It owns the shared state behind mutexes held only
//! for the read-modify-write, never across an await: every handler computes
//! under the lock, drops it, then performs its sends. Long-lived tasks are a
//! receive loop, a heartbeat sender, a failure-detector sweep, and an
//! election action driver; election timeouts are one-shot tasks stamped with
//! the generation they were armed against.

use crate::config::KernelConfig;
use crate::discipline::Discipline;
use crate::error::KernelError;
use crate::transport::Transport;
use crate::wire::Frame;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};
use vmesh_causal::CausalPipeline;
use vmesh_core::{EventId, EventKind, NodeId, OrderedEvent, VectorClock};
use vmesh_election::{ElectionAction, ElectionCoordinator};
use vmesh_membership::{DetectorEvent, FailureDetector, MembershipView, ProbeOutcome};

/// Bootstrap state handed to a joiner.
struct JoinSnapshot {
    clock: VectorClock,
    coordinator: Option<NodeId>,
    peers: Vec<NodeId>,
}

struct Shared<T> {
    node: NodeId,
    config: KernelConfig,
    discipline: Discipline<T>,
    view: Mutex<MembershipView>,
    pipeline: Mutex<CausalPipeline>,
    election: Mutex<ElectionCoordinator>,
    detector: FailureDetector,
    deliveries: mpsc::Sender<OrderedEvent>,
    election_tx: mpsc::UnboundedSender<ElectionAction>,
    pending_join: Mutex<Option<oneshot::Sender<JoinSnapshot>>>,
    shutdown: watch::Sender<bool>,
}

/// A running coordination node.
pub struct Kernel<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Kernel<T> {
    fn clone(&self) -> Self {
        Kernel {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Transport> Kernel<T> {
    /// Spin up the node's tasks. The returned receiver is the application's
    /// delivery queue: every ordered event arrives on it exactly once, in
    /// causal order per originator.
    pub fn start(
        node: NodeId,
        transport: T,
        config: KernelConfig,
    ) -> (Kernel<T>, mpsc::Receiver<OrderedEvent>) {
        let transport = Arc::new(transport);
        let inbox = transport.subscribe();
        let (delivery_tx, delivery_rx) = mpsc::channel(config.delivery_queue);
        let (election_tx, election_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, _) = watch::channel(false);

        let shared = Arc::new(Shared {
            node,
            detector: FailureDetector::new(config.heartbeat_timeout),
            pipeline: Mutex::new(CausalPipeline::with_capacities(
                node,
                config.holdback_capacity,
                config.dedupe_capacity,
            )),
            view: Mutex::new(MembershipView::new(node)),
            election: Mutex::new(ElectionCoordinator::new(node)),
            discipline: Discipline::new(transport),
            deliveries: delivery_tx,
            election_tx,
            pending_join: Mutex::new(None),
            shutdown: shutdown_tx,
            config,
        });

        tokio::spawn(receive_loop(Arc::clone(&shared), inbox));
        tokio::spawn(heartbeat_loop(Arc::clone(&shared)));
        tokio::spawn(sweep_loop(Arc::clone(&shared)));
        tokio::spawn(election_driver(Arc::clone(&shared), election_rx));

        (Kernel { shared }, delivery_rx)
    }

    pub fn node(&self) -> NodeId {
        self.shared.node
    }

    pub fn coordinator(&self) -> Option<NodeId> {
        self.shared.view.lock().coordinator()
    }

    pub fn is_coordinator(&self) -> bool {
        self.shared.view.lock().is_coordinator()
    }

    pub fn clock(&self) -> VectorClock {
        self.shared.pipeline.lock().clock().clone()
    }

    /// Announce ourselves and adopt the group's state.
    ///
    /// Broadcasts JOIN with group reliability and waits for a bootstrap
    /// snapshot. The snapshot's clock replaces our all-zero clock; without
    /// that, the delivery predicate would reject every event originated
    /// before we arrived, permanently. With no responder we assume we are
    /// first and elect ourselves.
    pub async fn join(&self) -> Result<(), KernelError> {
        let shared = &self.shared;
        self.check_running()?;
        let (tx, rx) = oneshot::channel();
        *shared.pending_join.lock() = Some(tx);

        shared
            .discipline
            .group_reliable(
                &Frame::Join { sender: shared.node },
                shared.config.group_repeats,
                shared.config.group_repeat_delay,
            )
            .await?;

        match tokio::time::timeout(shared.config.join_timeout, rx).await {
            Ok(Ok(snapshot)) => {
                {
                    let mut view = shared.view.lock();
                    let now = Instant::now();
                    for peer in &snapshot.peers {
                        if *peer != shared.node {
                            view.observe(*peer, now);
                        }
                    }
                    if let Some(coordinator) = snapshot.coordinator {
                        view.set_coordinator(coordinator);
                    }
                }
                info!(node = %shared.node, "adopted bootstrap snapshot");
                // Events received while we still had an all-zero clock may be
                // deliverable against the snapshot; nothing else re-checks them.
                let released = shared.pipeline.lock().adopt_snapshot(snapshot.clock);
                for event in released {
                    self.deliver_local(event).await;
                }

                if snapshot.coordinator.is_none() {
                    self.force_election();
                }
                Ok(())
            }
            _ => {
                shared.pending_join.lock().take();
                info!(node = %shared.node, "no join response, assuming first member");
                self.force_election();
                Ok(())
            }
        }
    }

    /// Broadcast LEAVE and stop all tasks. Peers remove us immediately,
    /// without waiting out the failure detector.
    pub async fn leave(&self) -> Result<(), KernelError> {
        let shared = &self.shared;
        self.check_running()?;
        shared
            .discipline
            .group_reliable(
                &Frame::Leave { sender: shared.node },
                shared.config.group_repeats,
                shared.config.group_repeat_delay,
            )
            .await?;
        let _ = shared.shutdown.send(true);
        Ok(())
    }

    /// Stop all tasks without telling anyone, as a crash would.
    pub fn halt(&self) {
        let _ = self.shared.shutdown.send(true);
    }

    /// Manually trigger an election round.
    pub fn force_election(&self) {
        let higher = self.shared.view.lock().higher_peers();
        let actions = self.shared.election.lock().start(&higher);
        queue_actions(&self.shared, actions);
    }

    /// Originate an ordered application event and broadcast it to the group.
    /// Our own copy goes straight to the delivery queue.
    pub async fn publish(&self, payload: serde_json::Value) -> Result<EventId, KernelError> {
        self.check_running()?;
        let event = self.originate(EventKind::App, payload);
        let id = event.id;
        self.shared
            .discipline
            .group_reliable(
                &Frame::Event { event: event.clone(), ack: false },
                self.shared.config.group_repeats,
                self.shared.config.group_repeat_delay,
            )
            .await?;
        self.deliver_local(event).await;
        Ok(id)
    }

    /// Originate an ordered event that one counterparty must confirm.
    ///
    /// The acked copy goes point-to-point with retries under a stable id; a
    /// group-reliable copy also goes to the rest of the group so their clocks
    /// see our counter advance, with the same repeat discipline as
    /// [`publish`](Kernel::publish) since a third party that misses it would
    /// buffer every later event of ours behind the gap. The receiver acks
    /// every copy, including duplicates, so a lost ack is recovered by the
    /// retry.
    pub async fn request(
        &self,
        to: NodeId,
        payload: serde_json::Value,
    ) -> Result<EventId, KernelError> {
        self.check_running()?;
        let event = self.originate(EventKind::App, payload);
        let id = event.id;

        if let Err(err) = self
            .shared
            .discipline
            .group_reliable(
                &Frame::Event { event: event.clone(), ack: false },
                self.shared.config.group_repeats,
                self.shared.config.group_repeat_delay,
            )
            .await
        {
            debug!(%err, "group copy of acked event failed");
        }

        self.shared
            .discipline
            .reliable_unicast(
                to,
                &Frame::Event { event: event.clone(), ack: true },
                id,
                &self.shared.config,
            )
            .await?;
        self.deliver_local(event).await;
        Ok(id)
    }

    fn check_running(&self) -> Result<(), KernelError> {
        if *self.shared.shutdown.borrow() {
            return Err(KernelError::ShuttingDown);
        }
        Ok(())
    }

    fn originate(&self, kind: EventKind, payload: serde_json::Value) -> OrderedEvent {
        let clock = self.shared.pipeline.lock().stamp();
        OrderedEvent::new(self.shared.node, clock, kind, payload)
    }

    async fn deliver_local(&self, event: OrderedEvent) {
        if self.shared.deliveries.send(event).await.is_err() {
            debug!("application dropped the delivery queue");
        }
    }
}

fn queue_actions<T>(shared: &Arc<Shared<T>>, actions: Vec<ElectionAction>) {
    for action in actions {
        let _ = shared.election_tx.send(action);
    }
}

/// Originate a membership event if we hold the seat; only the coordinator
/// narrates membership so the group sees one ordered stream of changes.
async fn originate_membership_event<T: Transport>(
    shared: &Arc<Shared<T>>,
    kind: EventKind,
    peer: NodeId,
) {
    let event = {
        let view = shared.view.lock();
        if !view.is_coordinator() {
            return;
        }
        drop(view);
        let clock = shared.pipeline.lock().stamp();
        OrderedEvent::new(shared.node, clock, kind, serde_json::json!({ "peer": peer.0 }))
    };

    let frame = Frame::Event { event: event.clone(), ack: false };
    if let Err(err) = shared
        .discipline
        .group_reliable(&frame, shared.config.group_repeats, shared.config.group_repeat_delay)
        .await
    {
        warn!(%err, "failed to broadcast membership event");
    }
    if shared.deliveries.send(event).await.is_err() {
        debug!("application dropped the delivery queue");
    }
}

async fn receive_loop<T: Transport>(
    shared: Arc<Shared<T>>,
    mut inbox: mpsc::Receiver<(NodeId, Vec<u8>)>,
) {
    let mut shutdown = shared.shutdown.subscribe();
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
            next = inbox.recv() => {
                let Some((from, bytes)) = next else { break };
                match Frame::decode(&bytes) {
                    // A handler failure must never kill the loop; a node
                    // that cannot receive is worse than any dropped frame.
                    Ok(frame) => handle_frame(&shared, frame).await,
                    Err(err) => warn!(%from, %err, "dropping malformed frame"),
                }
            }
        }
    }
    debug!(node = %shared.node, "receive loop stopped");
}

async fn handle_frame<T: Transport>(shared: &Arc<Shared<T>>, frame: Frame) {
    match frame {
        Frame::Heartbeat { sender } => {
            let outcome = {
                let mut view = shared.view.lock();
                shared.detector.record_probe(&mut view, sender, Instant::now())
            };
            if outcome == ProbeOutcome::Rejoined {
                debug!(peer = %sender, "expecting a bootstrap join from revived peer");
            }
        }

        Frame::Election { sender } => {
            let higher = {
                let mut view = shared.view.lock();
                view.observe(sender, Instant::now());
                view.higher_peers()
            };
            let actions = shared.election.lock().on_election(sender, &higher);
            queue_actions(shared, actions);
        }

        Frame::Ok { sender } => {
            let actions = shared.election.lock().on_ok(sender);
            queue_actions(shared, actions);
        }

        Frame::Coordinator { sender, epoch } => {
            shared.view.lock().observe(sender, Instant::now());
            let actions = shared.election.lock().on_coordinator(sender, epoch);
            queue_actions(shared, actions);
        }

        Frame::Join { sender } => handle_join(shared, sender).await,

        Frame::JoinResponse {
            clock,
            coordinator,
            peers,
            ..
        } => {
            if let Some(tx) = shared.pending_join.lock().take() {
                let _ = tx.send(JoinSnapshot {
                    clock,
                    coordinator,
                    peers,
                });
            }
        }

        Frame::Leave { sender } => handle_leave(shared, sender).await,

        Frame::Event { event, ack } => {
            if ack {
                // Acked even when it turns out to be a duplicate: the
                // sender may be retrying because our last ack was lost.
                let reply = Frame::Ack {
                    sender: shared.node,
                    message_id: event.id,
                };
                if let Err(err) = shared.discipline.best_effort_unicast(event.origin, &reply).await
                {
                    debug!(%err, "failed to send ack");
                }
            }

            let delivered = {
                let mut view = shared.view.lock();
                view.observe(event.origin, Instant::now());
                drop(view);
                shared.pipeline.lock().ingest(event)
            };
            for event in delivered {
                if shared.deliveries.send(event).await.is_err() {
                    debug!("application dropped the delivery queue");
                    return;
                }
            }
        }

        Frame::Ack { message_id, .. } => shared.discipline.acknowledge(message_id),
    }
}

async fn handle_join<T: Transport>(shared: &Arc<Shared<T>>, sender: NodeId) {
    if sender == shared.node {
        return;
    }

    let (first_contact, respond, snapshot) = {
        let mut view = shared.view.lock();
        let first_contact = view.get(sender).is_none();
        view.observe(sender, Instant::now());
        // The coordinator answers; with no coordinator installed anyone
        // does, and the joiner takes whichever snapshot lands first.
        let respond = view.is_coordinator() || view.coordinator().is_none();
        let snapshot = respond.then(|| {
            let peers: Vec<NodeId> = view
                .peer_ids()
                .filter(|&id| id != sender)
                .chain(std::iter::once(shared.node))
                .collect();
            (view.coordinator(), peers)
        });
        (first_contact, respond, snapshot)
    };

    if respond {
        let (coordinator, peers) = snapshot.unwrap_or((None, Vec::new()));
        let response = Frame::JoinResponse {
            sender: shared.node,
            clock: shared.pipeline.lock().clock().clone(),
            coordinator,
            peers,
        };
        if let Err(err) = shared.discipline.best_effort_unicast(sender, &response).await {
            debug!(%err, peer = %sender, "failed to answer join");
        }

        // Restate the seat so the joiner converges even if the snapshot
        // frame is lost.
        if coordinator == Some(shared.node) {
            let epoch = shared.election.lock().epoch();
            let claim = Frame::Coordinator {
                sender: shared.node,
                epoch,
            };
            if let Err(err) = shared.discipline.best_effort_unicast(sender, &claim).await {
                debug!(%err, peer = %sender, "failed to restate coordinator");
            }
        }
    }

    // Group-reliable JOIN arrives repeatedly; narrate only the first copy.
    if first_contact {
        originate_membership_event(shared, EventKind::PeerJoined, sender).await;
    }
}

async fn handle_leave<T: Transport>(shared: &Arc<Shared<T>>, sender: NodeId) {
    let (known, was_coordinator) = {
        let mut view = shared.view.lock();
        let known = view.get(sender).is_some();
        let was_coordinator = view.coordinator() == Some(sender);
        view.remove(sender);
        (known, was_coordinator)
    };
    if !known {
        return;
    }
    info!(peer = %sender, was_coordinator, "peer left gracefully");

    if was_coordinator {
        let higher = shared.view.lock().higher_peers();
        let actions = shared.election.lock().on_coordinator_lost(&higher);
        queue_actions(shared, actions);
    }

    originate_membership_event(shared, EventKind::PeerLeft, sender).await;
}

async fn heartbeat_loop<T: Transport>(shared: Arc<Shared<T>>) {
    let mut shutdown = shared.shutdown.subscribe();
    let mut ticker = tokio::time::interval(shared.config.heartbeat_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                let probe = Frame::Heartbeat { sender: shared.node };
                if let Err(err) = shared.discipline.best_effort_group(&probe).await {
                    // Loss is expected on this channel.
                    debug!(%err, "heartbeat send failed");
                }
            }
        }
    }
}

async fn sweep_loop<T: Transport>(shared: Arc<Shared<T>>) {
    let mut shutdown = shared.shutdown.subscribe();
    let mut ticker = tokio::time::interval(shared.config.heartbeat_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                let events = {
                    let mut view = shared.view.lock();
                    shared.detector.sweep(&mut view, Instant::now())
                };
                for event in events {
                    if let DetectorEvent::PeerFailed { peer, was_coordinator: true } = event {
                        info!(%peer, "coordinator failed, electing");
                        let higher = shared.view.lock().higher_peers();
                        let actions = shared.election.lock().on_coordinator_lost(&higher);
                        queue_actions(&shared, actions);
                    }
                }
            }
        }
    }
}

/// Executes the election state machine's side effects in order. Timeouts
/// are armed here and feed their expiry back through the same channel.
async fn election_driver<T: Transport>(
    shared: Arc<Shared<T>>,
    mut actions: mpsc::UnboundedReceiver<ElectionAction>,
) {
    let mut shutdown = shared.shutdown.subscribe();
    loop {
        let action = tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
                continue;
            }
            action = actions.recv() => {
                let Some(action) = action else { break };
                action
            }
        };

        match action {
            ElectionAction::SendElection { to } => {
                let frame = Frame::Election { sender: shared.node };
                if let Err(err) = shared.discipline.best_effort_unicast(to, &frame).await {
                    debug!(%err, %to, "election challenge failed to send");
                }
            }
            ElectionAction::SendOk { to } => {
                let frame = Frame::Ok { sender: shared.node };
                if let Err(err) = shared.discipline.best_effort_unicast(to, &frame).await {
                    debug!(%err, %to, "election ok failed to send");
                }
            }
            ElectionAction::AnnounceCoordinator { epoch } => {
                let frame = Frame::Coordinator {
                    sender: shared.node,
                    epoch,
                };
                if let Err(err) = shared
                    .discipline
                    .group_reliable(
                        &frame,
                        shared.config.group_repeats,
                        shared.config.group_repeat_delay,
                    )
                    .await
                {
                    warn!(%err, "coordinator announcement failed");
                }
            }
            ElectionAction::ScheduleTimeout { generation } => {
                let shared = Arc::clone(&shared);
                tokio::spawn(async move {
                    tokio::time::sleep(shared.config.election_timeout).await;
                    if *shared.shutdown.borrow() {
                        return;
                    }
                    let higher = shared.view.lock().higher_peers();
                    let actions = shared.election.lock().on_timeout(generation, &higher);
                    queue_actions(&shared, actions);
                });
            }
            ElectionAction::CoordinatorChanged { id, epoch } => {
                shared.view.lock().set_coordinator(id);
                debug!(coordinator = %id, epoch, "membership view updated");
            }
        }
    }
}
