//! Central Dispatch: the single authority over edge reservations, shared by
//! every train agent (spec §4.7), plus deadlock detection (spec §4.8).
//!
//! Grounded on the teacher's `Railroad` (`rail_system/railroad.rs`) — a
//! central hub owning `HashMap`s of `Mutex`-wrapped shared state and a
//! channel agents send through — and `Signal::request_block`'s FIFO
//! `requesters` queue with exactly one current holder.

mod deadlock;

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use petgraph::graph::EdgeIndex;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tracing::{error, info, warn};

use crate::error::{CoreError, ProtocolError};
use crate::general::TrainId;
use crate::messages::{Inbound, Outbound};
use crate::track::Track;
use crate::train::navigation::Reservable;

struct ReservationRecord {
    held_by: Option<TrainId>,
    wait_queue: VecDeque<(TrainId, oneshot::Sender<()>)>,
}

impl ReservationRecord {
    fn free() -> Self {
        ReservationRecord {
            held_by: None,
            wait_queue: VecDeque::new(),
        }
    }
}

/// The result of the synchronous (lock-held) half of a reservation request.
enum ReservationOutcome {
    Granted,
    Pending(oneshot::Receiver<()>),
}

#[derive(Default)]
struct DispatchState {
    reservations: HashMap<EdgeIndex, ReservationRecord>,
    /// What each train is waiting to acquire, if anything — at most one
    /// entry per train, since an agent awaits one reservation at a time.
    waiting_on: HashMap<TrainId, EdgeIndex>,
    /// Per train, the edges it currently holds, oldest first — releases
    /// must happen in this order.
    held: HashMap<TrainId, VecDeque<EdgeIndex>>,
}

/// The reservation arbiter and message hub. One instance per simulation,
/// shared as `Arc<Dispatch>` with every train agent, exactly the way the
/// teacher threads `Arc<Railroad<...>>` through `Train`/`Sensor`/`Signal`.
pub struct Dispatch {
    track: Arc<Track>,
    state: Mutex<DispatchState>,
    agents: Mutex<HashMap<TrainId, mpsc::UnboundedSender<Inbound>>>,
    outbound: mpsc::UnboundedSender<Outbound>,
    paused: watch::Sender<bool>,
    /// `Dispatch.reservations[edge].reservedBy` (spec §6): one `watch`
    /// channel per edge, seeded at startup and pushed to on every grant and
    /// release.
    reservation_holders: HashMap<EdgeIndex, watch::Sender<Option<TrainId>>>,
}

impl Dispatch {
    /// Builds a fresh dispatch over `track`, with one reservation record per
    /// edge. Returns the dispatch handle and the outbound-message receiver
    /// the caller must drive with [`Dispatch::run`].
    pub fn new(track: Arc<Track>) -> (Arc<Dispatch>, mpsc::UnboundedReceiver<Outbound>) {
        let mut reservations = HashMap::new();
        let mut reservation_holders = HashMap::new();
        for edge in track.edge_indices() {
            reservations.insert(edge, ReservationRecord::free());
            reservation_holders.insert(edge, watch::channel::<Option<TrainId>>(None).0);
        }

        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (paused, _) = watch::channel(false);

        let dispatch = Arc::new(Dispatch {
            track,
            state: Mutex::new(DispatchState {
                reservations,
                waiting_on: HashMap::new(),
                held: HashMap::new(),
            }),
            agents: Mutex::new(HashMap::new()),
            outbound,
            paused,
            reservation_holders,
        });
        (dispatch, outbound_rx)
    }

    /// `Dispatch.reservations[edge].reservedBy` (spec §6). `None` if `edge`
    /// isn't a valid edge index for this track.
    pub fn reservation_holder(&self, edge: EdgeIndex) -> Option<watch::Receiver<Option<TrainId>>> {
        self.reservation_holders.get(&edge).map(|tx| tx.subscribe())
    }

    pub fn track(&self) -> &Arc<Track> {
        &self.track
    }

    pub fn outbound_sender(&self) -> mpsc::UnboundedSender<Outbound> {
        self.outbound.clone()
    }

    /// Registers a freshly spawned agent's inbound mailbox so `Dispatch::run`
    /// can route `ReservationConfirmed` back to it. Fails if `train` is
    /// already registered — `spawnTrain` name collisions fail (spec §6/§7)
    /// rather than silently clobbering the earlier agent's mailbox.
    pub async fn register_agent(
        &self,
        train: TrainId,
        inbound: mpsc::UnboundedSender<Inbound>,
    ) -> Result<(), ProtocolError> {
        let mut agents = self.agents.lock().await;
        if agents.contains_key(&train) {
            return Err(ProtocolError::TrainNameCollision(train.to_string()));
        }
        agents.insert(train, inbound);
        Ok(())
    }

    /// Subscribe to the stop-the-world flag; agents await `false` here
    /// before acting on anything that isn't the pause check itself.
    pub fn pause_signal(&self) -> watch::Receiver<bool> {
        self.paused.subscribe()
    }

    pub fn is_stopped(&self) -> bool {
        *self.paused.borrow()
    }

    pub fn stop_the_world(&self) {
        warn!("stopping the world");
        let _ = self.paused.send(true);
    }

    pub fn resume(&self) {
        let _ = self.paused.send(false);
    }

    /// Requests `element` on behalf of `train`. Resolves once granted — if
    /// the element is already free this returns immediately; otherwise it
    /// suspends until Dispatch dequeues `train` from the wait queue.
    ///
    /// Node reservations are accepted unconditionally: this core tracks no
    /// contention over node bodies, only over the edges between them (see
    /// the resolved Open Question recorded in `DESIGN.md`).
    pub async fn make_reservation(&self, train: TrainId, element: Reservable) -> Result<(), CoreError> {
        let edge = match element {
            Reservable::Node(_) => return Ok(()),
            Reservable::Edge(edge) => edge,
        };

        match self.decide_reservation(train.clone(), edge).await? {
            ReservationOutcome::Granted => {}
            ReservationOutcome::Pending(rx) => {
                let _ = rx.await;
            }
        }

        info!(%train, edge = ?edge, "reservation granted");
        Ok(())
    }

    /// The synchronous grant-or-enqueue decision for `edge` on behalf of
    /// `train`: acquires `state`, runs the deadlock check, and either grants
    /// immediately or pushes `train` onto the edge's FIFO wait queue.
    ///
    /// Callers must `.await` this directly rather than inside a freshly
    /// spawned task — spec §4.7's "FIFO is strict" requires requests to
    /// enter the critical section in the order they arrive on the outbound
    /// channel, and a spawned task would instead race every other spawned
    /// task for `state.lock()`. Only the subsequent wait for the returned
    /// `Pending` receiver, which by definition doesn't affect queue order
    /// any further, is safe to push into a spawned task.
    async fn decide_reservation(&self, train: TrainId, edge: EdgeIndex) -> Result<ReservationOutcome, CoreError> {
        let mut state = self.state.lock().await;

        if deadlock::would_deadlock(&state, &train, edge) {
            return Err(CoreError::Deadlock(train));
        }

        let record = state
            .reservations
            .entry(edge)
            .or_insert_with(ReservationRecord::free);

        if record.held_by.is_none() {
            record.held_by = Some(train.clone());
            state.held.entry(train.clone()).or_default().push_back(edge);
            if let Some(tx) = self.reservation_holders.get(&edge) {
                let _ = tx.send(Some(train));
            }
            Ok(ReservationOutcome::Granted)
        } else {
            let (tx, rx) = oneshot::channel();
            record.wait_queue.push_back((train.clone(), tx));
            state.waiting_on.insert(train, edge);
            Ok(ReservationOutcome::Pending(rx))
        }
    }

    /// Releases `element`, previously granted to `train`. Fails if `train`
    /// does not hold it, or holds it out of FIFO order (spec §4.7).
    pub async fn release_reservation(&self, train: &TrainId, element: Reservable) -> Result<(), CoreError> {
        let edge = match element {
            Reservable::Node(_) => return Ok(()),
            Reservable::Edge(edge) => edge,
        };

        let mut state = self.state.lock().await;

        {
            let record = state
                .reservations
                .get(&edge)
                .ok_or_else(|| ProtocolError::NotReservationOwner { holder: train.clone() })?;
            if record.held_by.as_ref() != Some(train) {
                return Err(ProtocolError::NotReservationOwner { holder: train.clone() }.into());
            }
        }

        let held = state.held.entry(train.clone()).or_default();
        match held.pop_front() {
            Some(front) if front == edge => {}
            _ => return Err(ProtocolError::ReleaseOutOfOrder { train: train.clone() }.into()),
        }

        let record = state.reservations.get_mut(&edge).expect("checked above");
        let new_holder = match record.wait_queue.pop_front() {
            None => {
                record.held_by = None;
                None
            }
            Some((next_train, confirm)) => {
                record.held_by = Some(next_train.clone());
                state.waiting_on.remove(&next_train);
                state.held.entry(next_train.clone()).or_default().push_back(edge);
                let _ = confirm.send(());
                Some(next_train)
            }
        };
        if let Some(tx) = self.reservation_holders.get(&edge) {
            let _ = tx.send(new_holder);
        }

        Ok(())
    }

    async fn notify(&self, train: &TrainId, message: Inbound) {
        let agents = self.agents.lock().await;
        if let Some(sender) = agents.get(train) {
            let _ = sender.send(message);
        }
    }

    /// Drives the outbound message bus: routes reservation traffic through
    /// the arbiter and treats any `Exception` as a global pause trigger.
    /// Intended to run as its own tokio task for the lifetime of the
    /// simulation.
    pub async fn run(self: Arc<Self>, mut outbound_rx: mpsc::UnboundedReceiver<Outbound>) {
        while let Some(message) = outbound_rx.recv().await {
            match message {
                Outbound::ReservationRequest { train, element } => match element {
                    Reservable::Node(_) => {
                        self.notify(&train, Inbound::ReservationConfirmed(element)).await;
                    }
                    Reservable::Edge(edge) => match self.decide_reservation(train.clone(), edge).await {
                        Ok(ReservationOutcome::Granted) => {
                            info!(%train, ?element, "reservation granted");
                            self.notify(&train, Inbound::ReservationConfirmed(element)).await;
                        }
                        Ok(ReservationOutcome::Pending(rx)) => {
                            // Only the wait for confirmation is detached — the
                            // grant-or-enqueue decision above already ran
                            // synchronously, in channel arrival order.
                            let dispatch = self.clone();
                            let waiting_train = train.clone();
                            tokio::spawn(async move {
                                if rx.await.is_ok() {
                                    info!(train = %waiting_train, ?element, "reservation granted");
                                    dispatch.notify(&waiting_train, Inbound::ReservationConfirmed(element)).await;
                                }
                            });
                        }
                        Err(error) => {
                            error!(%train, %error, "reservation request failed");
                            self.stop_the_world();
                        }
                    },
                },
                Outbound::ReservationRelease { train, element } => {
                    if let Err(error) = self.release_reservation(&train, element).await {
                        error!(%train, %error, "reservation release failed");
                        self.stop_the_world();
                    }
                }
                Outbound::PositionUpdate { .. } | Outbound::NavigationComplete { .. } => {
                    // Telemetry passthrough; nothing in the core reacts to these.
                }
                Outbound::Exception { train, error } => {
                    error!(%train, %error, "agent raised an exception");
                    self.stop_the_world();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::track::Builder;

    fn one_edge_track() -> (Arc<Track>, EdgeIndex) {
        let mut b = Builder::new();
        let a = b.add_node("A").unwrap();
        let c = b.add_node("B").unwrap();
        let (edge, _reverse) = b.connect(a, c, 10).unwrap();
        (Arc::new(b.build()), edge)
    }

    #[tokio::test]
    async fn a_free_edge_is_granted_immediately() {
        let (track, edge) = one_edge_track();
        let (dispatch, _outbound_rx) = Dispatch::new(track);
        let train = TrainId::new("T1");
        dispatch.make_reservation(train.clone(), Reservable::Edge(edge)).await.unwrap();
        assert_eq!(*dispatch.reservation_holder(edge).unwrap().borrow(), Some(train));
    }

    #[tokio::test]
    async fn fifo_defers_a_second_requester_regardless_of_arrival_order() {
        let (track, edge) = one_edge_track();
        let (dispatch, _outbound_rx) = Dispatch::new(track);
        let first = TrainId::new("first");
        let second = TrainId::new("second");

        dispatch.make_reservation(first.clone(), Reservable::Edge(edge)).await.unwrap();

        let dispatch_for_waiter = dispatch.clone();
        let second_for_waiter = second.clone();
        let waiter = tokio::spawn(async move {
            dispatch_for_waiter
                .make_reservation(second_for_waiter, Reservable::Edge(edge))
                .await
        });

        // Give the waiter task a chance to enqueue before we release.
        tokio::task::yield_now().await;
        assert_eq!(*dispatch.reservation_holder(edge).unwrap().borrow(), Some(first.clone()));

        dispatch.release_reservation(&first, Reservable::Edge(edge)).await.unwrap();
        waiter.await.unwrap().unwrap();

        assert_eq!(*dispatch.reservation_holder(edge).unwrap().borrow(), Some(second));
    }

    #[tokio::test]
    async fn release_by_a_non_holder_is_a_protocol_error() {
        let (track, edge) = one_edge_track();
        let (dispatch, _outbound_rx) = Dispatch::new(track);
        let holder = TrainId::new("holder");
        let impostor = TrainId::new("impostor");
        dispatch.make_reservation(holder, Reservable::Edge(edge)).await.unwrap();
        assert!(matches!(
            dispatch.release_reservation(&impostor, Reservable::Edge(edge)).await,
            Err(CoreError::Protocol(ProtocolError::NotReservationOwner { .. }))
        ));
    }

    #[tokio::test]
    async fn registering_a_name_twice_is_a_protocol_error() {
        let (track, _edge) = one_edge_track();
        let (dispatch, _outbound_rx) = Dispatch::new(track);
        let (tx, _rx) = mpsc::unbounded_channel();
        let train = TrainId::new("T1");
        dispatch.register_agent(train.clone(), tx.clone()).await.unwrap();
        assert!(matches!(
            dispatch.register_agent(train, tx).await,
            Err(ProtocolError::TrainNameCollision(_))
        ));
    }

    #[tokio::test]
    async fn node_reservations_are_granted_as_no_ops() {
        let (track, _edge) = one_edge_track();
        let a = track.node_by_name("A").unwrap();
        let (dispatch, _outbound_rx) = Dispatch::new(track);
        let train = TrainId::new("T1");
        dispatch.make_reservation(train.clone(), Reservable::Node(a)).await.unwrap();
        dispatch.release_reservation(&train, Reservable::Node(a)).await.unwrap();
    }
}
