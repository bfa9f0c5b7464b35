//! The train agent: one tokio task running a train's kinematics and one
//! running its command/event loop, coordinating through `Arc<Mutex<..>>`
//! shared state — the same shape as the teacher's per-component `Mutex`
//! plus a spawned background task (`Sensor::sensor_free`'s `wait_and_run`,
//! `Train::speed_accelerator`) in `control/train.rs` and
//! `control/rail_system/components/mod.rs`.

use std::sync::Arc;
use std::time::Duration;

use petgraph::graph::{EdgeIndex, NodeIndex};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::time::{interval, sleep};
use tracing::error;

use crate::dispatch::Dispatch;
use crate::error::{CoreError, ProtocolError};
use crate::general::{Direction, SimulationConfig, TrainId};
use crate::messages::{Inbound, Outbound};
use crate::track::{Track, TrackEdge};

use super::executor::{apply_set_direction, apply_set_switch, apply_start, compute_stop_timing, StopGuard};
use super::navigation::{compile, NavigationEvent, Reservable};
use super::physics::TrainPhysics;
use super::position::TrainPosition;

/// A snapshot of one train's kinematic state, published at 10 Hz (spec
/// §4.6). This crate's realization of the external `Observable<T>`
/// interface (spec §6): a `watch` channel carries both the current value
/// and a subscribable stream of future updates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Telemetry {
    pub node: NodeIndex,
    pub current_edge: Option<TrackEdge>,
    pub offset: f64,
    pub direction: Direction,
    /// Signed — negative while running `Backward` (spec §6's `velocity`,
    /// as opposed to the unsigned `speed` the kinematics model tracks
    /// internally).
    pub velocity: f64,
}

/// The caller-facing handle to a spawned train.
#[derive(Clone)]
pub struct AgentHandle {
    id: TrainId,
    inbound: mpsc::UnboundedSender<Inbound>,
    telemetry: watch::Receiver<Telemetry>,
    destination: watch::Receiver<Option<NodeIndex>>,
    reservations: watch::Receiver<Vec<EdgeIndex>>,
}

impl AgentHandle {
    pub fn id(&self) -> &TrainId {
        &self.id
    }

    pub fn navigate_to(&self, destination: NodeIndex) {
        let _ = self.inbound.send(Inbound::NavigateTo(destination));
    }

    pub fn telemetry(&self) -> watch::Receiver<Telemetry> {
        self.telemetry.clone()
    }

    /// `AgentHandle.currentDestination` (spec §6): `None` once the train
    /// has finished (or never received) a `NavigateTo`.
    pub fn current_destination(&self) -> watch::Receiver<Option<NodeIndex>> {
        self.destination.clone()
    }

    /// `AgentHandle.reservations` (spec §6): the edges this train currently
    /// holds, oldest (nearest behind the train) first.
    pub fn reservations(&self) -> watch::Receiver<Vec<EdgeIndex>> {
        self.reservations.clone()
    }
}

struct AgentState {
    physics: TrainPhysics,
    position: TrainPosition,
    /// Edges currently held, oldest (furthest behind the train) first —
    /// mirrors Central Dispatch's own per-train `held` queue so
    /// `AgentHandle::reservations` never has to ask Dispatch for it.
    reservations: Vec<EdgeIndex>,
}

/// The command/event-execution half of a train (spec §5's single-threaded
/// cooperative agent). The kinematic tick runs separately in
/// [`run_ticker`] against the same `state`.
pub struct TrainAgent {
    id: TrainId,
    track: Arc<Track>,
    state: Arc<Mutex<AgentState>>,
    inbound: mpsc::UnboundedReceiver<Inbound>,
    outbound: mpsc::UnboundedSender<Outbound>,
    destination_tx: watch::Sender<Option<NodeIndex>>,
    reservations_tx: watch::Sender<Vec<EdgeIndex>>,
    config: SimulationConfig,
    paused: watch::Receiver<bool>,
}

impl TrainAgent {
    /// Spawns a train at `start`, facing `direction`, registers it with
    /// `dispatch`, and returns the handle used to command it. Fails with
    /// [`ProtocolError::TrainNameCollision`] if `id` is already spawned
    /// (spec §6's "name collisions fail"); registration happens before
    /// either of the agent's tasks starts, so a rejected spawn leaves no
    /// task running.
    pub async fn spawn(
        dispatch: Arc<Dispatch>,
        id: TrainId,
        start: NodeIndex,
        direction: Direction,
        config: SimulationConfig,
    ) -> Result<AgentHandle, CoreError> {
        let track = dispatch.track().clone();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let outbound = dispatch.outbound_sender();

        dispatch.register_agent(id.clone(), inbound_tx.clone()).await?;

        let mut position = TrainPosition::at_node(start);
        position.refresh_current_edge(&track, direction);
        let initial_edge = position.current_edge();
        let physics = TrainPhysics::new(direction, config);
        let state = Arc::new(Mutex::new(AgentState {
            physics,
            position,
            reservations: Vec::new(),
        }));

        let (telemetry_tx, telemetry_rx) = watch::channel(Telemetry {
            node: start,
            current_edge: initial_edge,
            offset: 0.0,
            direction,
            velocity: 0.0,
        });
        let (destination_tx, destination_rx) = watch::channel(None);
        let (reservations_tx, reservations_rx) = watch::channel(Vec::new());
        let paused = dispatch.pause_signal();

        tokio::spawn(run_ticker(
            id.clone(),
            track.clone(),
            state.clone(),
            outbound.clone(),
            telemetry_tx,
            reservations_tx.clone(),
            config,
            paused.clone(),
        ));

        let agent = TrainAgent {
            id: id.clone(),
            track,
            state,
            inbound: inbound_rx,
            outbound,
            destination_tx,
            reservations_tx,
            config,
            paused,
        };

        tokio::spawn(async move {
            agent.run().await;
        });

        Ok(AgentHandle {
            id,
            inbound: inbound_tx,
            telemetry: telemetry_rx,
            destination: destination_rx,
            reservations: reservations_rx,
        })
    }

    async fn run(mut self) {
        while let Some(message) = self.inbound.recv().await {
            wait_while_paused(&mut self.paused).await;
            match message {
                Inbound::NavigateTo(destination) => {
                    if let Err(error) = self.navigate_to(destination).await {
                        self.raise(error).await;
                    }
                }
                Inbound::ReservationConfirmed(_) => {
                    // Only ever arrives here if it outlives the `Reserve`
                    // event that was waiting for it — nothing to do.
                }
            }
        }
    }

    async fn navigate_to(&mut self, destination: NodeIndex) -> Result<(), CoreError> {
        let _ = self.destination_tx.send(Some(destination));

        let result = self.drive_to(destination).await;

        let _ = self.destination_tx.send(None);
        result
    }

    async fn drive_to(&mut self, destination: NodeIndex) -> Result<(), CoreError> {
        let (start, direction) = {
            let s = self.state.lock().await;
            (s.position.node(), s.physics.direction())
        };
        let path = self
            .track
            .find_path(start, destination, self.config.allow_backward_movement)?;
        let program = compile(&self.track, direction, &path)?;
        let reserved_edges = program.reserved_edges;

        for event in program.events {
            self.execute(event, &reserved_edges).await?;
        }

        let _ = self.outbound.send(Outbound::NavigationComplete { train: self.id.clone() });
        Ok(())
    }

    async fn execute(&mut self, event: NavigationEvent, reserved_edges: &[EdgeIndex]) -> Result<(), CoreError> {
        wait_while_paused(&mut self.paused).await;
        match event {
            NavigationEvent::SetDirection(direction) => {
                let mut s = self.state.lock().await;
                apply_set_direction(&mut s.physics, direction)?;
                Ok(())
            }
            NavigationEvent::SetSwitch(node, branch) => {
                apply_set_switch(&self.track, node, branch)?;
                let mut s = self.state.lock().await;
                let direction = s.physics.direction();
                s.position.refresh_current_edge(&self.track, direction);
                Ok(())
            }
            NavigationEvent::Start => {
                let mut s = self.state.lock().await;
                apply_start(&mut s.physics)?;
                Ok(())
            }
            NavigationEvent::Stop { distance, .. } => self.run_stop(distance).await,
            NavigationEvent::Reserve(element) => self.run_reserve(element, reserved_edges).await,
        }
    }

    /// Two-phase scheduled stop (spec §4.5): a trigger timer begins
    /// deceleration, a nested timer then snaps onto the nearest node and
    /// force-stops.
    async fn run_stop(&mut self, distance: u32) -> Result<(), CoreError> {
        let (time_to_trigger, time_to_stop) = compute_stop_timing(distance, &self.config);
        sleep(Duration::from_secs_f64(time_to_trigger.max(0.0))).await;
        {
            let mut s = self.state.lock().await;
            s.physics.begin_stop();
        }
        sleep(Duration::from_secs_f64(time_to_stop.max(0.0))).await;
        let left_behind = {
            let mut s = self.state.lock().await;
            let direction = s.physics.direction();
            let left_behind = s.position.normalize_to_closest_node(&self.track, direction)?;
            s.physics.force_stop()?;
            left_behind
        };
        if let Some(edge) = left_behind {
            self.release(edge.id).await;
        }
        Ok(())
    }

    /// Tells Central Dispatch a held edge is no longer needed — a
    /// reservation is only good for as long as the train still occupies
    /// the segment it covers (spec §4.7's FIFO release) — and drops it from
    /// the locally-tracked `reservations` observable (spec §6).
    async fn release(&self, edge: EdgeIndex) {
        {
            let mut s = self.state.lock().await;
            s.reservations.retain(|held| *held != edge);
            let _ = self.reservations_tx.send(s.reservations.clone());
        }
        let _ = self.outbound.send(Outbound::ReservationRelease {
            train: self.id.clone(),
            element: Reservable::Edge(edge),
        });
    }

    /// `Reserve(element)`: requests `element` from Dispatch and, if the
    /// train is moving, races a cancellable guard-stop against the
    /// confirmation so it never overruns an unconfirmed element. The
    /// guarded distance is the remainder of the edge currently under the
    /// train — every `Reserve` the compiler emits targets the node or edge
    /// immediately past that edge's end, so this is exact, not a proxy.
    async fn run_reserve(&mut self, element: Reservable, reserved_edges: &[EdgeIndex]) -> Result<(), CoreError> {
        if let Reservable::Edge(edge) = element {
            if !reserved_edges.contains(&edge) {
                return Err(ProtocolError::ReservationOutsidePlan { train: self.id.clone() }.into());
            }
        }

        let _ = self.outbound.send(Outbound::ReservationRequest {
            train: self.id.clone(),
            element,
        });

        let (moving, remaining) = {
            let s = self.state.lock().await;
            let remaining = s
                .position
                .current_edge()
                .map(|edge| edge.length as f64 - s.position.offset())
                .unwrap_or(0.0);
            (s.physics.speed() > 0.0, remaining)
        };

        let guard = StopGuard::new();
        let guard_task = if moving {
            let (trigger, _) = compute_stop_timing(remaining.max(0.0) as u32, &self.config);
            let cancel = guard.cancel_token();
            let state = self.state.clone();
            Some(tokio::spawn(async move {
                tokio::select! {
                    _ = cancel.notified() => {}
                    _ = sleep(Duration::from_secs_f64(trigger.max(0.0))) => {
                        state.lock().await.physics.begin_stop();
                    }
                }
            }))
        } else {
            None
        };

        loop {
            match self.inbound.recv().await {
                Some(Inbound::ReservationConfirmed(confirmed)) if confirmed == element => break,
                Some(Inbound::ReservationConfirmed(_)) => continue,
                Some(Inbound::NavigateTo(_)) | None => {
                    return Err(ProtocolError::UnknownMessage { train: self.id.clone() }.into());
                }
            }
        }

        guard.cancel();
        if let Some(task) = guard_task {
            let _ = task.await;
        }

        if let Reservable::Edge(edge) = element {
            let mut s = self.state.lock().await;
            s.reservations.push(edge);
            let _ = self.reservations_tx.send(s.reservations.clone());
        }

        // The guard-stop may have fully decelerated the train before
        // confirmation arrived. Rather than unwind a partially-applied
        // deceleration, let it finish and resume driving (resolved Open
        // Question, see DESIGN.md).
        let finished_mid_guard_stop = {
            let s = self.state.lock().await;
            s.physics.is_stopping() && s.physics.speed() == 0.0
        };
        if finished_mid_guard_stop {
            let mut s = self.state.lock().await;
            apply_start(&mut s.physics)?;
        }

        Ok(())
    }

    async fn raise(&mut self, error: CoreError) {
        error!(train = %self.id, %error, "agent exception");
        let _ = self.outbound.send(Outbound::Exception {
            train: self.id.clone(),
            error,
        });
    }
}

/// Blocks while Central Dispatch has `stopTheWorld` in effect, resuming as
/// soon as `resume` publishes `false` (spec §4.7/§5/§7: an `Exception`
/// "suspends every agent's execution context until externally resumed").
/// Returns immediately — rather than hanging forever — if the sender side
/// is gone, which only happens as the simulation itself is tearing down.
async fn wait_while_paused(paused: &mut watch::Receiver<bool>) {
    while *paused.borrow() {
        if paused.changed().await.is_err() {
            return;
        }
    }
}

/// The periodic kinematic tick (spec §4.6): 10 ms steps, with a position
/// event published every `telemetry_every`th tick (10 Hz by default).
async fn run_ticker(
    id: TrainId,
    track: Arc<Track>,
    state: Arc<Mutex<AgentState>>,
    outbound: mpsc::UnboundedSender<Outbound>,
    telemetry_tx: watch::Sender<Telemetry>,
    reservations_tx: watch::Sender<Vec<EdgeIndex>>,
    config: SimulationConfig,
    mut paused: watch::Receiver<bool>,
) {
    let mut ticker = interval(config.tick);
    let mut tick_count: u32 = 0;
    loop {
        wait_while_paused(&mut paused).await;
        ticker.tick().await;

        let (telemetry, left_behind, reservations) = {
            let mut s = state.lock().await;
            let dt = config.tick.as_secs_f64();
            let delta = s.physics.update(dt);
            let direction = s.physics.direction();
            let left_behind = s.position.advance(&track, direction, delta);
            for edge in &left_behind {
                s.reservations.retain(|held| *held != edge.id);
            }
            let telemetry = Telemetry {
                node: s.position.node(),
                current_edge: s.position.current_edge(),
                offset: s.position.offset(),
                direction,
                velocity: s.physics.signed_velocity(),
            };
            (telemetry, left_behind, s.reservations.clone())
        };

        if !left_behind.is_empty() {
            let _ = reservations_tx.send(reservations);
        }
        for edge in left_behind {
            let _ = outbound.send(Outbound::ReservationRelease {
                train: id.clone(),
                element: Reservable::Edge(edge.id),
            });
        }

        tick_count += 1;
        if tick_count % config.telemetry_every == 0 {
            let _ = telemetry_tx.send(telemetry);
            let _ = outbound.send(Outbound::PositionUpdate {
                train: id.clone(),
                node: telemetry.node,
                current_edge: telemetry.current_edge,
                offset: telemetry.offset,
                velocity: telemetry.velocity,
            });
        }
    }
}
