//! The closed message set flowing between train agents and Central Dispatch
//! (spec §4.6/§4.7). Grounded on the teacher's `control::messages::Message`
//! — a flat, `Copy`-where-possible enum broadcast over a channel — widened
//! into an inbound/outbound pair since this protocol is agent-addressed
//! rather than broadcast.

use petgraph::graph::NodeIndex;

use crate::error::CoreError;
use crate::general::TrainId;
use crate::track::TrackEdge;
use crate::train::navigation::Reservable;

/// Sent to a train agent.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Compute a path to `dest`, compile it, and execute it.
    NavigateTo(NodeIndex),
    /// Central Dispatch granted a previously requested reservation.
    ReservationConfirmed(Reservable),
}

/// Sent by a train agent to Central Dispatch.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    ReservationRequest { train: TrainId, element: Reservable },
    ReservationRelease { train: TrainId, element: Reservable },
    PositionUpdate {
        train: TrainId,
        node: NodeIndex,
        current_edge: Option<TrackEdge>,
        offset: f64,
        velocity: f64,
    },
    NavigationComplete { train: TrainId },
    Exception { train: TrainId, error: CoreError },
}
