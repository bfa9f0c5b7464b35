//! The crate-wide error taxonomy (spec §7). Every variant is fatal to the
//! agent that raised it and is reported to Central Dispatch as an
//! `Exception` (see [`crate::messages::Outbound::Exception`]), which pauses
//! the world (`stopTheWorld`). There is no retry path in the core.

use crate::general::{Direction, TrainId};
use thiserror::Error;

/// Failures arising while building or querying the track graph.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TrackError {
    #[error("node `{0}` already has two forward edges")]
    ForwardEdgesFull(String),
    #[error("node `{0}` would accumulate more than two reverse edges")]
    ReverseEdgesFull(String),
    #[error("a node named `{0}` already exists")]
    DuplicateNode(String),
    #[error("no node named `{0}`")]
    UnknownNode(String),
    #[error("no path exists between the requested nodes")]
    Unreachable,
}

/// Violations of the inbound-message / reservation-ownership protocol.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("a train named `{0}` is already spawned")]
    TrainNameCollision(String),
    #[error("train `{train}` sent an unknown or out-of-context message")]
    UnknownMessage { train: TrainId },
    #[error("train `{holder}` is not the current holder of the reservation it tried to release")]
    NotReservationOwner { holder: TrainId },
    #[error("train `{train}` released a reservation out of FIFO order")]
    ReleaseOutOfOrder { train: TrainId },
    #[error("train `{train}` requested a reservation for an element outside its compiled path")]
    ReservationOutsidePlan { train: TrainId },
}

/// The physics and the schedule it is supposed to be driving have diverged.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PhysicsError {
    #[error("forceStop called at speed {speed}, which exceeds the 0.1 hard-stop threshold")]
    ForceStopAboveThreshold { speed: f64 },
    #[error("normalizeToClosestNode called {offset} units from the nearest node")]
    NotNearNode { offset: f64 },
}

/// An event executor invariant (legality precondition) was violated.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SequencingError {
    #[error("Start requested while the train is moving")]
    StartWhileMoving,
    #[error("SetDirection requested while the train is moving")]
    SetDirectionWhileMoving,
    #[error("SetDirection({expected:?}) left the train facing {actual:?}")]
    DirectionFlipMismatch { expected: Direction, actual: Direction },
    #[error("SetSwitch(curve) requested on a non-branching node `{0}`")]
    SwitchCurveOnStraightNode(String),
}

/// The single error type shared across every subsystem. Grouped by kind so
/// logging and caller `match`es stay uniform (see spec §7).
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CoreError {
    #[error(transparent)]
    Track(#[from] TrackError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Physics(#[from] PhysicsError),
    #[error(transparent)]
    Sequencing(#[from] SequencingError),
    #[error("reservation for train `{0}` would close a hold-and-wait cycle")]
    Deadlock(TrainId),
}
