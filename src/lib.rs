//! Core simulation and dispatch engine for autonomous trains sharing a
//! switched rail graph: a track topology with Dijkstra routing, per-train
//! kinematics and navigation-program execution, and a central reservation
//! arbiter that serializes access to track segments and detects deadlocks.

/// Shared, dependency-free types referenced throughout the crate.
pub mod general;

/// The crate-wide error taxonomy.
pub mod error;

/// The track graph: nodes, directed edges with automatic reverses, switch
/// state, and shortest-path routing.
pub mod track;

/// Everything one train needs to run as an independent tokio task.
pub mod train;

/// Central Dispatch: the reservation arbiter and message hub shared by
/// every train agent.
pub mod dispatch;

/// The closed message set flowing between train agents and Central
/// Dispatch.
pub mod messages;

pub use dispatch::Dispatch;
pub use error::CoreError;
pub use general::{Direction, SimulationConfig, TrainId};
pub use track::{Branch, Builder as TrackBuilder, Track};
pub use train::{AgentHandle, TrainAgent};
