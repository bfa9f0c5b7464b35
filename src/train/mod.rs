//! Everything one train needs to run as an independent tokio task: the
//! kinematics model, its projection onto the track graph, the compiled
//! navigation program it executes, and the task itself.

pub mod agent;
pub mod executor;
pub mod navigation;
pub mod physics;
pub mod position;

pub use agent::{AgentHandle, TrainAgent};
pub use navigation::NavigationEvent;
pub use physics::TrainPhysics;
pub use position::TrainPosition;
