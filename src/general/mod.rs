//! Shared, dependency-free types referenced throughout the crate.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Identifies one train across the lifetime of the process.
///
/// Cheap to clone (an `Arc<str>` underneath) since it is threaded through
/// every message, log field and observable in the crate.
#[derive(Debug, Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct TrainId(Arc<str>);

impl TrainId {
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        TrainId(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TrainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for TrainId {
    fn from(value: &str) -> Self {
        TrainId::new(value)
    }
}

impl From<String> for TrainId {
    fn from(value: String) -> Self {
        TrainId::new(value)
    }
}

/// The direction a train is currently committed to, shared between the
/// track graph (which forward/reverse edge set a node's traversal rule
/// consults) and the kinematics (sign of the signed velocity).
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum Direction {
    Forward,
    Backward,
}

impl Direction {
    /// `+1` for forward, `-1` for backward — multiply by scalar speed to
    /// obtain signed velocity.
    pub fn coefficient(self) -> f64 {
        match self {
            Direction::Forward => 1.0,
            Direction::Backward => -1.0,
        }
    }

    pub fn inverted(self) -> Direction {
        match self {
            Direction::Forward => Direction::Backward,
            Direction::Backward => Direction::Forward,
        }
    }
}

/// The physical constants and scheduling cadence the rest of the crate is
/// parameterized over. Injected explicitly (as an `Arc<SimulationConfig>`
/// passed around like the teacher's `Arc<Railroad<...>>`) rather than read
/// from a global, so tests can exercise non-default constants without
/// touching call sites — see the "no global mutable state" design note.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimulationConfig {
    /// Units/s^2, applied while accelerating. Must be positive.
    pub acceleration: f64,
    /// Units/s^2, applied while decelerating. Must be negative.
    pub deceleration: f64,
    /// Units/s, the speed ceiling.
    pub max_speed: f64,
    /// Kinematic tick period.
    pub tick: Duration,
    /// Emit a position telemetry event every Nth tick.
    pub telemetry_every: u32,
    /// Default for `find_path`'s `allow_backward_movement` parameter.
    pub allow_backward_movement: bool,
}

impl SimulationConfig {
    /// `maxSpeed^2 / (2|d|)` — distance needed to decelerate from max speed.
    pub fn max_stopping_distance(&self) -> f64 {
        self.max_speed.powi(2) / (2.0 * self.deceleration.abs())
    }

    /// `maxSpeed^2 / (2a)` — distance covered while accelerating from a stop
    /// to max speed.
    pub fn distance_accelerating_from_stop(&self) -> f64 {
        self.max_speed.powi(2) / (2.0 * self.acceleration)
    }

    /// `maxSpeed / a` — time needed to accelerate from a stop to max speed.
    pub fn time_to_max_speed(&self) -> f64 {
        self.max_speed / self.acceleration
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        SimulationConfig {
            acceleration: 2.0,
            deceleration: -2.0,
            max_speed: 10.0,
            tick: Duration::from_millis(10),
            telemetry_every: 100,
            allow_backward_movement: true,
        }
    }
}
