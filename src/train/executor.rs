//! Per-event semantics for a compiled navigation program (spec §4.5).
//!
//! The synchronous events (`SetDirection`, `SetSwitch`, `Start`) are plain
//! functions here. `Stop` and `Reserve` involve timers and cross-task
//! coordination, so only their pure math (`compute_stop_timing`) and
//! cancellation handle (`StopGuard`) live here — the actual `select!` loop
//! that races a timer against cancellation runs in
//! [`crate::train::agent`], generalizing the teacher's `wait_and_run`
//! (`components/mod.rs`): a `Notify`-cancellable `tokio::time::sleep`.

use std::sync::Arc;

use petgraph::graph::NodeIndex;
use tokio::sync::Notify;

use crate::error::SequencingError;
use crate::general::{Direction, SimulationConfig};
use crate::track::{Branch, Track};

use super::physics::TrainPhysics;

/// `SetDirection(d)`: only legal while stopped, where the flip is immediate.
/// Asserts the post-flip direction actually matches `direction` (spec §4.5)
/// with a checked condition rather than a `debug_assert!` — a mismatch here
/// is a real physics/schedule divergence and must fail in release builds
/// too, not just under debug assertions.
pub fn apply_set_direction(physics: &mut TrainPhysics, direction: Direction) -> Result<(), SequencingError> {
    if physics.speed() != 0.0 {
        return Err(SequencingError::SetDirectionWhileMoving);
    }
    physics.request_direction_change();
    if physics.direction() != direction {
        return Err(SequencingError::DirectionFlipMismatch {
            expected: direction,
            actual: physics.direction(),
        });
    }
    Ok(())
}

/// `SetSwitch(n, b)`: a no-op on a non-branching node if `b == Straight`;
/// fails if `b == Curve` there. Otherwise commits the new switch state.
pub fn apply_set_switch(track: &Track, node: NodeIndex, branch: Branch) -> Result<(), SequencingError> {
    if track.edge_count(node) != 3 {
        return match branch {
            Branch::Straight => Ok(()),
            Branch::Curve => Err(SequencingError::SwitchCurveOnStraightNode(
                track.node_name(node).to_string(),
            )),
        };
    }
    track.set_switch_state(node, branch);
    Ok(())
}

/// `Start`: only legal while stopped; clears the deceleration flag so the
/// next kinematic tick resumes accelerating.
pub fn apply_start(physics: &mut TrainPhysics) -> Result<(), SequencingError> {
    if physics.speed() != 0.0 {
        return Err(SequencingError::StartWhileMoving);
    }
    physics.clear_stop();
    Ok(())
}

/// Computes `(timeToTriggerStop, timeToStop)` for a scheduled stop over
/// `distance` units, given the running config's acceleration profile.
///
/// Two regimes: if the train can't reach max speed before it must start
/// decelerating to cover `distance` exactly, both timers collapse to the
/// same value (`sqrt(distance / a)`, an acceleration-only round trip).
/// Otherwise it cruises at max speed for the remainder before decelerating.
pub fn compute_stop_timing(distance: u32, config: &SimulationConfig) -> (f64, f64) {
    let distance = distance as f64;
    let max_stopping_distance = config.max_stopping_distance();

    if max_stopping_distance > distance / 2.0 {
        let t = (distance / config.acceleration).sqrt();
        (t, t)
    } else {
        let time_to_trigger = config.time_to_max_speed()
            + (distance - max_stopping_distance - config.distance_accelerating_from_stop())
                / config.max_speed;
        let time_to_stop = config.max_speed / config.deceleration.abs();
        (time_to_trigger, time_to_stop)
    }
}

/// A cancellation handle for an in-flight scheduled stop. Cloning shares the
/// same underlying `Notify`, mirroring the teacher's `reenter_notifier`
/// pattern: whichever holder calls `cancel` wakes every `select!` racing it.
#[derive(Debug, Clone, Default)]
pub struct StopGuard {
    cancel: Arc<Notify>,
}

impl StopGuard {
    pub fn new() -> Self {
        StopGuard { cancel: Arc::new(Notify::new()) }
    }

    pub fn cancel(&self) {
        self.cancel.notify_waiters();
    }

    pub fn cancel_token(&self) -> Arc<Notify> {
        self.cancel.clone()
    }
}
