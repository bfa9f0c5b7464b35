//! Continuous kinematics (spec §4.2): a scalar speed clamped to
//! `[0, maxSpeed]`, a committed direction, and the two in-flight flags that
//! make direction changes and scheduled stops safe to request while moving.
//!
//! The teacher drives speed by issuing discrete step messages to hardware
//! (`Train::speed_accelerator` in `control/train.rs`); this core instead
//! integrates continuously, but keeps the same shape — a struct of scalar
//! state advanced by a `Duration` each tick.

use crate::error::PhysicsError;
use crate::general::{Direction, SimulationConfig};

/// One train's speed, direction and the two flags that gate how the next
/// `update` interprets those constants.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrainPhysics {
    direction: Direction,
    speed: f64,
    stopping: bool,
    changing_direction: bool,
    config: SimulationConfig,
}

/// The minimum distinguishable speed below which `forceStop` is allowed to
/// hard-zero the train instead of failing.
const FORCE_STOP_THRESHOLD: f64 = 0.1;

impl TrainPhysics {
    pub fn new(direction: Direction, config: SimulationConfig) -> Self {
        TrainPhysics {
            direction,
            speed: 0.0,
            stopping: false,
            changing_direction: false,
            config,
        }
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }

    /// `speed` signed by `direction`'s coefficient.
    pub fn signed_velocity(&self) -> f64 {
        self.speed * self.direction.coefficient()
    }

    pub fn is_stopping(&self) -> bool {
        self.stopping
    }

    pub fn is_changing_direction(&self) -> bool {
        self.changing_direction
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// Begins decelerating to a stop. Idempotent.
    pub fn begin_stop(&mut self) {
        self.stopping = true;
    }

    /// `Start` (spec §4.5): clears the deceleration flag so the next
    /// `update` resumes accelerating. Caller asserts the train was stopped.
    pub fn clear_stop(&mut self) {
        self.stopping = false;
    }

    /// Requests a direction flip. Flips immediately if already stopped;
    /// otherwise begins decelerating and defers the flip to the update that
    /// first observes `speed == 0`.
    pub fn request_direction_change(&mut self) {
        if self.speed == 0.0 {
            self.direction = self.direction.inverted();
        } else {
            self.stopping = true;
            self.changing_direction = true;
        }
    }

    /// Advances the model by `dt` seconds, returning the unsigned distance
    /// travelled along the current direction this tick (always ≥ 0; the
    /// caller applies `direction` when projecting onto the track).
    pub fn update(&mut self, dt: f64) -> f64 {
        if self.changing_direction && self.speed == 0.0 {
            self.direction = self.direction.inverted();
            self.changing_direction = false;
            self.stopping = false;
        }

        if self.stopping {
            self.decelerate(dt)
        } else {
            self.accelerate(dt)
        }
    }

    fn accelerate(&mut self, dt: f64) -> f64 {
        let v0 = self.speed;
        let a = self.config.acceleration;
        let max_speed = self.config.max_speed;

        let delta = if v0 + a * dt <= max_speed {
            self.speed = v0 + a * dt;
            v0 * dt + a * dt * dt / 2.0
        } else {
            let t1 = (max_speed - v0) / a;
            self.speed = max_speed;
            (v0 * t1 + a * t1 * t1 / 2.0) + max_speed * (dt - t1)
        };
        delta
    }

    fn decelerate(&mut self, dt: f64) -> f64 {
        let v0 = self.speed;
        let d = self.config.deceleration;

        let delta = if v0 + d * dt >= 0.0 {
            self.speed = v0 + d * dt;
            v0 * dt + d * dt * dt / 2.0
        } else {
            let t1 = v0 / d.abs();
            self.speed = 0.0;
            v0 * t1 + d * t1 * t1 / 2.0
        };
        delta
    }

    /// Hard-zeroes the speed. Only legal below the force-stop threshold —
    /// this is an emergency abort, not a substitute for scheduled stopping.
    pub fn force_stop(&mut self) -> Result<(), PhysicsError> {
        if self.speed >= FORCE_STOP_THRESHOLD {
            return Err(PhysicsError::ForceStopAboveThreshold { speed: self.speed });
        }
        self.speed = 0.0;
        self.stopping = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SimulationConfig {
        SimulationConfig::default()
    }

    #[test]
    fn accelerates_linearly_below_max_speed() {
        let mut p = TrainPhysics::new(Direction::Forward, config());
        let delta = p.update(1.0);
        assert_eq!(p.speed(), 2.0);
        assert_eq!(delta, 1.0); // 0*1 + 2*1^2/2
    }

    #[test]
    fn clamps_at_max_speed_mid_tick() {
        let mut p = TrainPhysics::new(Direction::Forward, config());
        // reach max speed (10.0) after 5s at a=2.0, then tick across the boundary
        let delta = p.update(6.0);
        assert_eq!(p.speed(), 10.0);
        // t1 = 5s to reach max: delta = 0*5 + 2*25/2 = 25, then +10*1 = 35
        assert!((delta - 35.0).abs() < 1e-9);
    }

    #[test]
    fn decelerates_to_zero_and_clamps() {
        let mut p = TrainPhysics::new(Direction::Forward, config());
        p.update(5.0); // speed = 10.0
        p.begin_stop();
        let delta = p.update(10.0); // would go negative at d=-2.0
        assert_eq!(p.speed(), 0.0);
        // t1 = 10/2 = 5s: delta = 10*5 + (-2)*25/2 = 50 - 25 = 25
        assert!((delta - 25.0).abs() < 1e-9);
    }

    #[test]
    fn direction_change_while_moving_defers_the_flip() {
        let mut p = TrainPhysics::new(Direction::Forward, config());
        p.update(1.0); // now moving
        p.request_direction_change();
        assert_eq!(p.direction(), Direction::Forward);
        assert!(p.is_changing_direction());
        assert!(p.is_stopping());

        // decelerate down to exactly zero
        while p.speed() > 0.0 {
            p.update(0.01);
        }
        p.update(0.01); // the tick that observes speed == 0 performs the flip
        assert_eq!(p.direction(), Direction::Backward);
        assert!(!p.is_changing_direction());
        assert!(!p.is_stopping());
    }

    #[test]
    fn direction_change_while_stopped_flips_immediately() {
        let mut p = TrainPhysics::new(Direction::Forward, config());
        p.request_direction_change();
        assert_eq!(p.direction(), Direction::Backward);
        assert!(!p.is_stopping());
    }

    #[test]
    fn force_stop_rejects_speed_at_or_above_threshold() {
        let mut p = TrainPhysics::new(Direction::Forward, config());
        p.update(0.2); // speed = 0.4, above threshold
        assert_eq!(
            p.force_stop(),
            Err(PhysicsError::ForceStopAboveThreshold { speed: p.speed() })
        );
    }

    #[test]
    fn force_stop_accepts_speed_below_threshold() {
        let mut p = TrainPhysics::new(Direction::Forward, config());
        p.update(0.02); // speed = 0.04
        assert!(p.force_stop().is_ok());
        assert_eq!(p.speed(), 0.0);
    }

    #[test]
    fn derived_quantities_match_default_constants() {
        let c = config();
        assert_eq!(c.max_stopping_distance(), 25.0);
        assert_eq!(c.distance_accelerating_from_stop(), 25.0);
        assert_eq!(c.time_to_max_speed(), 5.0);
    }
}

/// Property-based checks of the closed-form kinematic laws from spec §8:
/// `speed(t) = min(a*t, maxSpeed)` while accelerating from rest, and a
/// deceleration run of exactly `v/|d|` seconds covers `v^2/(2|d|)` and lands
/// on zero, for any starting speed reachable below the default max.
#[cfg(test)]
mod kinematic_laws {
    use super::*;
    use proptest::prelude::*;

    fn config() -> SimulationConfig {
        SimulationConfig::default()
    }

    proptest! {
        #[test]
        fn speed_from_rest_matches_the_closed_form(t in 0.0f64..4.9) {
            let c = config();
            let mut p = TrainPhysics::new(Direction::Forward, c);
            p.update(t);
            let expected = (c.acceleration * t).min(c.max_speed);
            prop_assert!((p.speed() - expected).abs() < 1e-6);
        }

        #[test]
        fn stopping_takes_v_over_d_seconds_and_covers_v_squared_over_two_d(run_up in 0.1f64..4.9) {
            let c = config();
            let mut p = TrainPhysics::new(Direction::Forward, c);
            p.update(run_up);
            let v0 = p.speed();

            p.begin_stop();
            let expected_time = v0 / c.deceleration.abs();
            let expected_distance = v0 * v0 / (2.0 * c.deceleration.abs());
            let distance = p.update(expected_time);

            prop_assert!(p.speed().abs() < 1e-6);
            prop_assert!((distance - expected_distance).abs() < 1e-6);
        }
    }
}
