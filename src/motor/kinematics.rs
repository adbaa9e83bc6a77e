// Differential-drive kinematics for the two-wheel base
// Converts a linear + angular request into per-wheel distance and velocity targets.
//
// Positive angular amounts turn left (counter-clockwise). In a turn the wheel
// on the side of the turn is the inner wheel.

use crate::config::{
    HALF_WHEEL_BASE, MIN_TURN_ARC, SPIN_DUTY_CYCLE, STRAIGHT_DUTY_CYCLE, STRAIGHT_THRESHOLD,
    TURN_VELOCITY, WHEEL_BASE,
};
use crate::hal::Side;
use crate::motor::driver::duty_cycle_to_velocity;

/// Shape of the planned motion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Maneuver {
    Straight,
    /// Zero-radius turn, wheels in opposite directions
    Spin,
    /// Both wheels on concentric arcs
    Arc,
}

/// Whether the request carries distances or velocities
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriveMode {
    Distance,
    Velocity,
}

/// Per-wheel targets. Distances are zero in velocity mode.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WheelTargets {
    pub distance_left: f32,
    pub distance_right: f32,
    pub velocity_left: f32,
    pub velocity_right: f32,
    pub maneuver: Maneuver,
}

/// A drive request as received over the link
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DriveCommand {
    pub mode: DriveMode,
    /// Meters (distance mode) or m/s (velocity mode)
    pub linear: f32,
    /// Radians (distance mode) or rad/s (velocity mode)
    pub angular: f32,
    /// Stop the motors after this many seconds
    pub stop_after: Option<f32>,
}

impl DriveCommand {
    pub fn targets(&self) -> WheelTargets {
        match self.mode {
            DriveMode::Distance => plan_distance(self.linear, self.angular),
            DriveMode::Velocity => plan_velocity(self.linear, self.angular),
        }
    }
}

/// Geometry and speeds used by the planner
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DriveGeometry {
    pub wheel_base: f32,
    pub half_wheel_base: f32,
    pub min_turn_arc: f32,
    pub turn_velocity: f32,
    pub straight_threshold: f32,
    /// Default straight-line speeds (left, right) in distance mode
    pub straight_velocity: (f32, f32),
    /// Spin speeds (left, right)
    pub spin_velocity: (f32, f32),
}

impl Default for DriveGeometry {
    fn default() -> Self {
        Self {
            wheel_base: WHEEL_BASE,
            half_wheel_base: HALF_WHEEL_BASE,
            min_turn_arc: MIN_TURN_ARC,
            turn_velocity: TURN_VELOCITY,
            straight_threshold: STRAIGHT_THRESHOLD,
            straight_velocity: (
                duty_cycle_to_velocity(Side::Left, STRAIGHT_DUTY_CYCLE),
                duty_cycle_to_velocity(Side::Right, STRAIGHT_DUTY_CYCLE),
            ),
            spin_velocity: (
                duty_cycle_to_velocity(Side::Left, SPIN_DUTY_CYCLE),
                duty_cycle_to_velocity(Side::Right, SPIN_DUTY_CYCLE),
            ),
        }
    }
}

/// Plan a move of `linear` meters while turning through `angular` radians
pub fn plan_distance(linear: f32, angular: f32) -> WheelTargets {
    plan_distance_with_params(linear, angular, &DriveGeometry::default())
}

/// Plan a move with custom geometry
///
/// * straight when `|angular|` is below the threshold
/// * spin in place when the (non-negative) arc is shorter than `min_turn_arc`
/// * otherwise an arc turn where the inner wheel covers `linear` at `turn_velocity`
///   and the outer wheel's speed is scaled so both finish together
pub fn plan_distance_with_params(linear: f32, angular: f32, geo: &DriveGeometry) -> WheelTargets {
    if angular.abs() < geo.straight_threshold {
        return WheelTargets {
            distance_left: linear,
            distance_right: linear,
            velocity_left: geo.straight_velocity.0,
            velocity_right: geo.straight_velocity.1,
            maneuver: Maneuver::Straight,
        };
    }

    // Turns never run backwards
    let linear = linear.abs();
    let turn = angular.abs();
    let turning_left = angular > 0.0;

    if linear < geo.min_turn_arc {
        let d = geo.half_wheel_base * turn / 2.0;
        let (distance_left, distance_right) = if turning_left { (-d, d) } else { (d, -d) };
        return WheelTargets {
            distance_left,
            distance_right,
            velocity_left: geo.spin_velocity.0,
            velocity_right: geo.spin_velocity.1,
            maneuver: Maneuver::Spin,
        };
    }

    let inner_distance = linear;
    let radius = linear / turn;
    let outer_distance = turn * (radius + geo.wheel_base);
    let duration = inner_distance / geo.turn_velocity;
    let inner_velocity = geo.turn_velocity;
    let outer_velocity = outer_distance / duration;

    if turning_left {
        WheelTargets {
            distance_left: inner_distance,
            distance_right: outer_distance,
            velocity_left: inner_velocity,
            velocity_right: outer_velocity,
            maneuver: Maneuver::Arc,
        }
    } else {
        WheelTargets {
            distance_left: outer_distance,
            distance_right: inner_distance,
            velocity_left: outer_velocity,
            velocity_right: inner_velocity,
            maneuver: Maneuver::Arc,
        }
    }
}

/// Plan a continuous drive at `velocity` m/s while turning at `angular` rad/s
pub fn plan_velocity(velocity: f32, angular: f32) -> WheelTargets {
    plan_velocity_with_params(velocity, angular, &DriveGeometry::default())
}

/// Velocity planning with custom geometry. The inner wheel keeps the requested
/// speed and the outer wheel gets `velocity + wheel_base * |angular|`.
pub fn plan_velocity_with_params(velocity: f32, angular: f32, geo: &DriveGeometry) -> WheelTargets {
    if angular.abs() < geo.straight_threshold {
        return WheelTargets {
            distance_left: 0.0,
            distance_right: 0.0,
            velocity_left: velocity,
            velocity_right: velocity,
            maneuver: Maneuver::Straight,
        };
    }

    let outer = velocity + geo.wheel_base * angular.abs();
    let (velocity_left, velocity_right) = if angular > 0.0 {
        (velocity, outer)
    } else {
        (outer, velocity)
    };

    WheelTargets {
        distance_left: 0.0,
        distance_right: 0.0,
        velocity_left,
        velocity_right,
        maneuver: Maneuver::Arc,
    }
}
