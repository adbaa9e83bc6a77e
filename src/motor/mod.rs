// Motor control module for the two-wheel base
//
// Provides:
// - Differential-drive kinematics (linear/angular request -> wheel targets)
// - Per-wheel filter-based controllers
// - High-level motor driver API and duty-cycle/encoder conversions

pub mod controller;
pub mod driver;
pub mod kinematics;

pub use controller::Controller;
pub use driver::{counts_to_distance, duty_cycle_to_velocity, velocity_to_duty_cycle, MotorDriver};
pub use kinematics::{DriveCommand, DriveMode, Maneuver, WheelTargets};
