// High-level motor driver for the two-wheel base
//
// Wraps the board's PWM outputs with clamping and logging, and holds the
// empirical duty-cycle <-> wheel-speed maps and the encoder scale.

use std::f32::consts::PI;

use tracing::{debug, info};

use crate::config::{
    COUNTS_PER_MOTOR_REV, DUTY_OFFSET, DUTY_SLOPE_LEFT, DUTY_SLOPE_RIGHT, GEAR_RATIO,
    MAX_DUTY_CYCLE, WHEEL_RADIUS,
};
use crate::hal::{Board, Side};

fn duty_slope(side: Side) -> f32 {
    match side {
        Side::Left => DUTY_SLOPE_LEFT,
        Side::Right => DUTY_SLOPE_RIGHT,
    }
}

/// Wheel speed (m/s) produced by a duty cycle (%)
pub fn duty_cycle_to_velocity(side: Side, duty_cycle: i16) -> f32 {
    duty_cycle as f32 * duty_slope(side) + DUTY_OFFSET
}

/// Duty cycle (%) needed for a wheel speed (m/s), truncated toward zero
pub fn velocity_to_duty_cycle(side: Side, velocity: f32) -> i16 {
    let dc = ((velocity - DUTY_OFFSET) / duty_slope(side)) as i32;
    dc.clamp(i16::MIN as i32, i16::MAX as i32) as i16
}

/// Wheel travel (m) for a number of encoder counts
pub fn counts_to_distance(counts: i32) -> f32 {
    counts as f32 * 2.0 * PI * WHEEL_RADIUS / (COUNTS_PER_MOTOR_REV * GEAR_RATIO)
}

/// Borrowing driver over a board's motor outputs
pub struct MotorDriver<'a, B: Board> {
    board: &'a mut B,
}

impl<'a, B: Board> MotorDriver<'a, B> {
    pub fn new(board: &'a mut B) -> Self {
        Self { board }
    }

    /// Set both duty cycles (percent, sign = direction), clamped to ±100
    pub fn set_duty(&mut self, left: i16, right: i16) {
        let left = left.clamp(-MAX_DUTY_CYCLE, MAX_DUTY_CYCLE);
        let right = right.clamp(-MAX_DUTY_CYCLE, MAX_DUTY_CYCLE);
        debug!("Setting duty cycles: left={}, right={}", left, right);
        self.board.set_motor_pwm(left, right);
    }

    pub fn enable(&mut self, enable: bool) {
        self.board.enable_motor_output(enable);
    }

    /// Apply duty cycles and switch the outputs on
    pub fn drive(&mut self, left: i16, right: i16) {
        self.set_duty(left, right);
        self.enable(true);
    }

    /// Zero both outputs and switch them off
    pub fn stop(&mut self) {
        if self.board.motor_output_enabled() {
            info!("Stopping both motors");
        }
        self.board.set_motor_pwm(0, 0);
        self.board.enable_motor_output(false);
    }

    pub fn duty(&self) -> (i16, i16) {
        self.board.motor_pwm()
    }

    /// Accumulated wheel travel in meters
    pub fn distances(&self) -> (f32, f32) {
        let (left, right) = self.board.encoder_counts();
        (counts_to_distance(left), counts_to_distance(right))
    }
}
