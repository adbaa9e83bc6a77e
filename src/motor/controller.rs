// Per-wheel motion controller wrapping an IIR filter
//
//   target --> (+) --> [filter] --> output
//               -
//               |--- measured speed (position delta / dt)

use crate::config::{ConfigError, ControllerTuning};
use crate::filter::Filter;

#[derive(Debug, Clone)]
pub struct Controller {
    filter: Filter,
    kp: f32,
    target_position: f32,
    target_velocity: f32,
    update_period: f32, // ms
}

impl Controller {
    /// Create a controller. `kp` is kept for reference; the filter coefficients
    /// already carry the gain.
    pub fn new(kp: f32, b: &[f32], a: &[f32], update_period: f32) -> Result<Self, ConfigError> {
        if !(update_period > 0.0) {
            return Err(ConfigError::UpdatePeriod(update_period));
        }
        Ok(Self {
            filter: Filter::new(b, a)?,
            kp,
            target_position: 0.0,
            target_velocity: 0.0,
            update_period,
        })
    }

    pub fn from_tuning(tuning: &ControllerTuning, update_period: f32) -> Result<Self, ConfigError> {
        Self::new(tuning.kp, &tuning.b, &tuning.a, update_period)
    }

    pub fn set_target_velocity(&mut self, velocity: f32) {
        self.target_velocity = velocity;
    }

    pub fn set_target_position(&mut self, position: f32) {
        self.target_position = position;
    }

    pub fn target_velocity(&self) -> f32 {
        self.target_velocity
    }

    pub fn target_position(&self) -> f32 {
        self.target_position
    }

    /// Update period in milliseconds
    pub fn update_period(&self) -> f32 {
        self.update_period
    }

    pub fn kp(&self) -> f32 {
        self.kp
    }

    /// Feed a position delta measured over `dt` seconds and return the new
    /// control value. `dt` must be positive.
    pub fn update(&mut self, measurement: f32, dt: f32) -> f32 {
        let error = self.target_velocity - measurement / dt;
        self.filter.value(error)
    }

    /// Direction-free variant of `update`: drives the measured speed toward
    /// `|target_velocity|`. The caller applies the direction to the output.
    pub fn update_magnitude(&mut self, measurement: f32, dt: f32) -> f32 {
        let error = self.target_velocity.abs() - measurement.abs() / dt;
        self.filter.value(error)
    }

    /// Last control value without updating
    pub fn last(&self) -> f32 {
        self.filter.last_output()
    }

    pub fn set_to(&mut self, value: f32) {
        self.filter.set_to(value);
    }

    pub fn shift_by(&mut self, amount: f32) {
        self.filter.shift_by(amount);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setters_have_no_side_effects() {
        let mut c = Controller::new(0.5, &[1.0], &[1.0], 10.0).unwrap();
        c.set_target_velocity(0.2);
        c.set_target_position(1.5);
        assert_eq!(c.target_velocity(), 0.2);
        assert_eq!(c.target_position(), 1.5);
        assert_eq!(c.last(), 0.0);
        assert_eq!(c.kp(), 0.5);
        assert_eq!(c.update_period(), 10.0);
    }

    #[test]
    fn test_update_filters_velocity_error() {
        // Pass-through filter exposes the raw error
        let mut c = Controller::new(1.0, &[1.0], &[1.0], 10.0).unwrap();
        c.set_target_velocity(0.5);
        // 0.004 m over 0.01 s = 0.4 m/s
        let out = c.update(0.004, 0.01);
        assert!((out - 0.1).abs() < 1e-5);
        assert!((c.last() - 0.1).abs() < 1e-5);
    }

    #[test]
    fn test_integrating_controller_accumulates_error() {
        let mut c = Controller::new(1.0, &[1.0, 0.0], &[1.0, -1.0], 10.0).unwrap();
        c.set_target_velocity(1.0);
        let first = c.update(0.0, 0.01);
        let second = c.update(0.0, 0.01);
        assert!((first - 1.0).abs() < 1e-6);
        assert!((second - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_update_magnitude_ignores_direction() {
        let mut forward = Controller::new(1.0, &[1.0], &[1.0], 10.0).unwrap();
        let mut reverse = forward.clone();
        forward.set_target_velocity(0.5);
        reverse.set_target_velocity(-0.5);
        let a = forward.update_magnitude(0.004, 0.01);
        let b = reverse.update_magnitude(-0.004, 0.01);
        assert!((a - 0.1).abs() < 1e-5);
        assert_eq!(a, b);
    }

    #[test]
    fn test_rejects_zero_period() {
        assert!(Controller::new(1.0, &[1.0], &[1.0], 0.0).is_err());
    }

    #[test]
    fn test_set_to_and_shift() {
        let mut c = Controller::new(1.0, &[0.5, -0.5], &[1.0, -1.0], 10.0).unwrap();
        c.set_to(2.0);
        assert_eq!(c.last(), 2.0);
        c.shift_by(-1.0);
        assert_eq!(c.last(), 1.0);
    }
}
