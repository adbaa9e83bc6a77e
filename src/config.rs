// Geometry, thresholds, periods, controller tuning and runtime options
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

// Main loop pacing on a hosted machine
pub const LOOP_PERIOD: Duration = Duration::from_micros(500);

// Serial link defaults
pub const DEFAULT_PORT: &str = "/dev/ttyACM0";
pub const DEFAULT_BAUDRATE: u32 = 115_200;
pub const SERIAL_TIMEOUT: Duration = Duration::from_millis(5);

// Drive geometry (meters)
pub const WHEEL_BASE: f32 = 0.098;
pub const HALF_WHEEL_BASE: f32 = 0.049;
pub const WHEEL_RADIUS: f32 = 0.0195;

// Encoder: counts per motor shaft revolution and gearbox ratio
pub const COUNTS_PER_MOTOR_REV: f32 = 12.0;
pub const GEAR_RATIO: f32 = 75.81;

// Turn planning
pub const TURN_VELOCITY: f32 = 0.1; // m/s, inner wheel of an arc turn
pub const MIN_TURN_ARC: f32 = 0.04; // m, shorter arcs become spins
pub const STRAIGHT_THRESHOLD: f32 = 0.01; // rad or rad/s, below this we drive straight
pub const SPIN_DUTY_CYCLE: i16 = 25;
pub const STRAIGHT_DUTY_CYCLE: i16 = 75;

// Duty cycle (%) to wheel speed (m/s): v = slope * dc + offset
pub const DUTY_SLOPE_LEFT: f32 = 0.0033;
pub const DUTY_SLOPE_RIGHT: f32 = 0.0034;
pub const DUTY_OFFSET: f32 = 0.0133;
pub const MAX_DUTY_CYCLE: i16 = 100;

// Battery thresholds (volts)
pub const MIN_MOTOR_VOLTAGE: f32 = 4.75;
pub const POWER_OFF_VOLTAGE: f32 = 3.0;

// Battery low-pass filter
pub const BATTERY_FILTER_B: [f32; 2] = [0.03046, 0.03046];
pub const BATTERY_FILTER_A: [f32; 2] = [1.0, -0.93908];

// Periodic housekeeping (milliseconds)
pub const BATTERY_TASK_PERIOD_MS: f32 = 2.0;
pub const LOW_BATTERY_PERIOD_MS: f32 = 1000.0;
pub const CONTROL_UPDATE_PERIOD_MS: f32 = 10.0;

// Wheel velocity controllers (PI in difference-equation form)
pub const KP_LEFT: f32 = 0.1875335;
pub const KP_RIGHT: f32 = 0.1728258;
pub const CONTROLLER_B_LEFT: [f32; 2] = [0.187533508705, 0.124897316798];
pub const CONTROLLER_B_RIGHT: [f32; 2] = [0.172825818795, 0.130440286735];
pub const CONTROLLER_A: [f32; 2] = [1.0, -1.0];

// Obstacle avoidance
pub const OA_TURN_VELOCITY: f32 = 1.0;
pub const OA_ANGULAR_VELOCITY: f32 = 1.0;
pub const OA_DRIVE_DUTY_CYCLE: i16 = 25;
pub const OA_HOLD_TIMEOUT: u16 = 200;

// Payload sent by the float round-trip timer
pub const FLOAT_PROBE_VALUE: f32 = 12.345;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid filter coefficients: {0}")]
    Coefficients(String),

    #[error("Invalid update period: {0} ms")]
    UpdatePeriod(f32),
}

/// How wheel duty cycles are derived while a motion flag is active
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ControlStrategy {
    /// Feed measured wheel speed through the controller filter
    ClosedLoop,
    /// Map the target velocity straight to a duty cycle
    #[default]
    DirectMapping,
}

/// Per-wheel controller tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerTuning {
    pub kp: f32,
    pub b: Vec<f32>,
    pub a: Vec<f32>,
}

/// Options that may be overridden from the command line or a JSON file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub strategy: ControlStrategy,
    /// Emit diagnostic frames (maneuver names, per-tick duty cycles)
    pub diagnostics: bool,
    pub update_period_ms: f32,
    pub left: ControllerTuning,
    pub right: ControllerTuning,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            strategy: ControlStrategy::default(),
            diagnostics: false,
            update_period_ms: CONTROL_UPDATE_PERIOD_MS,
            left: ControllerTuning {
                kp: KP_LEFT,
                b: CONTROLLER_B_LEFT.to_vec(),
                a: CONTROLLER_A.to_vec(),
            },
            right: ControllerTuning {
                kp: KP_RIGHT,
                b: CONTROLLER_B_RIGHT.to_vec(),
                a: CONTROLLER_A.to_vec(),
            },
        }
    }
}

impl RuntimeConfig {
    /// Load from a JSON file; missing fields keep their defaults
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let config: RuntimeConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.update_period_ms > 0.0) {
            return Err(ConfigError::UpdatePeriod(self.update_period_ms));
        }
        for tuning in [&self.left, &self.right] {
            crate::filter::Filter::new(&tuning.b, &tuning.a)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(RuntimeConfig::default().validate().is_ok());
        assert_eq!(RuntimeConfig::default().strategy, ControlStrategy::DirectMapping);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config: RuntimeConfig =
            serde_json::from_str(r#"{"strategy": "closed_loop", "diagnostics": true}"#).unwrap();
        assert_eq!(config.strategy, ControlStrategy::ClosedLoop);
        assert!(config.diagnostics);
        assert_eq!(config.update_period_ms, CONTROL_UPDATE_PERIOD_MS);
        assert_eq!(config.left.b, CONTROLLER_B_LEFT.to_vec());
    }

    #[test]
    fn test_rejects_non_positive_period() {
        let config = RuntimeConfig {
            update_period_ms: 0.0,
            ..RuntimeConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::UpdatePeriod(_))));
    }

    #[test]
    fn test_rejects_mismatched_coefficients() {
        let mut config = RuntimeConfig::default();
        config.right.a = vec![1.0];
        assert!(matches!(config.validate(), Err(ConfigError::Coefficients(_))));
    }

    #[test]
    fn test_load_missing_file() {
        let err = RuntimeConfig::load(Path::new("/nonexistent/twowheel.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
