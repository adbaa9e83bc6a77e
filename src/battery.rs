// Battery voltage monitoring
use crate::config::{
    ConfigError, BATTERY_FILTER_A, BATTERY_FILTER_B, MIN_MOTOR_VOLTAGE, POWER_OFF_VOLTAGE,
};
use crate::filter::Filter;

/// What the battery level allows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerState {
    /// Enough to drive the motors
    Ok,
    /// Powered, but too low to drive the motors
    Low,
    /// Effectively off (board running from the host link)
    Off,
}

impl PowerState {
    pub fn classify(volts: f32) -> Self {
        if volts >= MIN_MOTOR_VOLTAGE {
            PowerState::Ok
        } else if volts >= POWER_OFF_VOLTAGE {
            PowerState::Low
        } else {
            PowerState::Off
        }
    }
}

/// Low-pass filtered battery voltage
#[derive(Debug, Clone)]
pub struct BatteryMonitor {
    filter: Filter,
}

impl BatteryMonitor {
    pub fn new() -> Result<Self, ConfigError> {
        Ok(Self::with_filter(Filter::new(&BATTERY_FILTER_B, &BATTERY_FILTER_A)?))
    }

    pub fn with_filter(filter: Filter) -> Self {
        Self { filter }
    }

    /// Feed a raw reading, returning the filtered voltage
    pub fn sample(&mut self, raw_volts: f32) -> f32 {
        self.filter.value(raw_volts)
    }

    /// Latest filtered voltage
    pub fn voltage(&self) -> f32 {
        self.filter.last_output()
    }

    /// Jump straight to a settled reading
    pub fn settle_at(&mut self, volts: f32) {
        self.filter.set_to(volts);
    }

    pub fn power_state(&self) -> PowerState {
        PowerState::classify(self.voltage())
    }

    /// True while the warning should be repeated: powered but below the motor threshold
    pub fn is_low(&self) -> bool {
        let v = self.voltage();
        v > POWER_OFF_VOLTAGE && v < MIN_MOTOR_VOLTAGE
    }
}
