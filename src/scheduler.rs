// Scheduler state shared by the dispatcher and the main loop
//
// Everything that used to be a process-wide singleton lives here: the flag
// table, both wheel controllers, the battery filter, the obstacle machine and
// the motion tracker. A restart rebuilds it in place.

use tracing::info;

use crate::battery::{BatteryMonitor, PowerState};
use crate::config::{BATTERY_TASK_PERIOD_MS, ConfigError, ControlStrategy, RuntimeConfig};
use crate::flags::{FlagId, Flags};
use crate::hal::{Board, Led, Side};
use crate::motor::driver::{MotorDriver, velocity_to_duty_cycle};
use crate::motor::kinematics::{DriveMode, WheelTargets};
use crate::motor::Controller;
use crate::obstacle::ObstacleAvoidance;
use crate::time::Time;

/// Per-wheel travel since the previous control update
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Travel {
    pub left: f32,
    pub right: f32,
    /// Seconds
    pub dt: f32,
}

/// Remembers encoder distances between control updates
#[derive(Debug, Clone, Copy, Default)]
pub struct MotionTracker {
    last: Option<(Time, f32, f32)>,
}

impl MotionTracker {
    pub fn reset(&mut self) {
        self.last = None;
    }

    pub fn is_started(&self) -> bool {
        self.last.is_some()
    }

    /// Take a new sample. The first sample after a reset only records the
    /// starting point; a sample with no elapsed time is skipped.
    pub fn advance(&mut self, now: Time, distances: (f32, f32)) -> Option<Travel> {
        let Some((time, left, right)) = self.last else {
            self.last = Some((now, distances.0, distances.1));
            return None;
        };
        let dt = now.since(time).as_secs_f32();
        if dt <= 0.0 {
            return None;
        }
        self.last = Some((now, distances.0, distances.1));
        Some(Travel {
            left: distances.0 - left,
            right: distances.1 - right,
            dt,
        })
    }
}

/// Result of one control-loop update
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ControlStep {
    /// Nothing to drive yet (starting point recorded)
    Waiting,
    /// Distance target reached; motors must stop
    Finished,
    Drive { left: i16, right: i16, travel: Travel },
}

pub struct Scheduler {
    pub flags: Flags,
    pub left: Controller,
    pub right: Controller,
    pub battery: BatteryMonitor,
    pub avoidance: ObstacleAvoidance,
    pub tracker: MotionTracker,
    /// Start of a float round-trip measurement
    pub float_probe_start: Option<Time>,
    /// Start of a loop-time measurement
    pub loop_timer_start: Option<Time>,
    strategy: ControlStrategy,
    diagnostics: bool,
    initial: (Controller, Controller),
}

impl Scheduler {
    pub fn new(config: &RuntimeConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let left = Controller::from_tuning(&config.left, config.update_period_ms)?;
        let right = Controller::from_tuning(&config.right, config.update_period_ms)?;
        let mut scheduler = Self {
            flags: Flags::new(),
            left: left.clone(),
            right: right.clone(),
            battery: BatteryMonitor::new()?,
            avoidance: ObstacleAvoidance::new(),
            tracker: MotionTracker::default(),
            float_probe_start: None,
            loop_timer_start: None,
            strategy: config.strategy,
            diagnostics: config.diagnostics,
            initial: (left, right),
        };
        scheduler.arm_battery_task();
        Ok(scheduler)
    }

    /// Back to power-on state. The battery filter keeps its history.
    pub fn reset(&mut self) {
        self.flags = Flags::new();
        self.left = self.initial.0.clone();
        self.right = self.initial.1.clone();
        self.avoidance.reset();
        self.tracker.reset();
        self.float_probe_start = None;
        self.loop_timer_start = None;
        self.arm_battery_task();
    }

    fn arm_battery_task(&mut self) {
        self.flags[FlagId::BatteryTask].arm_periodic(BATTERY_TASK_PERIOD_MS);
    }

    pub fn strategy(&self) -> ControlStrategy {
        self.strategy
    }

    pub fn diagnostics(&self) -> bool {
        self.diagnostics
    }

    /// Control update period in milliseconds
    pub fn update_period_ms(&self) -> f32 {
        self.left.update_period()
    }

    pub fn power_state(&self) -> PowerState {
        self.battery.power_state()
    }

    fn zero_targets(&mut self) {
        for controller in [&mut self.left, &mut self.right] {
            controller.set_target_position(0.0);
            controller.set_target_velocity(0.0);
        }
    }

    /// Zero and disable the motors, clear targets and every motion flag
    pub fn stop_motion<B: Board>(&mut self, board: &mut B) {
        MotorDriver::new(board).stop();
        self.zero_targets();
        self.flags.deactivate_all(&FlagId::MOTION);
        self.tracker.reset();
        board.set_led(Led::Red, false);
    }

    /// Distance control finished on its own: stop without touching other flags
    pub fn finish_drive<B: Board>(&mut self, board: &mut B) {
        MotorDriver::new(board).stop();
        self.zero_targets();
        self.tracker.reset();
        self.flags[FlagId::DistanceControl].deactivate();
    }

    /// Load planned targets and arm the matching control loop. Every other
    /// motion flag is cleared.
    pub fn start_drive<B: Board>(&mut self, mode: DriveMode, targets: &WheelTargets, board: &mut B) {
        self.flags.deactivate_all(&FlagId::MOTION);
        self.left.set_target_position(targets.distance_left);
        self.right.set_target_position(targets.distance_right);
        self.set_velocity_targets(targets.velocity_left, targets.velocity_right);
        board.zero_encoders();
        self.tracker.reset();

        let flag = match mode {
            DriveMode::Distance => FlagId::DistanceControl,
            DriveMode::Velocity => FlagId::VelocityControl,
        };
        let period = self.update_period_ms();
        self.flags[flag].arm_periodic(period);
        info!(
            "Starting {:?} drive ({:?}): L={:.3}/{:.3} R={:.3}/{:.3}",
            mode,
            targets.maneuver,
            targets.distance_left,
            targets.velocity_left,
            targets.distance_right,
            targets.velocity_right
        );
    }

    /// Switch on velocity control without disturbing other flags
    pub fn engage_velocity_control<B: Board>(&mut self, left: f32, right: f32, board: &mut B) {
        self.set_velocity_targets(left, right);
        board.zero_encoders();
        self.tracker.reset();
        let period = self.update_period_ms();
        self.flags[FlagId::VelocityControl].arm_periodic(period);
    }

    pub fn set_velocity_targets(&mut self, left: f32, right: f32) {
        self.left.set_target_velocity(left);
        self.right.set_target_velocity(right);
    }

    /// Stop everything `seconds` from `now`
    pub fn arm_stop_timer(&mut self, seconds: f32, now: Time) {
        self.flags[FlagId::MotorStop].arm_timer(seconds * 1000.0, now);
    }

    /// Put the obstacle machine back at its start and begin polling it
    pub fn start_avoidance(&mut self) {
        self.flags.deactivate_all(&FlagId::MOTION);
        self.avoidance.reset();
        let period = self.update_period_ms();
        self.flags[FlagId::ObstacleAvoidance].arm_periodic(period);
    }

    /// One distance-control update
    pub fn distance_step(&mut self, now: Time, distances: (f32, f32)) -> ControlStep {
        let Some(travel) = self.tracker.advance(now, distances) else {
            return ControlStep::Waiting;
        };

        if reached(travel.left, self.left.target_position())
            || reached(travel.right, self.right.target_position())
        {
            return ControlStep::Finished;
        }

        let remaining_left = self.left.target_position() - travel.left;
        let remaining_right = self.right.target_position() - travel.right;
        self.left.set_target_position(remaining_left);
        self.right.set_target_position(remaining_right);

        let left = signed(self.wheel_duty(Side::Left, travel.left, travel.dt), remaining_left);
        let right = signed(self.wheel_duty(Side::Right, travel.right, travel.dt), remaining_right);
        ControlStep::Drive { left, right, travel }
    }

    /// One velocity-control update
    pub fn velocity_step(&mut self, now: Time, distances: (f32, f32)) -> ControlStep {
        let Some(travel) = self.tracker.advance(now, distances) else {
            return ControlStep::Waiting;
        };

        let left = signed(
            self.wheel_duty(Side::Left, travel.left, travel.dt),
            self.left.target_velocity(),
        );
        let right = signed(
            self.wheel_duty(Side::Right, travel.right, travel.dt),
            self.right.target_velocity(),
        );
        ControlStep::Drive { left, right, travel }
    }

    // Unsigned duty cycle for one wheel under the configured strategy
    fn wheel_duty(&mut self, side: Side, travel: f32, dt: f32) -> i16 {
        let controller = match side {
            Side::Left => &mut self.left,
            Side::Right => &mut self.right,
        };
        let speed = match self.strategy {
            ControlStrategy::ClosedLoop => controller.update_magnitude(travel, dt),
            ControlStrategy::DirectMapping => controller.target_velocity().abs(),
        };
        velocity_to_duty_cycle(side, speed).max(0)
    }
}

// Has `travel` covered `target`, in the target's direction?
fn reached(travel: f32, target: f32) -> bool {
    if target > 0.0 {
        travel >= target
    } else {
        travel <= target
    }
}

fn signed(duty: i16, direction: f32) -> i16 {
    if direction > 0.0 { duty } else { -duty }
}
