// Message flags driving the cooperative main loop
//
// A flag is either one-shot (negative duration: fires on the next loop) or
// periodic (fires once `duration` ms have passed since its last trigger).
// Whoever handles a flag must either deactivate it (one-shot) or re-arm it
// with the current time (periodic); otherwise it fires on every loop.

use std::ops::{Index, IndexMut};

use crate::time::Time;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MessageFlag {
    pub active: bool,
    /// Milliseconds between firings; negative means one-shot
    pub duration: f32,
    pub last_trigger_time: Time,
}

impl MessageFlag {
    pub const INACTIVE: MessageFlag = MessageFlag {
        active: false,
        duration: -1.0,
        last_trigger_time: Time::ZERO,
    };

    /// Should the flag's action run now?
    pub fn execute(&self, now: Time) -> bool {
        if !self.active {
            return false;
        }
        if self.duration < 0.0 {
            return true;
        }
        now.since(self.last_trigger_time).as_millis_f32() >= self.duration
    }

    pub fn is_one_shot(&self) -> bool {
        self.duration < 0.0
    }

    /// Fire once on the next loop
    pub fn arm_once(&mut self) {
        self.active = true;
        self.duration = -1.0;
    }

    /// Fire every `period_ms`. The last trigger time is left alone, so a flag
    /// that has been idle fires right away.
    pub fn arm_periodic(&mut self, period_ms: f32) {
        self.active = true;
        self.duration = period_ms;
    }

    /// Fire `duration_ms` from `now`
    pub fn arm_timer(&mut self, duration_ms: f32, now: Time) {
        self.arm_periodic(duration_ms);
        self.last_trigger_time = now;
    }

    pub fn rearm(&mut self, now: Time) {
        self.last_trigger_time = now;
    }

    pub fn deactivate(&mut self) {
        self.active = false;
    }

    /// Finish handling: one-shot flags switch off, periodic flags re-arm
    pub fn complete(&mut self, now: Time) {
        if self.is_one_shot() {
            self.deactivate();
        } else {
            self.rearm(now);
        }
    }
}

impl Default for MessageFlag {
    fn default() -> Self {
        Self::INACTIVE
    }
}

/// The fixed set of flags polled by the main loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagId {
    Restart,
    LoopTimer,
    FloatSendTimer,
    SendTime,
    SendEncoder,
    SendBattery,
    LowBattery,
    BatteryTask,
    TimedPwm,
    SystemStatus,
    DistanceControl,
    VelocityControl,
    MotorStop,
    IrProximity,
    ObstacleAvoidance,
}

impl FlagId {
    pub const COUNT: usize = 15;

    pub const ALL: [FlagId; FlagId::COUNT] = [
        FlagId::Restart,
        FlagId::LoopTimer,
        FlagId::FloatSendTimer,
        FlagId::SendTime,
        FlagId::SendEncoder,
        FlagId::SendBattery,
        FlagId::LowBattery,
        FlagId::BatteryTask,
        FlagId::TimedPwm,
        FlagId::SystemStatus,
        FlagId::DistanceControl,
        FlagId::VelocityControl,
        FlagId::MotorStop,
        FlagId::IrProximity,
        FlagId::ObstacleAvoidance,
    ];

    /// Flags that move the wheels
    pub const MOTION: [FlagId; 5] = [
        FlagId::DistanceControl,
        FlagId::VelocityControl,
        FlagId::MotorStop,
        FlagId::TimedPwm,
        FlagId::ObstacleAvoidance,
    ];
}

/// Table of all flags, indexed by `FlagId`
#[derive(Debug, Clone)]
pub struct Flags {
    table: [MessageFlag; FlagId::COUNT],
}

impl Flags {
    /// All flags inactive with duration -1
    pub fn new() -> Self {
        Self {
            table: [MessageFlag::INACTIVE; FlagId::COUNT],
        }
    }

    pub fn execute(&self, id: FlagId, now: Time) -> bool {
        self[id].execute(now)
    }

    pub fn deactivate_all(&mut self, ids: &[FlagId]) {
        for &id in ids {
            self[id].deactivate();
        }
    }

    pub fn active(&self) -> impl Iterator<Item = FlagId> + '_ {
        FlagId::ALL.into_iter().filter(|&id| self[id].active)
    }
}

impl Default for Flags {
    fn default() -> Self {
        Self::new()
    }
}

impl Index<FlagId> for Flags {
    type Output = MessageFlag;

    fn index(&self, id: FlagId) -> &MessageFlag {
        &self.table[id as usize]
    }
}

impl IndexMut<FlagId> for Flags {
    fn index_mut(&mut self, id: FlagId) -> &mut MessageFlag {
        &mut self.table[id as usize]
    }
}
