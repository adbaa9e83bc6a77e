// Obstacle avoidance off the front IR proximity sensor
//
// Two nested state machines. The read sequencer spreads sensor work across
// three ticks (strobe left, strobe right, decide). The decision machine turns
// away from whichever side reflects and holds the turn for a fixed number of
// ticks after the obstacle clears before driving straight again.

use tracing::debug;

use crate::config::{OA_ANGULAR_VELOCITY, OA_DRIVE_DUTY_CYCLE, OA_HOLD_TIMEOUT, OA_TURN_VELOCITY, WHEEL_BASE};
use crate::hal::{Board, Side};
use crate::motor::driver::duty_cycle_to_velocity;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadState {
    ReadLeft,
    ReadRight,
    RunDecision,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AvoidanceState {
    Init,
    DriveStraight,
    TurnLeft,
    TurnRight,
    Holding,
}

/// Combined IR reading: the stronger side's count, ties going to the left
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProximityReading {
    pub count: u8,
    pub side: Side,
}

impl ProximityReading {
    pub fn from_counts(left: u8, right: u8) -> Self {
        if left >= right {
            Self {
                count: left,
                side: Side::Left,
            }
        } else {
            Self {
                count: right,
                side: Side::Right,
            }
        }
    }

    pub fn is_clear(&self) -> bool {
        self.count == 0
    }
}

/// New wheel velocities requested by the decision machine
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Decision {
    pub velocity_left: f32,
    pub velocity_right: f32,
    /// First decision after start: velocity control must be switched on
    pub engage: bool,
}

#[derive(Debug, Clone)]
pub struct ObstacleAvoidance {
    read_state: ReadState,
    state: AvoidanceState,
    alpha: u16,
    left_count: u8,
    right_count: u8,
}

impl ObstacleAvoidance {
    pub fn new() -> Self {
        Self {
            read_state: ReadState::ReadLeft,
            state: AvoidanceState::Init,
            alpha: 0,
            left_count: 0,
            right_count: 0,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    pub fn state(&self) -> AvoidanceState {
        self.state
    }

    pub fn read_state(&self) -> ReadState {
        self.read_state
    }

    /// Ticks spent holding so far
    pub fn hold_ticks(&self) -> u16 {
        self.alpha
    }

    /// Advance the read sequencer by one step
    pub fn tick<B: Board>(&mut self, board: &mut B) -> Option<Decision> {
        match self.read_state {
            ReadState::ReadLeft => {
                self.left_count = board.ir_strobe(Side::Left);
                self.read_state = ReadState::ReadRight;
                None
            }
            ReadState::ReadRight => {
                self.right_count = board.ir_strobe(Side::Right);
                self.read_state = ReadState::RunDecision;
                None
            }
            ReadState::RunDecision => {
                self.read_state = ReadState::ReadLeft;
                self.decide(ProximityReading::from_counts(self.left_count, self.right_count))
            }
        }
    }

    /// Run the decision machine on one combined reading
    pub fn decide(&mut self, reading: ProximityReading) -> Option<Decision> {
        let previous = self.state;
        let decision = match self.state {
            AvoidanceState::Init => {
                let (velocity_left, velocity_right) = if reading.is_clear() {
                    self.state = AvoidanceState::DriveStraight;
                    straight_velocities()
                } else {
                    self.turn_away(reading.side)
                };
                Some(Decision {
                    velocity_left,
                    velocity_right,
                    engage: true,
                })
            }
            AvoidanceState::DriveStraight => {
                if reading.is_clear() {
                    None
                } else {
                    let (velocity_left, velocity_right) = self.turn_away(reading.side);
                    Some(Decision {
                        velocity_left,
                        velocity_right,
                        engage: false,
                    })
                }
            }
            AvoidanceState::TurnLeft | AvoidanceState::TurnRight => {
                if reading.is_clear() {
                    self.state = AvoidanceState::Holding;
                }
                None
            }
            AvoidanceState::Holding => {
                self.alpha += 1;
                if self.alpha >= OA_HOLD_TIMEOUT {
                    self.alpha = 0;
                    self.state = AvoidanceState::DriveStraight;
                    let (velocity_left, velocity_right) = straight_velocities();
                    Some(Decision {
                        velocity_left,
                        velocity_right,
                        engage: false,
                    })
                } else {
                    None
                }
            }
        };

        if self.state != previous {
            debug!("Obstacle avoidance: {:?} -> {:?} ({:?})", previous, self.state, reading);
        }
        decision
    }

    // Obstacle on the right: turn left, and vice versa
    fn turn_away(&mut self, obstacle: Side) -> (f32, f32) {
        let outer = OA_TURN_VELOCITY + WHEEL_BASE * OA_ANGULAR_VELOCITY;
        match obstacle {
            Side::Right => {
                self.state = AvoidanceState::TurnLeft;
                (OA_TURN_VELOCITY, outer)
            }
            Side::Left => {
                self.state = AvoidanceState::TurnRight;
                (outer, OA_TURN_VELOCITY)
            }
        }
    }
}

impl Default for ObstacleAvoidance {
    fn default() -> Self {
        Self::new()
    }
}

fn straight_velocities() -> (f32, f32) {
    (
        duty_cycle_to_velocity(Side::Left, OA_DRIVE_DUTY_CYCLE),
        duty_cycle_to_velocity(Side::Right, OA_DRIVE_DUTY_CYCLE),
    )
}
