// Command dispatcher: inbound bytes -> scheduler effects
//
// At most one command is handled per loop. The command byte is peeked first;
// if its payload has not fully arrived the dispatcher waits for a later loop
// rather than blocking. Unknown bytes flush the whole input buffer.
//
//   Idle -> Peek -> Wait -> Process -> Idle

use tracing::{debug, info, warn};

use crate::battery::PowerState;
use crate::flags::FlagId;
use crate::hal::{Board, SerialLink};
use crate::messages::Message;
use crate::motor::driver::MotorDriver;
use crate::motor::kinematics::{DriveCommand, DriveMode, Maneuver};
use crate::protocol::{message_length, ArithmeticOp, Command, Report, TimeAction};
use crate::scheduler::Scheduler;

// Longest frame in the protocol is 13 bytes
const MAX_FRAME: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchState {
    /// Nothing buffered
    Idle,
    /// A command byte is available
    Peek(u8),
    /// Known command, payload incomplete
    Wait { cmd: u8, needed: usize },
    /// Command consumed and executed this loop
    Process(u8),
}

/// Why a command was refused
#[derive(Debug, Clone, Copy, PartialEq, thiserror::Error)]
pub enum CommandError {
    #[error("bad input")]
    BadInput,

    #[error("division by zero")]
    DivideByZero,

    #[error("battery low ({0:.2} V)")]
    BatteryLow(f32),

    #[error("power off ({0:.2} V)")]
    PowerOff(f32),
}

impl CommandError {
    /// Reply sent back to the host for command `cmd`
    pub fn response(&self, cmd: u8) -> Message {
        match *self {
            CommandError::BadInput | CommandError::DivideByZero => Message::bad_input(cmd),
            CommandError::BatteryLow(volts) => Message::battery_low(volts),
            CommandError::PowerOff(volts) => Message::power_off(volts),
        }
    }
}

type CommandResult = Result<(), CommandError>;

#[derive(Debug, Clone)]
pub struct Dispatcher {
    state: DispatchState,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            state: DispatchState::Idle,
        }
    }

    pub fn reset(&mut self) {
        self.state = DispatchState::Idle;
    }

    pub fn state(&self) -> DispatchState {
        self.state
    }

    /// Run one dispatcher cycle
    pub fn poll<L: SerialLink, B: Board>(
        &mut self,
        link: &mut L,
        board: &mut B,
        scheduler: &mut Scheduler,
    ) -> DispatchState {
        let Some(cmd) = link.peek() else {
            self.state = DispatchState::Idle;
            return self.state;
        };
        self.state = DispatchState::Peek(cmd);

        let needed = message_length(cmd);
        if needed == 0 {
            warn!("Unknown command byte 0x{:02X}, flushing input", cmd);
            link.flush_input();
            link.send(&Message::bad_input(cmd));
            self.state = DispatchState::Idle;
            return self.state;
        }

        if link.available() < needed {
            self.state = DispatchState::Wait { cmd, needed };
            return self.state;
        }

        let mut frame = [0u8; MAX_FRAME];
        let read = link.read_into(&mut frame[..needed]);
        debug!("Received {:?} ({} bytes)", cmd as char, read);

        let result = match Command::decode(&frame[..read]) {
            Some(command) => execute(command, cmd, link, board, scheduler),
            None => Err(CommandError::BadInput),
        };
        if let Err(e) = result {
            warn!("Rejected {:?} command: {}", cmd as char, e);
            link.send(&e.response(cmd));
        }

        self.state = DispatchState::Process(cmd);
        self.state
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

fn execute<L: SerialLink, B: Board>(
    command: Command,
    cmd: u8,
    link: &mut L,
    board: &mut B,
    scheduler: &mut Scheduler,
) -> CommandResult {
    match command {
        Command::Restart => {
            info!("Restart requested");
            scheduler.flags[FlagId::Restart].arm_once();
            Ok(())
        }
        Command::Arithmetic { op, lhs, rhs } => {
            let value = match op {
                ArithmeticOp::Multiply => lhs * rhs,
                ArithmeticOp::Divide if rhs == 0.0 => return Err(CommandError::DivideByZero),
                ArithmeticOp::Divide => lhs / rhs,
                ArithmeticOp::Add => lhs + rhs,
                ArithmeticOp::Subtract => lhs - rhs,
            };
            link.send(&Message::float(cmd, value));
            Ok(())
        }
        Command::Time { action, period } => {
            let action = TimeAction::from_u8(action).ok_or(CommandError::BadInput)?;
            let flag = match action {
                TimeAction::SendTime => FlagId::SendTime,
                TimeAction::FloatSend => FlagId::FloatSendTimer,
                TimeAction::LoopTime => FlagId::LoopTimer,
            };
            arm_report(scheduler, flag, period)?;
            // A new measurement starts only once the flag is armed
            match action {
                TimeAction::SendTime => {}
                TimeAction::FloatSend => scheduler.float_probe_start = None,
                TimeAction::LoopTime => scheduler.loop_timer_start = None,
            }
            Ok(())
        }
        Command::Report { report, period } => {
            let flag = match report {
                Report::Encoders => FlagId::SendEncoder,
                Report::Battery => FlagId::SendBattery,
                Report::SystemStatus => FlagId::SystemStatus,
                Report::Proximity => FlagId::IrProximity,
            };
            arm_report(scheduler, flag, period)
        }
        Command::Pwm {
            left,
            right,
            duration,
        } => {
            check_power(scheduler)?;
            let duration = duration.map(positive).transpose()?;
            scheduler.flags.deactivate_all(&FlagId::MOTION);
            MotorDriver::new(board).drive(left, right);
            if let Some(seconds) = duration {
                scheduler.flags[FlagId::TimedPwm].arm_timer(seconds * 1000.0, board.now());
            }
            Ok(())
        }
        Command::Stop => {
            scheduler.stop_motion(board);
            Ok(())
        }
        Command::Drive(drive) => {
            check_power(scheduler)?;
            let stop_after = drive.stop_after.map(positive).transpose()?;
            start_drive(&drive, cmd, link, board, scheduler);
            if let Some(seconds) = stop_after {
                scheduler.arm_stop_timer(seconds, board.now());
            }
            Ok(())
        }
        Command::ObstacleAvoidance { duration } => {
            check_power(scheduler)?;
            let duration = duration.map(positive).transpose()?;
            info!("Starting obstacle avoidance");
            scheduler.start_avoidance();
            if let Some(seconds) = duration {
                scheduler.arm_stop_timer(seconds, board.now());
            }
            Ok(())
        }
    }
}

fn start_drive<L: SerialLink, B: Board>(
    drive: &DriveCommand,
    cmd: u8,
    link: &mut L,
    board: &mut B,
    scheduler: &mut Scheduler,
) {
    let targets = drive.targets();
    if scheduler.diagnostics() {
        let text = match targets.maneuver {
            Maneuver::Straight => "Go Str",
            Maneuver::Spin | Maneuver::Arc => "Turn",
        };
        link.send(&Message::text(cmd, text));
    }
    scheduler.start_drive(drive.mode, &targets, board);
}

// One-shot when no period is given, otherwise periodic at `period` seconds
fn arm_report(scheduler: &mut Scheduler, flag: FlagId, period: Option<f32>) -> CommandResult {
    match period {
        None => scheduler.flags[flag].arm_once(),
        Some(seconds) => scheduler.flags[flag].arm_periodic(positive(seconds)? * 1000.0),
    }
    Ok(())
}

fn positive(seconds: f32) -> Result<f32, CommandError> {
    if seconds > 0.0 {
        Ok(seconds)
    } else {
        Err(CommandError::BadInput)
    }
}

fn check_power(scheduler: &Scheduler) -> CommandResult {
    let volts = scheduler.battery.voltage();
    match PowerState::classify(volts) {
        PowerState::Ok => Ok(()),
        PowerState::Low => Err(CommandError::BatteryLow(volts)),
        PowerState::Off => Err(CommandError::PowerOff(volts)),
    }
}
