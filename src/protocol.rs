// Inbound command protocol: host -> runtime
//
// Every command is one ASCII byte followed by a fixed-size packed
// little-endian payload. The command byte is the frame start; there is no
// delimiter or checksum. The total length is a function of the command byte.

use crate::motor::kinematics::{DriveCommand, DriveMode};

/// Total frame length (command byte included) for `cmd`, 0 if unknown
pub fn message_length(cmd: u8) -> usize {
    match cmd {
        b'~' => 1,
        b'*' | b'/' | b'+' | b'-' => 9,
        b't' => 2,
        b'T' => 6,
        b'e' | b'b' | b'q' | b'i' | b'o' => 1,
        b'E' | b'B' | b'Q' | b'I' | b'O' => 5,
        b'p' => 5,
        b'P' => 9,
        b's' | b'S' => 1,
        b'd' | b'v' => 9,
        b'D' | b'V' => 13,
        _ => 0,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithmeticOp {
    Multiply,
    Divide,
    Add,
    Subtract,
}

impl ArithmeticOp {
    fn code(self) -> u8 {
        match self {
            ArithmeticOp::Multiply => b'*',
            ArithmeticOp::Divide => b'/',
            ArithmeticOp::Add => b'+',
            ArithmeticOp::Subtract => b'-',
        }
    }
}

/// Which timer a `t`/`T` command arms
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeAction {
    /// Report the current time
    SendTime = 0,
    /// Report how long sending one float takes
    FloatSend = 1,
    /// Report how long one main loop iteration takes
    LoopTime = 2,
}

impl TimeAction {
    pub fn from_u8(action: u8) -> Option<Self> {
        match action {
            0 => Some(TimeAction::SendTime),
            1 => Some(TimeAction::FloatSend),
            2 => Some(TimeAction::LoopTime),
            _ => None,
        }
    }
}

/// Telemetry streams that can be requested once or periodically
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Report {
    Encoders,
    Battery,
    SystemStatus,
    Proximity,
}

/// A decoded command. `period`, `duration` and `stop_after` are in seconds
/// as sent on the wire; `None` means the lower-case (one-shot / untimed) form.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    Restart,
    Arithmetic { op: ArithmeticOp, lhs: f32, rhs: f32 },
    /// Raw action byte; unknown actions are rejected by the dispatcher
    Time { action: u8, period: Option<f32> },
    Report { report: Report, period: Option<f32> },
    Pwm { left: i16, right: i16, duration: Option<f32> },
    Stop,
    Drive(DriveCommand),
    ObstacleAvoidance { duration: Option<f32> },
}

impl Command {
    /// Decode a full frame (command byte included). Returns `None` for
    /// unknown commands or short frames.
    pub fn decode(frame: &[u8]) -> Option<Command> {
        let (&cmd, payload) = frame.split_first()?;
        if frame.len() < message_length(cmd) || message_length(cmd) == 0 {
            return None;
        }
        let mut r = Reader::new(payload);

        let command = match cmd {
            b'~' => Command::Restart,
            b'*' | b'/' | b'+' | b'-' => {
                let op = match cmd {
                    b'*' => ArithmeticOp::Multiply,
                    b'/' => ArithmeticOp::Divide,
                    b'+' => ArithmeticOp::Add,
                    _ => ArithmeticOp::Subtract,
                };
                Command::Arithmetic {
                    op,
                    lhs: r.f32()?,
                    rhs: r.f32()?,
                }
            }
            b't' => Command::Time {
                action: r.u8()?,
                period: None,
            },
            b'T' => Command::Time {
                action: r.u8()?,
                period: Some(r.f32()?),
            },
            b'e' | b'b' | b'q' | b'i' => Command::Report {
                report: report_for(cmd)?,
                period: None,
            },
            b'E' | b'B' | b'Q' | b'I' => Command::Report {
                report: report_for(cmd)?,
                period: Some(r.f32()?),
            },
            b'p' => Command::Pwm {
                left: r.i16()?,
                right: r.i16()?,
                duration: None,
            },
            b'P' => Command::Pwm {
                left: r.i16()?,
                right: r.i16()?,
                duration: Some(r.f32()?),
            },
            b's' | b'S' => Command::Stop,
            b'd' | b'D' | b'v' | b'V' => {
                let mode = if cmd.eq_ignore_ascii_case(&b'd') {
                    DriveMode::Distance
                } else {
                    DriveMode::Velocity
                };
                let linear = r.f32()?;
                let angular = r.f32()?;
                let stop_after = if cmd.is_ascii_uppercase() {
                    Some(r.f32()?)
                } else {
                    None
                };
                Command::Drive(DriveCommand {
                    mode,
                    linear,
                    angular,
                    stop_after,
                })
            }
            b'o' => Command::ObstacleAvoidance { duration: None },
            b'O' => Command::ObstacleAvoidance {
                duration: Some(r.f32()?),
            },
            _ => return None,
        };
        Some(command)
    }

    /// Encode as a wire frame (used by host-side tools)
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(13);
        match *self {
            Command::Restart => out.push(b'~'),
            Command::Arithmetic { op, lhs, rhs } => {
                out.push(op.code());
                out.extend_from_slice(&lhs.to_le_bytes());
                out.extend_from_slice(&rhs.to_le_bytes());
            }
            Command::Time { action, period } => {
                out.push(if period.is_some() { b'T' } else { b't' });
                out.push(action);
                push_optional(&mut out, period);
            }
            Command::Report { report, period } => {
                let lower = match report {
                    Report::Encoders => b'e',
                    Report::Battery => b'b',
                    Report::SystemStatus => b'q',
                    Report::Proximity => b'i',
                };
                out.push(if period.is_some() {
                    lower.to_ascii_uppercase()
                } else {
                    lower
                });
                push_optional(&mut out, period);
            }
            Command::Pwm {
                left,
                right,
                duration,
            } => {
                out.push(if duration.is_some() { b'P' } else { b'p' });
                out.extend_from_slice(&left.to_le_bytes());
                out.extend_from_slice(&right.to_le_bytes());
                push_optional(&mut out, duration);
            }
            Command::Stop => out.push(b's'),
            Command::Drive(drive) => {
                let lower = match drive.mode {
                    DriveMode::Distance => b'd',
                    DriveMode::Velocity => b'v',
                };
                out.push(if drive.stop_after.is_some() {
                    lower.to_ascii_uppercase()
                } else {
                    lower
                });
                out.extend_from_slice(&drive.linear.to_le_bytes());
                out.extend_from_slice(&drive.angular.to_le_bytes());
                push_optional(&mut out, drive.stop_after);
            }
            Command::ObstacleAvoidance { duration } => {
                out.push(if duration.is_some() { b'O' } else { b'o' });
                push_optional(&mut out, duration);
            }
        }
        out
    }
}

fn report_for(cmd: u8) -> Option<Report> {
    match cmd.to_ascii_lowercase() {
        b'e' => Some(Report::Encoders),
        b'b' => Some(Report::Battery),
        b'q' => Some(Report::SystemStatus),
        b'i' => Some(Report::Proximity),
        _ => None,
    }
}

fn push_optional(out: &mut Vec<u8>, value: Option<f32>) {
    if let Some(v) = value {
        out.extend_from_slice(&v.to_le_bytes());
    }
}

/// Little-endian cursor over a payload
struct Reader<'a> {
    bytes: &'a [u8],
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }

    fn take<const N: usize>(&mut self) -> Option<[u8; N]> {
        let (head, rest) = self.bytes.split_first_chunk::<N>()?;
        self.bytes = rest;
        Some(*head)
    }

    fn u8(&mut self) -> Option<u8> {
        self.take::<1>().map(|b| b[0])
    }

    fn i16(&mut self) -> Option<i16> {
        self.take::<2>().map(i16::from_le_bytes)
    }

    fn f32(&mut self) -> Option<f32> {
        self.take::<4>().map(f32::from_le_bytes)
    }
}
