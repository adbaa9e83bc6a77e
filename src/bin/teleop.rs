// Keyboard teleop over the serial link: W/S drive, A/D turn, R/F speed,
// space stop, O obstacle avoidance, B battery, Q quit
use clap::Parser;
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind},
    terminal::{disable_raw_mode, enable_raw_mode},
};
use serialport::SerialPort;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use twowheel_runtime::config::{DEFAULT_BAUDRATE, DEFAULT_PORT, SERIAL_TIMEOUT};
use twowheel_runtime::messages::Message;
use twowheel_runtime::motor::kinematics::{DriveCommand, DriveMode};
use twowheel_runtime::protocol::{Command, Report};

const SPEEDS: [f32; 3] = [0.05, 0.1, 0.2]; // m/s
const TURN_SPEEDS: [f32; 3] = [0.5, 1.0, 2.0]; // rad/s
const INPUT_TIMEOUT_MS: u64 = 150; // Reset velocities after this much time with no input
const RESEND_MS: u64 = 100;
const COMMAND_LIFETIME: f32 = 0.3; // s, the robot stops on its own if we go quiet

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Parser)]
#[command(about = "Drive the robot from the keyboard")]
struct Args {
    #[arg(long, default_value = DEFAULT_PORT)]
    port: String,

    #[arg(long, default_value_t = DEFAULT_BAUDRATE)]
    baud: u32,
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let args = Args::parse();
    info!("Opening {} at {} baud", args.port, args.baud);
    let mut port = serialport::new(&args.port, args.baud)
        .timeout(SERIAL_TIMEOUT)
        .open()?;

    info!("Controls: W/S=drive, A/D=turn, R/F=speed, SPACE=stop, O=avoid, B=battery, Q=quit");
    print_speed(0);

    enable_raw_mode()?;
    let result = run_teleop(port.as_mut()).await;
    disable_raw_mode()?;

    send(port.as_mut(), &Command::Stop)?;
    result
}

async fn run_teleop(port: &mut dyn SerialPort) -> Result<(), BoxError> {
    let mut speed_idx: usize = 0;
    let mut linear = 0.0;
    let mut angular = 0.0;
    let mut last_movement_input = Instant::now();
    let mut last_sent = Instant::now();
    let mut moving = false;
    let mut inbound = Vec::new();

    loop {
        if event::poll(Duration::from_millis(20))? {
            if let Event::Key(KeyEvent { code, kind, .. }) = event::read()? {
                let pressed = kind == KeyEventKind::Press || kind == KeyEventKind::Repeat;

                match code {
                    KeyCode::Char('w') if pressed => {
                        linear = SPEEDS[speed_idx];
                        last_movement_input = Instant::now();
                    }
                    KeyCode::Char('s') if pressed => {
                        linear = -SPEEDS[speed_idx];
                        last_movement_input = Instant::now();
                    }
                    KeyCode::Char('a') if pressed => {
                        angular = TURN_SPEEDS[speed_idx];
                        last_movement_input = Instant::now();
                    }
                    KeyCode::Char('d') if pressed => {
                        angular = -TURN_SPEEDS[speed_idx];
                        last_movement_input = Instant::now();
                    }

                    KeyCode::Char('r') if pressed => {
                        speed_idx = (speed_idx + 1).min(SPEEDS.len() - 1);
                        print_speed(speed_idx);
                    }
                    KeyCode::Char('f') if pressed => {
                        speed_idx = speed_idx.saturating_sub(1);
                        print_speed(speed_idx);
                    }

                    KeyCode::Char(' ') if pressed => {
                        linear = 0.0;
                        angular = 0.0;
                        send(port, &Command::Stop)?;
                        moving = false;
                    }
                    KeyCode::Char('o') if pressed => {
                        info!("Obstacle avoidance for 10 s");
                        send(
                            port,
                            &Command::ObstacleAvoidance {
                                duration: Some(10.0),
                            },
                        )?;
                    }
                    KeyCode::Char('b') if pressed => {
                        send(
                            port,
                            &Command::Report {
                                report: Report::Battery,
                                period: None,
                            },
                        )?;
                    }

                    KeyCode::Char('q') | KeyCode::Esc if pressed => break,

                    _ => {}
                }
            }
        }

        if last_movement_input.elapsed() > Duration::from_millis(INPUT_TIMEOUT_MS) {
            linear = 0.0;
            angular = 0.0;
        }

        let wants_motion = linear != 0.0 || angular != 0.0;
        if wants_motion && (!moving || last_sent.elapsed() >= Duration::from_millis(RESEND_MS)) {
            let drive = DriveCommand {
                mode: DriveMode::Velocity,
                linear,
                angular,
                stop_after: Some(COMMAND_LIFETIME),
            };
            send(port, &Command::Drive(drive))?;
            last_sent = Instant::now();
            moving = true;
        } else if !wants_motion && moving {
            send(port, &Command::Stop)?;
            moving = false;
        }

        drain_replies(port, &mut inbound)?;
    }

    Ok(())
}

fn send(port: &mut dyn SerialPort, command: &Command) -> Result<(), BoxError> {
    port.write_all(&command.encode())?;
    port.flush()?;
    Ok(())
}

// Log every complete reply frame; partial frames wait for the next call
fn drain_replies(port: &mut dyn SerialPort, inbound: &mut Vec<u8>) -> Result<(), BoxError> {
    let available = port.bytes_to_read()? as usize;
    if available > 0 {
        let start = inbound.len();
        inbound.resize(start + available, 0);
        let read = match port.read(&mut inbound[start..]) {
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => 0,
            Err(e) => return Err(e.into()),
        };
        inbound.truncate(start + read);
    }

    while let Some((frame, used)) = Message::decode_frame(inbound.as_slice()) {
        let line = format!("[{}] {}", frame.tag as char, frame.fields().join(" "));
        if frame.tag == b'!' || frame.tag == b'?' {
            warn!("{}", line);
        } else {
            info!("{}", line);
        }
        inbound.drain(..used);
    }
    Ok(())
}

fn print_speed(idx: usize) {
    let label = ["LOW", "MED", "HIGH"][idx];
    info!("Speed: {} ({} m/s)", label, SPEEDS[idx]);
}
