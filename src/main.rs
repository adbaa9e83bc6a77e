use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use twowheel_runtime::config::{
    ControlStrategy, RuntimeConfig, DEFAULT_BAUDRATE, DEFAULT_PORT, LOOP_PERIOD,
};
use twowheel_runtime::runtime::Runtime;
use twowheel_runtime::serial::SerialPortLink;
use twowheel_runtime::sim::SimBoard;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Parser)]
#[command(version, about = "Two-wheel robot runtime")]
struct Args {
    /// Serial port carrying host commands
    #[arg(long, default_value = DEFAULT_PORT)]
    port: String,

    #[arg(long, default_value_t = DEFAULT_BAUDRATE)]
    baud: u32,

    /// Serve on a pseudo-terminal instead of opening --port
    #[arg(long)]
    sim: bool,

    /// JSON file overriding the runtime defaults
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long, value_enum)]
    strategy: Option<ControlStrategy>,

    /// Emit diagnostic frames
    #[arg(long)]
    diagnostics: bool,

    /// Main loop period in microseconds
    #[arg(long, default_value_t = LOOP_PERIOD.as_micros() as u64)]
    loop_us: u64,
}

#[tokio::main]
async fn main() {
    // Setup logging (set RUST_LOG=debug for per-command output)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if let Err(e) = run(Args::parse()).await {
        eprintln!("Runtime error: {}", e);
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<(), BoxError> {
    let mut config = match &args.config {
        Some(path) => {
            info!("Loading config from {}", path.display());
            RuntimeConfig::load(path)?
        }
        None => RuntimeConfig::default(),
    };
    if let Some(strategy) = args.strategy {
        config.strategy = strategy;
    }
    config.diagnostics |= args.diagnostics;

    // Register-level drivers live outside this crate; the hosted runtime
    // drives the simulated base.
    let board = SimBoard::wall_clock();

    if args.sim {
        let (link, _peer) = open_pty()?;
        let runtime = Runtime::new(board, link, &config)?;
        runtime.run(Duration::from_micros(args.loop_us)).await
    } else {
        info!("Opening {} at {} baud", args.port, args.baud);
        let link = SerialPortLink::open(&args.port, args.baud)?;
        let runtime = Runtime::new(board, link, &config)?;
        runtime.run(Duration::from_micros(args.loop_us)).await
    }
}

// The peer end must stay open for as long as the runtime reads the other one
#[cfg(unix)]
fn open_pty() -> Result<(SerialPortLink, serialport::TTYPort), BoxError> {
    use serialport::SerialPort;

    let (ours, peer) = serialport::TTYPort::pair()?;
    let name = peer.name().unwrap_or_else(|| "<unnamed>".to_string());
    info!("Simulated link ready, connect the host to {}", name);
    Ok((SerialPortLink::from_port(Box::new(ours)), peer))
}

#[cfg(not(unix))]
fn open_pty() -> Result<(SerialPortLink, ()), BoxError> {
    Err("--sim needs a pseudo-terminal, which this platform does not provide".into())
}
