// Host link over a serial port
//
// Inbound bytes are pulled from the port once per loop into a bounded input
// buffer, so the dispatcher can peek and wait for a full payload without ever
// blocking. Outbound messages are framed and written straight through.

use std::io::{ErrorKind, Read, Write};

use ringbuffer::{ConstGenericRingBuffer, RingBuffer};
use serialport::SerialPort;
use tracing::{debug, warn};

use crate::config::SERIAL_TIMEOUT;
use crate::hal::SerialLink;
use crate::messages::Message;

type InputBuffer = ConstGenericRingBuffer<u8, 256>;

/// Error types for the serial transport
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, LinkError>;

pub struct SerialPortLink {
    port: Box<dyn SerialPort>,
    input: InputBuffer,
    scratch: [u8; 64],
}

impl SerialPortLink {
    /// Open `port_name` at `baudrate`
    pub fn open(port_name: &str, baudrate: u32) -> Result<Self> {
        let port = serialport::new(port_name, baudrate)
            .timeout(SERIAL_TIMEOUT)
            .open()?;
        Ok(Self::from_port(port))
    }

    /// Wrap an already opened port (e.g. one end of a pseudo-terminal pair)
    pub fn from_port(port: Box<dyn SerialPort>) -> Self {
        Self {
            port,
            input: InputBuffer::new(),
            scratch: [0; 64],
        }
    }

    pub fn name(&self) -> Option<String> {
        self.port.name()
    }
}

impl SerialLink for SerialPortLink {
    fn upkeep(&mut self) -> Result<()> {
        let waiting = self.port.bytes_to_read()? as usize;
        let room = self.input.capacity() - self.input.len();
        let wanted = waiting.min(room).min(self.scratch.len());
        if wanted == 0 {
            return Ok(());
        }

        let read = match self.port.read(&mut self.scratch[..wanted]) {
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::TimedOut => 0,
            Err(e) => return Err(e.into()),
        };
        for &byte in &self.scratch[..read] {
            self.input.push(byte);
        }
        Ok(())
    }

    fn available(&self) -> usize {
        self.input.len()
    }

    fn peek(&self) -> Option<u8> {
        self.input.peek().copied()
    }

    fn consume(&mut self) -> Option<u8> {
        self.input.dequeue()
    }

    fn flush_input(&mut self) {
        self.input.clear();
        if let Err(e) = self.port.clear(serialport::ClearBuffer::Input) {
            warn!("Failed to clear serial input: {}", e);
        }
    }

    fn send(&mut self, message: &Message) {
        let frame = message.encode();
        debug!("Sending {:?} ({} bytes)", message.tag() as char, frame.len());
        if let Err(e) = self.port.write_all(&frame).and_then(|_| self.port.flush()) {
            warn!("Failed to write {:?} message: {}", message.tag() as char, e);
        }
    }

    fn pending_output(&self) -> usize {
        self.port.bytes_to_write().map(|n| n as usize).unwrap_or(0)
    }
}
