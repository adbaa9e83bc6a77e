// Services the core expects from the hardware layer
//
// Register-level work (PWM timers, ADC, quadrature decoding, IR strobe timing,
// byte transport) lives behind these traits. `serial` and `sim` provide
// hosted implementations.

use std::sync::atomic::{AtomicI32, Ordering};

use crate::messages::Message;
use crate::time::Clock;

/// Left or right side of the robot (wheels, IR emitters)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Left,
    Right,
}

/// Indicator lights
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Led {
    Red,
    Green,
    Blue,
}

/// Inbound/outbound byte link to the host
pub trait SerialLink {
    /// Move whatever the transport has received into the input buffer
    fn upkeep(&mut self) -> Result<(), crate::serial::LinkError> {
        Ok(())
    }

    /// Number of buffered inbound bytes
    fn available(&self) -> usize;

    /// Next inbound byte without consuming it
    fn peek(&self) -> Option<u8>;

    fn consume(&mut self) -> Option<u8>;

    /// Fill `buf` from the input buffer; returns the number of bytes copied
    fn read_into(&mut self, buf: &mut [u8]) -> usize {
        let mut n = 0;
        for slot in buf.iter_mut() {
            match self.consume() {
                Some(b) => {
                    *slot = b;
                    n += 1;
                }
                None => break,
            }
        }
        n
    }

    /// Drop everything buffered
    fn flush_input(&mut self);

    /// Queue or write an outbound message
    fn send(&mut self, message: &Message);

    /// Outbound bytes not yet handed to the transport
    fn pending_output(&self) -> usize {
        0
    }
}

/// Motors, encoders, battery ADC, IR sensor and lights
pub trait Board: Clock {
    /// Housekeeping run once at the top of every loop
    fn service(&mut self) {}

    /// One raw battery reading in volts
    fn battery_sample(&mut self) -> f32;

    /// Duty cycles in percent, already clamped to [-100, 100]
    fn set_motor_pwm(&mut self, left: i16, right: i16);

    fn motor_pwm(&self) -> (i16, i16);

    fn enable_motor_output(&mut self, enable: bool);

    fn motor_output_enabled(&self) -> bool;

    /// Accumulated encoder counts (left, right)
    fn encoder_counts(&self) -> (i32, i32);

    fn zero_encoders(&mut self);

    /// Strobe the IR emitter on one side and return how many brightness
    /// levels produced a reflection
    fn ir_strobe(&mut self, side: Side) -> u8;

    fn set_led(&mut self, led: Led, on: bool);
}

/// Encoder counters shared between the edge handler and the main loop.
///
/// The handler side only ever adds; the main loop reads whole values, so a
/// read is never torn.
#[derive(Debug, Default)]
pub struct EncoderCounters {
    left: AtomicI32,
    right: AtomicI32,
}

impl EncoderCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called from the edge handler
    pub fn record(&self, side: Side, delta: i32) {
        match side {
            Side::Left => self.left.fetch_add(delta, Ordering::AcqRel),
            Side::Right => self.right.fetch_add(delta, Ordering::AcqRel),
        };
    }

    pub fn snapshot(&self) -> (i32, i32) {
        (
            self.left.load(Ordering::Acquire),
            self.right.load(Ordering::Acquire),
        )
    }

    pub fn zero(&self) {
        self.left.store(0, Ordering::Release);
        self.right.store(0, Ordering::Release);
    }
}
