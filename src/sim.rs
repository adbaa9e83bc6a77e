// Simulated hardware: a virtual two-wheel base and an in-memory link
//
// `SimBoard` turns duty cycles into wheel travel using the same empirical
// duty-cycle map as the planner, and feeds the result into shared encoder
// counters. Its clock is either manual (tests) or the wall clock (`--sim`).

use std::f32::consts::PI;
use std::sync::Arc;

use ringbuffer::{ConstGenericRingBuffer, RingBuffer};
use tracing::debug;

use crate::config::{COUNTS_PER_MOTOR_REV, GEAR_RATIO, WHEEL_RADIUS};
use crate::hal::{Board, EncoderCounters, Led, SerialLink, Side};
use crate::messages::Message;
use crate::motor::driver::duty_cycle_to_velocity;
use crate::time::{Clock, SystemClock, Time};

const DEFAULT_BATTERY_VOLTS: f32 = 5.0;

#[derive(Debug)]
enum SimClock {
    Manual(Time),
    Wall(SystemClock),
}

#[derive(Debug)]
pub struct SimBoard {
    clock: SimClock,
    battery: f32,
    pwm: (i16, i16),
    enabled: bool,
    encoders: Arc<EncoderCounters>,
    // Sub-count travel carried between physics steps
    residual: (f32, f32),
    last_physics: Time,
    ir: (u8, u8),
    ir_strobes: usize,
    leds: [bool; 3],
}

impl SimBoard {
    /// Board with a manual clock starting at zero
    pub fn new() -> Self {
        Self::with_clock(SimClock::Manual(Time::ZERO))
    }

    /// Board following the wall clock
    pub fn wall_clock() -> Self {
        Self::with_clock(SimClock::Wall(SystemClock::new()))
    }

    fn with_clock(clock: SimClock) -> Self {
        Self {
            clock,
            battery: DEFAULT_BATTERY_VOLTS,
            pwm: (0, 0),
            enabled: false,
            encoders: Arc::new(EncoderCounters::new()),
            residual: (0.0, 0.0),
            last_physics: Time::ZERO,
            ir: (0, 0),
            ir_strobes: 0,
            leds: [false; 3],
        }
    }

    /// Jump the manual clock (ignored on the wall clock)
    pub fn set_time(&mut self, time: Time) {
        if let SimClock::Manual(now) = &mut self.clock {
            *now = time;
        }
    }

    pub fn advance_micros(&mut self, micros: u64) {
        if let SimClock::Manual(now) = &mut self.clock {
            *now = now.advanced_by_micros(micros);
        }
    }

    pub fn advance_millis(&mut self, millis: u32) {
        self.advance_micros(millis as u64 * 1000);
    }

    pub fn set_battery(&mut self, volts: f32) {
        self.battery = volts;
    }

    /// Reflection counts returned by the next strobes (left, right)
    pub fn set_ir(&mut self, left: u8, right: u8) {
        self.ir = (left, right);
    }

    /// Number of IR strobes taken so far
    pub fn ir_strobes(&self) -> usize {
        self.ir_strobes
    }

    pub fn led(&self, led: Led) -> bool {
        self.leds[led as usize]
    }

    /// Shared counters, as an edge handler would see them
    pub fn encoders(&self) -> Arc<EncoderCounters> {
        Arc::clone(&self.encoders)
    }

    /// Wheel speed (m/s) currently produced by the motor outputs
    pub fn wheel_velocity(&self, side: Side) -> f32 {
        let duty = match side {
            Side::Left => self.pwm.0,
            Side::Right => self.pwm.1,
        };
        if !self.enabled || duty == 0 {
            return 0.0;
        }
        let speed = duty_cycle_to_velocity(side, duty.saturating_abs());
        if duty < 0 { -speed } else { speed }
    }

    /// Move the wheels for `dt` seconds at the current duty cycles
    pub fn step_physics(&mut self, dt: f32) {
        let counts_per_meter = COUNTS_PER_MOTOR_REV * GEAR_RATIO / (2.0 * PI * WHEEL_RADIUS);
        let left = self.residual.0 + self.wheel_velocity(Side::Left) * dt * counts_per_meter;
        let right = self.residual.1 + self.wheel_velocity(Side::Right) * dt * counts_per_meter;
        let (whole_left, whole_right) = (left.trunc(), right.trunc());
        self.residual = (left - whole_left, right - whole_right);
        self.encoders.record(Side::Left, whole_left as i32);
        self.encoders.record(Side::Right, whole_right as i32);
    }
}

impl Default for SimBoard {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SimBoard {
    fn now(&self) -> Time {
        match &self.clock {
            SimClock::Manual(now) => *now,
            SimClock::Wall(clock) => clock.now(),
        }
    }
}

impl Board for SimBoard {
    fn service(&mut self) {
        let now = self.now();
        let dt = now.since(self.last_physics).as_secs_f32();
        self.last_physics = now;
        if dt > 0.0 {
            self.step_physics(dt);
        }
    }

    fn battery_sample(&mut self) -> f32 {
        self.battery
    }

    fn set_motor_pwm(&mut self, left: i16, right: i16) {
        self.pwm = (left, right);
    }

    fn motor_pwm(&self) -> (i16, i16) {
        self.pwm
    }

    fn enable_motor_output(&mut self, enable: bool) {
        self.enabled = enable;
    }

    fn motor_output_enabled(&self) -> bool {
        self.enabled
    }

    fn encoder_counts(&self) -> (i32, i32) {
        self.encoders.snapshot()
    }

    fn zero_encoders(&mut self) {
        self.encoders.zero();
        self.residual = (0.0, 0.0);
    }

    fn ir_strobe(&mut self, side: Side) -> u8 {
        self.ir_strobes += 1;
        match side {
            Side::Left => self.ir.0,
            Side::Right => self.ir.1,
        }
    }

    fn set_led(&mut self, led: Led, on: bool) {
        self.leds[led as usize] = on;
    }
}

/// In-memory link: bytes are fed in by the test or the host loop, messages
/// are collected instead of written
#[derive(Debug)]
pub struct LoopbackLink {
    input: ConstGenericRingBuffer<u8, 256>,
    sent: Vec<Message>,
}

impl LoopbackLink {
    pub fn new() -> Self {
        Self {
            input: ConstGenericRingBuffer::new(),
            sent: Vec::new(),
        }
    }

    /// Queue inbound bytes; past capacity the oldest are overwritten
    pub fn feed(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.input.push(b);
        }
    }

    pub fn sent(&self) -> &[Message] {
        &self.sent
    }

    pub fn take_sent(&mut self) -> Vec<Message> {
        std::mem::take(&mut self.sent)
    }
}

impl Default for LoopbackLink {
    fn default() -> Self {
        Self::new()
    }
}

impl SerialLink for LoopbackLink {
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
    }

    fn send(&mut self, message: &Message) {
        debug!("Loopback send: tag={:?} format={}", message.tag() as char, message.format());
        self.sent.push(message.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::motor::counts_to_distance;

    #[test]
    fn test_manual_clock() {
        let mut board = SimBoard::new();
        assert_eq!(board.now(), Time::ZERO);
        board.advance_micros(1500);
        assert_eq!(board.now(), Time::new(1, 500));
        board.set_time(Time::from_millis(42));
        assert_eq!(board.now(), Time::from_millis(42));
    }

    #[test]
    fn test_wheels_move_only_when_enabled() {
        let mut board = SimBoard::new();
        board.set_motor_pwm(50, 50);
        board.advance_millis(100);
        board.service();
        assert_eq!(board.encoder_counts(), (0, 0));

        board.enable_motor_output(true);
        board.advance_millis(1000);
        board.service();
        let (left, _) = board.encoder_counts();
        let expected = duty_cycle_to_velocity(Side::Left, 50);
        assert!((counts_to_distance(left) - expected).abs() < 1e-3);
    }

    #[test]
    fn test_reverse_duty_counts_down() {
        let mut board = SimBoard::new();
        board.set_motor_pwm(-25, 25);
        board.enable_motor_output(true);
        board.step_physics(0.5);
        let (left, right) = board.encoder_counts();
        assert!(left < 0);
        assert!(right > 0);
    }

    #[test]
    fn test_ir_and_leds() {
        let mut board = SimBoard::new();
        board.set_ir(3, 1);
        assert_eq!(board.ir_strobe(Side::Left), 3);
        assert_eq!(board.ir_strobe(Side::Right), 1);
        assert_eq!(board.ir_strobes(), 2);
        board.set_led(Led::Red, true);
        assert!(board.led(Led::Red));
        assert!(!board.led(Led::Blue));
    }

    #[test]
    fn test_loopback_link() {
        let mut link = LoopbackLink::new();
        link.feed(b"p\x01\x00\x02\x00");
        assert_eq!(link.available(), 5);
        assert_eq!(link.peek(), Some(b'p'));
        let mut buf = [0u8; 3];
        assert_eq!(link.read_into(&mut buf), 3);
        assert_eq!(&buf, b"p\x01\x00");
        link.flush_input();
        assert_eq!(link.available(), 0);

        link.send(&Message::float(b'b', 5.0));
        assert_eq!(link.take_sent(), vec![Message::float(b'b', 5.0)]);
        assert!(link.sent().is_empty());
    }

    #[test]
    fn test_loopback_overflow_drops_oldest() {
        let mut link = LoopbackLink::new();
        let bytes: Vec<u8> = (0..300u16).map(|i| i as u8).collect();
        link.feed(&bytes);
        assert_eq!(link.available(), 256);
        assert_eq!(link.peek(), Some(44));
        assert_eq!(link.consume(), Some(44));
        assert_eq!(link.consume(), Some(45));
    }
}
