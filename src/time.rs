// Split millisecond/microsecond time stamps and the clock that produces them
//
// The millisecond counter is a u32 and wraps after ~49.7 days. Elapsed-time
// arithmetic uses wrapping subtraction, but absolute seconds reported over the
// wire wrap along with the counter.

use std::time::Instant;

/// A point in time (or a span) as whole milliseconds plus sub-millisecond
/// microseconds. Built through `new`, which keeps `micros` below 1000.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Time {
    millis: u32,
    micros: u16,
}

impl Time {
    pub const ZERO: Time = Time { millis: 0, micros: 0 };

    pub fn new(millis: u32, micros: u16) -> Self {
        Self {
            millis: millis.wrapping_add(u32::from(micros / 1000)),
            micros: micros % 1000,
        }
    }

    pub fn from_millis(millis: u32) -> Self {
        Self { millis, micros: 0 }
    }

    pub fn millis(&self) -> u32 {
        self.millis
    }

    /// Sub-millisecond part, always below 1000
    pub fn micros(&self) -> u16 {
        self.micros
    }

    /// Seconds as a float, combining both parts
    pub fn as_secs_f32(&self) -> f32 {
        self.millis as f32 / 1000.0 + self.micros as f32 / 1_000_000.0
    }

    /// Milliseconds as a float (used when comparing against flag durations)
    pub fn as_millis_f32(&self) -> f32 {
        self.millis as f32 + self.micros as f32 / 1000.0
    }

    /// Span from `earlier` to `self`
    pub fn since(&self, earlier: Time) -> Time {
        let mut millis = self.millis.wrapping_sub(earlier.millis);
        let micros = if self.micros >= earlier.micros {
            self.micros - earlier.micros
        } else {
            millis = millis.wrapping_sub(1);
            self.micros + 1000 - earlier.micros
        };
        Time { millis, micros }
    }

    /// Advance by a number of microseconds (used by simulated clocks)
    pub fn advanced_by_micros(&self, micros: u64) -> Time {
        let total = self.micros as u64 + micros;
        Time {
            millis: self.millis.wrapping_add((total / 1000) as u32),
            micros: (total % 1000) as u16,
        }
    }
}

/// Source of the current time
pub trait Clock {
    fn now(&self) -> Time;
}

/// Wall clock counting from process start
#[derive(Debug)]
pub struct SystemClock {
    start: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Time {
        let elapsed = self.start.elapsed();
        // Truncation to u32 reproduces the counter wrap
        let millis = elapsed.as_millis() as u32;
        let micros = (elapsed.subsec_micros() % 1000) as u16;
        Time { millis, micros }
    }
}
