// Discrete-time IIR filter evaluated as a difference equation
//
//   y[t] = ( sum_{i=0..N} b[i] * x[t-i]  -  sum_{i=1..N} a[i] * y[t-i] ) / a[0]
//
// Histories are kept oldest-first and always hold exactly `order + 1`
// samples. There is no overflow or saturation guard; callers keep inputs
// bounded.

use ringbuffer::{ConstGenericRingBuffer, RingBuffer};

use crate::config::ConfigError;

/// Largest supported filter order
pub const MAX_ORDER: usize = 6;

type History = ConstGenericRingBuffer<f32, 8>;

#[derive(Debug, Clone)]
pub struct Filter {
    numerator: [f32; MAX_ORDER + 1],
    denominator: [f32; MAX_ORDER + 1],
    order: usize,
    inputs: History,
    outputs: History,
}

impl Filter {
    /// Create a filter from numerator (`b`) and denominator (`a`) coefficients.
    ///
    /// Both slices hold `order + 1` coefficients; `a[0]` normalizes the output
    /// and must be non-zero. Histories start at zero.
    pub fn new(b: &[f32], a: &[f32]) -> Result<Self, ConfigError> {
        if b.is_empty() || b.len() != a.len() {
            return Err(ConfigError::Coefficients(format!(
                "numerator has {} coefficients, denominator has {}",
                b.len(),
                a.len()
            )));
        }
        if b.len() > MAX_ORDER + 1 {
            return Err(ConfigError::Coefficients(format!(
                "order {} exceeds maximum {}",
                b.len() - 1,
                MAX_ORDER
            )));
        }
        if a[0] == 0.0 {
            return Err(ConfigError::Coefficients(
                "leading denominator coefficient is zero".to_string(),
            ));
        }

        let mut numerator = [0.0; MAX_ORDER + 1];
        let mut denominator = [0.0; MAX_ORDER + 1];
        numerator[..b.len()].copy_from_slice(b);
        denominator[..a.len()].copy_from_slice(a);

        let mut inputs = History::new();
        let mut outputs = History::new();
        for _ in 0..b.len() {
            inputs.push(0.0);
            outputs.push(0.0);
        }

        Ok(Self {
            numerator,
            denominator,
            order: b.len() - 1,
            inputs,
            outputs,
        })
    }

    pub fn order(&self) -> usize {
        self.order
    }

    /// Push a new sample through the filter and return the new output
    pub fn value(&mut self, x: f32) -> f32 {
        let n = self.order + 1;

        // Drop the oldest sample on both sides, then add the newest input
        self.inputs.dequeue();
        self.outputs.dequeue();
        self.inputs.push(x);

        let mut forward = 0.0;
        let mut feedback = 0.0;
        for i in 0..n {
            forward += self.numerator[i] * steps_back(&self.inputs, i);
            if i + 1 < n {
                // y[t-1-i]; the new output is not in the history yet
                feedback += self.denominator[i + 1] * steps_back(&self.outputs, i);
            }
        }

        let y = (forward - feedback) / self.denominator[0];
        self.outputs.push(y);
        y
    }

    /// Most recent output, without updating
    pub fn last_output(&self) -> f32 {
        steps_back(&self.outputs, 0)
    }

    /// Fill both histories with `value` (start with zero error at that value)
    pub fn set_to(&mut self, value: f32) {
        for history in [&mut self.inputs, &mut self.outputs] {
            for i in 0..history.len() {
                if let Some(v) = history.get_mut(i) {
                    *v = value;
                }
            }
        }
    }

    /// Add `amount` to every history entry, keeping the filter in the same frame
    pub fn shift_by(&mut self, amount: f32) {
        for history in [&mut self.inputs, &mut self.outputs] {
            for i in 0..history.len() {
                if let Some(v) = history.get_mut(i) {
                    *v += amount;
                }
            }
        }
    }
}

// Sample `back` steps before the newest one, 0.0 past the oldest
fn steps_back(history: &History, back: usize) -> f32 {
    match history.len().checked_sub(back + 1) {
        Some(index) => history.get(index).copied().unwrap_or(0.0),
        None => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-4
    }

    #[test]
    fn test_rejects_bad_coefficients() {
        assert!(Filter::new(&[], &[]).is_err());
        assert!(Filter::new(&[1.0, 2.0], &[1.0]).is_err());
        assert!(Filter::new(&[1.0, 0.0], &[0.0, 1.0]).is_err());
        assert!(Filter::new(&[1.0; 8], &[1.0; 8]).is_err());
        assert!(Filter::new(&[1.0; 7], &[1.0; 7]).is_ok());
    }

    #[test]
    fn test_pass_through() {
        let mut f = Filter::new(&[1.0], &[1.0]).unwrap();
        assert_eq!(f.value(3.0), 3.0);
        assert_eq!(f.value(-2.0), -2.0);
        assert_eq!(f.last_output(), -2.0);
    }

    #[test]
    fn test_leading_denominator_normalizes() {
        let mut f = Filter::new(&[1.0], &[2.0]).unwrap();
        assert_eq!(f.value(3.0), 1.5);
    }

    #[test]
    fn test_integrator_accumulates() {
        // y[t] = x[t] + y[t-1]
        let mut f = Filter::new(&[1.0, 0.0], &[1.0, -1.0]).unwrap();
        assert_eq!(f.value(1.0), 1.0);
        assert_eq!(f.value(1.0), 2.0);
        assert_eq!(f.value(0.5), 2.5);
    }

    #[test]
    fn test_pi_controller_difference_equation() {
        // y[t] = b0*x[t] + b1*x[t-1] + y[t-1]
        let mut f = Filter::new(&[0.5, 0.25], &[1.0, -1.0]).unwrap();
        assert!(approx(f.value(1.0), 0.5));
        assert!(approx(f.value(1.0), 0.5 + 0.25 + 0.5));
        assert!(approx(f.value(0.0), 0.25 + 1.25));
    }

    #[test]
    fn test_steady_state_after_set_to_integrator() {
        // Unity DC gain with a = [1, -1] needs the numerator to sum to zero
        let mut f = Filter::new(&[0.5, -0.5], &[1.0, -1.0]).unwrap();
        f.set_to(4.0);
        for _ in 0..20 {
            assert!(approx(f.value(4.0), 4.0));
        }
    }

    #[test]
    fn test_steady_state_after_set_to_low_pass() {
        let mut f = Filter::new(&[0.03046, 0.03046], &[1.0, -0.93908]).unwrap();
        f.set_to(5.0);
        for _ in 0..50 {
            assert!(approx(f.value(5.0), 5.0));
        }
    }

    #[test]
    fn test_low_pass_converges() {
        let mut f = Filter::new(&[0.03046, 0.03046], &[1.0, -0.93908]).unwrap();
        let mut y = 0.0;
        for _ in 0..500 {
            y = f.value(4.0);
        }
        assert!(approx(y, 4.0));
    }

    #[test]
    fn test_shift_by_keeps_frame() {
        let mut a = Filter::new(&[0.5, -0.5], &[1.0, -1.0]).unwrap();
        let mut b = a.clone();
        a.set_to(1.0);
        b.set_to(1.0);
        b.shift_by(10.0);
        assert!(approx(b.last_output(), 11.0));
        // Same input deltas give outputs offset by the shift
        let ya = a.value(2.0);
        let yb = b.value(12.0);
        assert!(approx(yb - ya, 10.0));
    }

    #[test]
    fn test_second_order_delay_line() {
        // y[t] = x[t-2]
        let mut f = Filter::new(&[0.0, 0.0, 1.0], &[1.0, 0.0, 0.0]).unwrap();
        assert_eq!(f.value(1.0), 0.0);
        assert_eq!(f.value(2.0), 0.0);
        assert_eq!(f.value(3.0), 1.0);
        assert_eq!(f.value(4.0), 2.0);
        assert_eq!(f.last_output(), 2.0);
    }

    #[test]
    fn test_last_output_does_not_mutate() {
        let mut f = Filter::new(&[1.0, 0.0], &[1.0, -1.0]).unwrap();
        f.value(2.0);
        assert_eq!(f.last_output(), 2.0);
        assert_eq!(f.last_output(), 2.0);
        assert_eq!(f.value(1.0), 3.0);
    }
}
