use std::time::Duration;

/// Exponential per-item retry delay.
///
/// `delay(n) = min * factor^n`, clamped to `[min, max]`. The delay is derived
/// from the attempt number alone, so a success (which resets the attempt
/// counter) restores the minimum immediately.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
	/// Delay before the first retry.
	pub min: Duration,
	/// Upper bound for any retry delay.
	pub max: Duration,
	/// Growth factor between consecutive attempts.
	pub factor: f64,
}

impl Default for Backoff {
	fn default() -> Self {
		Self {
			min: Duration::from_millis(5),
			max: Duration::from_secs(1000),
			factor: 2.0,
		}
	}
}

impl Backoff {
	/// Creates a backoff with the given bounds and a doubling factor.
	pub fn new(min: Duration, max: Duration) -> Self {
		Self { min, max, factor: 2.0 }
	}

	/// Returns the delay for a 0-indexed retry attempt.
	pub fn delay(&self, attempt: u32) -> Duration {
		let floor = self.min.min(self.max);
		let exp = attempt.min(i32::MAX as u32) as i32;
		let secs = floor.as_secs_f64() * self.factor.powi(exp);
		if !secs.is_finite() || secs >= self.max.as_secs_f64() {
			return self.max;
		}
		if secs <= floor.as_secs_f64() {
			return floor;
		}
		Duration::from_secs_f64(secs)
	}
}
