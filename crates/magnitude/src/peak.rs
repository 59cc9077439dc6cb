use serde::Serialize;

use crate::types::Seconds;

/// Fraction of the current global extremum a secondary peak must reach to be recorded
/// (Bormann and Saul, 2008).
pub const SECONDARY_PEAK_RATIO: f64 = 0.6;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Peak {
	pub time: Seconds,
	pub value: f64,
}

impl Peak {
	pub const fn new(time: Seconds, value: f64) -> Self {
		Self { time, value }
	}

	pub const fn abs(&self) -> f64 {
		self.value.abs()
	}

	pub fn is_before(&self, time: Seconds) -> bool {
		self.time < time
	}

	pub fn exceeds(&self, other: &Self) -> bool {
		self.abs() > other.abs()
	}
}

/// Sign of a sample: -1, 0 or 1. An exact zero is its own sign.
pub fn sign(value: f64) -> i8 {
	if value == 0.0 {
		0
	} else if value < 0.0 {
		-1
	} else {
		1
	}
}

/// Hysteresis extremum detector for one signal.
///
/// Each half-cycle (run of samples with the same sign) keeps its largest absolute sample.
/// When the sign changes the half-cycle is closed and its extremum is emitted if it
/// exceeds `low_threshold` and either becomes the new global extremum or reaches
/// [`SECONDARY_PEAK_RATIO`] of it. The open half-cycle at the end of the stream is never
/// emitted.
#[derive(Debug, Clone)]
pub struct PeakTracker {
	local: Option<Peak>,
	global: Peak,
	current_sign: i8,
}

impl Default for PeakTracker {
	fn default() -> Self {
		Self::new()
	}
}

impl PeakTracker {
	pub const fn new() -> Self {
		Self { local: None, global: Peak::new(0.0, 0.0), current_sign: 0 }
	}

	pub const fn global(&self) -> Peak {
		self.global
	}

	pub const fn local(&self) -> Option<Peak> {
		self.local
	}

	/// Feeds one sample at absolute sample `position` and returns the peak closed by it, if any.
	pub fn check(&mut self, value: f64, position: u64, samples_per_second: f64, low_threshold: f64) -> Option<Peak> {
		let mut emitted = None;
		let value_sign = sign(value);

		if value_sign != self.current_sign {
			if let Some(local) = self.local
				&& local.abs() > low_threshold
			{
				if local.exceeds(&self.global) {
					self.global = local;
					emitted = Some(local);
				} else if local.abs() >= SECONDARY_PEAK_RATIO * self.global.abs() {
					emitted = Some(local);
				}
			}

			self.local = None;
			self.current_sign = value_sign;
		}

		if self.local.is_none_or(|local| value.abs() > local.abs()) {
			self.local = Some(Peak::new(position as f64 / samples_per_second, value));
		}

		emitted
	}
}
