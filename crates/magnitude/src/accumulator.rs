/// Running sum that is frozen into a single value once enough samples were seen.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Accumulator {
	Accumulating { sum: f64, count: u64 },
	Finalized { value: f64 },
}

impl Default for Accumulator {
	fn default() -> Self {
		Self::Accumulating { sum: 0.0, count: 0 }
	}
}

impl Accumulator {
	pub const fn is_finalized(&self) -> bool {
		matches!(self, Self::Finalized { .. })
	}

	/// Frozen value, or zero while still accumulating.
	pub const fn value_or_zero(&self) -> f64 {
		match self {
			Self::Finalized { value } => *value,
			Self::Accumulating { .. } => 0.0,
		}
	}

	pub const fn value(&self) -> Option<f64> {
		match self {
			Self::Finalized { value } => Some(*value),
			Self::Accumulating { .. } => None,
		}
	}

	/// Adds `x` to the sum. No effect once finalized.
	pub fn add(&mut self, x: f64) {
		if let Self::Accumulating { sum, count } = self {
			*sum += x;
			*count += 1;
		}
	}

	/// Drops everything accumulated so far. No effect once finalized.
	pub fn reset(&mut self) {
		if let Self::Accumulating { .. } = self {
			*self = Self::default();
		}
	}

	/// Freezes the arithmetic mean of the accumulated values (0 if none).
	pub fn finalize_mean(&mut self) -> f64 {
		match *self {
			Self::Finalized { value } => value,
			Self::Accumulating { sum, count } => {
				let value = if count > 0 { sum / count as f64 } else { 0.0 };
				*self = Self::Finalized { value };
				value
			},
		}
	}

	/// Freezes `sqrt(sum / count)` (0 if nothing was accumulated). Used with squared samples.
	pub fn finalize_rms(&mut self) -> f64 {
		match *self {
			Self::Finalized { value } => value,
			Self::Accumulating { sum, count } => {
				let value = if count > 0 { (sum / count as f64).sqrt() } else { 0.0 };
				*self = Self::Finalized { value };
				value
			},
		}
	}
}
