//! Band-limiting of the control signal used for arrival and duration detection.

use serde::Deserialize;
use std::f64::consts::PI;

/// Stateful per-sample filter owned by one channel.
pub trait BandFilter: Send + Sync {
	fn apply(&mut self, sample: f64) -> f64;
}

/// Creates one filter per channel once its sampling rate is known.
pub trait FilterFactory: Send + Sync {
	fn create(&self, sampling_rate: f64) -> Box<dyn BandFilter>;
}

/// Butterworth band-pass parameters (`BW(order, low, high)`).
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct BandpassSpec {
	pub order: usize,
	pub low_hz: f64,
	pub high_hz: f64,
}

impl Default for BandpassSpec {
	fn default() -> Self {
		Self { order: 4, low_hz: 1.0, high_hz: 3.0 }
	}
}

impl FilterFactory for BandpassSpec {
	fn create(&self, sampling_rate: f64) -> Box<dyn BandFilter> {
		Box::new(ButterworthBandpass::new(*self, sampling_rate))
	}
}

/// Second-order section, Direct Form II Transposed.
///
/// H(z) = (b0 + b1*z^-1 + b2*z^-2) / (1 + a1*z^-1 + a2*z^-2)
#[derive(Debug, Clone)]
pub struct Biquad {
	b: [f64; 3],
	a: [f64; 2],
	state: [f64; 2],
}

impl Biquad {
	pub const fn new(b: [f64; 3], a: [f64; 2]) -> Self {
		Self { b, a, state: [0.0; 2] }
	}

	pub fn process(&mut self, input: f64) -> f64 {
		let output = self.b[0].mul_add(input, self.state[0]);
		self.state[0] = self.b[1] * input - self.a[0] * output + self.state[1];
		self.state[1] = self.b[2] * input - self.a[1] * output;
		output
	}

	pub fn reset(&mut self) {
		self.state = [0.0; 2];
	}

	/// Stability triangle for the denominator.
	pub fn is_stable(&self) -> bool {
		self.a[1].abs() < 1.0 && self.a[0].abs() < 1.0 + self.a[1]
	}

	fn lowpass(cutoff_hz: f64, sampling_rate: f64, q: f64) -> Self {
		let (cos_w0, alpha) = warp(cutoff_hz, sampling_rate, q);
		let a0 = 1.0 + alpha;
		let b = (1.0 - cos_w0) / 2.0;
		Self::new([b / a0, 2.0 * b / a0, b / a0], [-2.0 * cos_w0 / a0, (1.0 - alpha) / a0])
	}

	fn highpass(cutoff_hz: f64, sampling_rate: f64, q: f64) -> Self {
		let (cos_w0, alpha) = warp(cutoff_hz, sampling_rate, q);
		let a0 = 1.0 + alpha;
		let b = (1.0 + cos_w0) / 2.0;
		Self::new([b / a0, -2.0 * b / a0, b / a0], [-2.0 * cos_w0 / a0, (1.0 - alpha) / a0])
	}

	// First-order sections are stored as biquads with zero second-order terms.
	fn lowpass_first_order(cutoff_hz: f64, sampling_rate: f64) -> Self {
		let k = (PI * cutoff_hz / sampling_rate).tan();
		let norm = 1.0 / (1.0 + k);
		Self::new([k * norm, k * norm, 0.0], [(k - 1.0) * norm, 0.0])
	}

	fn highpass_first_order(cutoff_hz: f64, sampling_rate: f64) -> Self {
		let k = (PI * cutoff_hz / sampling_rate).tan();
		let norm = 1.0 / (1.0 + k);
		Self::new([norm, -norm, 0.0], [(k - 1.0) * norm, 0.0])
	}
}

fn warp(cutoff_hz: f64, sampling_rate: f64, q: f64) -> (f64, f64) {
	let w0 = 2.0 * PI * cutoff_hz / sampling_rate;
	(w0.cos(), w0.sin() / (2.0 * q))
}

/// Quality factors of the conjugate pole pairs of an analog Butterworth prototype.
fn butterworth_q(order: usize) -> Vec<f64> {
	(0..order / 2).map(|k| 1.0 / (2.0 * (PI * (2 * k + 1) as f64 / (2 * order) as f64).cos())).collect()
}

/// Butterworth high-pass at `low_hz` cascaded with a Butterworth low-pass at `high_hz`.
#[derive(Debug, Clone)]
pub struct ButterworthBandpass {
	sections: Vec<Biquad>,
}

impl ButterworthBandpass {
	pub fn new(band: BandpassSpec, sampling_rate: f64) -> Self {
		let order = band.order.max(1);
		let qs = butterworth_q(order);
		let mut sections = Vec::with_capacity(2 * qs.len() + 2);

		for &q in &qs {
			sections.push(Biquad::highpass(band.low_hz, sampling_rate, q));
		}
		if order % 2 == 1 {
			sections.push(Biquad::highpass_first_order(band.low_hz, sampling_rate));
		}

		for &q in &qs {
			sections.push(Biquad::lowpass(band.high_hz, sampling_rate, q));
		}
		if order % 2 == 1 {
			sections.push(Biquad::lowpass_first_order(band.high_hz, sampling_rate));
		}

		Self { sections }
	}

	pub fn sections(&self) -> &[Biquad] {
		&self.sections
	}

	pub fn reset(&mut self) {
		self.sections.iter_mut().for_each(Biquad::reset);
	}
}

impl BandFilter for ButterworthBandpass {
	fn apply(&mut self, sample: f64) -> f64 {
		self.sections.iter_mut().fold(sample, |x, section| section.process(x))
	}
}
