use serde::Deserialize;

use crate::filter::BandpassSpec;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
	/// Length of the leading window used for the mean offset and the RMS noise floor.
	pub peep_avg_secs: f64,
	/// Margin requested before the theoretical P arrival.
	pub margin_begin_secs: f64,
	/// Leading part of the band-limited signal ignored by the RMS (filter transient).
	pub filter_transient_secs: f64,
	/// Time without a new band-limited peak that ends the event on a channel.
	pub quiet_period_secs: f64,
	/// Largest tolerated gap between consecutive records of a channel.
	pub max_gap_secs: f64,
	/// Multiple of the RMS noise floor a band-limited peak must exceed.
	pub rms_threshold_factor: f64,
	pub update_interval_secs: u64,
	pub filter: BandpassSpec,
}

impl Default for ProcessingConfig {
	fn default() -> Self {
		Self {
			peep_avg_secs: 20.0,
			margin_begin_secs: 30.0,
			filter_transient_secs: 2.0,
			quiet_period_secs: 60.0,
			max_gap_secs: 5.0,
			rms_threshold_factor: 3.0,
			update_interval_secs: 1,
			filter: BandpassSpec::default(),
		}
	}
}

impl ProcessingConfig {
	/// Offset from the window start to the theoretical P arrival.
	pub fn p_offset(&self) -> f64 {
		self.margin_begin_secs + self.peep_avg_secs
	}
}
