use std::collections::BTreeSet;

use crate::channel::{ChannelState, Stage};
use crate::types::{ChannelId, Seconds};

/// A channel qualifies when its duration exceeds this share of the previous consensus.
pub const QUALIFICATION_RATIO: f64 = 0.8;
pub const CONSENSUS_PERCENTILE: f64 = 0.5;
/// Percentile of the raw peak delays used when no channel qualifies.
pub const BOOTSTRAP_PERCENTILE: f64 = 0.75;
/// Above this many non-zero durations the final value is the median, otherwise their mean.
pub const MEDIAN_MIN_DURATIONS: usize = 5;
pub const DEFAULT_FINAL_DURATION: Seconds = 1.0;

/// What the consensus needs to know about one channel.
#[derive(Debug, Clone, PartialEq)]
pub struct DurationSample {
	pub channel: ChannelId,
	pub duration: Option<Seconds>,
	pub done: bool,
	/// Raw global extremum time minus the theoretical arrival, when positive.
	pub peak_delay: Option<Seconds>,
}

impl From<&ChannelState> for DurationSample {
	fn from(channel: &ChannelState) -> Self {
		Self {
			channel: channel.id().clone(),
			duration: channel.duration(),
			done: channel.stage() == Stage::Done,
			peak_delay: channel.peak_delay(),
		}
	}
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConsensusEstimate {
	pub duration: Seconds,
	/// Channels that qualified against the consensus in force before this estimate.
	pub qualified: BTreeSet<ChannelId>,
	/// True when the estimate came from the raw peak delays rather than channel durations.
	pub bootstrapped: bool,
}

/// Percentile by nearest rank, `sorted[round((n - 1) * p)]` with halves rounded away from zero.
pub fn percentile(sorted: &[f64], p: f64) -> Option<f64> {
	let last = sorted.len().checked_sub(1)?;
	let index = (last as f64 * p).round() as usize;
	sorted.get(index.min(last)).copied()
}

fn sorted(mut values: Vec<f64>) -> Vec<f64> {
	values.sort_by(f64::total_cmp);
	values
}

/// Network-wide event duration, re-estimated on every update.
#[derive(Debug, Clone, Default)]
pub struct DurationConsensus {
	mean_duration: Seconds,
}

impl DurationConsensus {
	pub fn new() -> Self {
		Self::default()
	}

	pub const fn duration(&self) -> Seconds {
		self.mean_duration
	}

	pub fn is_qualified(&self, sample: &DurationSample) -> bool {
		sample.duration.is_some_and(|duration| duration > QUALIFICATION_RATIO * self.mean_duration || sample.done)
	}

	fn qualified(&self, samples: &[DurationSample]) -> BTreeSet<ChannelId> {
		samples.iter().filter(|sample| self.is_qualified(sample)).map(|sample| sample.channel.clone()).collect()
	}

	/// Provisional estimate: median of qualified durations, or a high percentile of the
	/// raw peak delays while no channel qualifies.
	pub fn update(&mut self, samples: &[DurationSample]) -> ConsensusEstimate {
		let qualified = self.qualified(samples);

		let durations = sorted(
			samples
				.iter()
				.filter(|sample| qualified.contains(&sample.channel))
				.filter_map(|sample| sample.duration)
				.collect(),
		);

		let (duration, bootstrapped) = match percentile(&durations, CONSENSUS_PERCENTILE) {
			Some(median) => (median, false),
			None => {
				let delays = sorted(samples.iter().filter_map(|sample| sample.peak_delay).collect());
				(percentile(&delays, BOOTSTRAP_PERCENTILE).unwrap_or(0.0), true)
			},
		};

		self.mean_duration = duration;
		ConsensusEstimate { duration, qualified, bootstrapped }
	}

	/// Final estimate over every non-zero channel duration.
	pub fn finalize(&mut self, samples: &[DurationSample]) -> ConsensusEstimate {
		let qualified = self.qualified(samples);

		let durations = sorted(samples.iter().filter_map(|sample| sample.duration).filter(|d| *d != 0.0).collect());
		let duration = match durations.len() {
			0 => DEFAULT_FINAL_DURATION,
			n if n > MEDIAN_MIN_DURATIONS => durations[(n - 1) / 2],
			n => durations.iter().sum::<f64>() / n as f64,
		};

		self.mean_duration = duration;
		ConsensusEstimate { duration, qualified, bootstrapped: false }
	}
}
