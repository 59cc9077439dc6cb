use rayon::prelude::*;
use serde::Serialize;
use std::cmp::Ordering;
use std::f64::consts::PI;

use crate::calibration::{DistanceCorrection, calibrated};
use crate::channel::ChannelState;
use crate::consensus::ConsensusEstimate;
use crate::geo;
use crate::peak::Peak;
use crate::types::{ChannelId, Event, Seconds};

/// Share of the sorted magnitudes dropped from each tail before averaging.
pub const TRIM_DIVISOR: usize = 8;

/// One channel's contribution to the network magnitude.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelMagnitude {
	pub magnitude: f64,
	pub duration: Seconds,
	pub channel: ChannelId,
}

impl ChannelMagnitude {
	fn cmp_key(&self, other: &Self) -> Ordering {
		self.magnitude
			.total_cmp(&other.magnitude)
			.then(self.duration.total_cmp(&other.duration))
			.then_with(|| self.channel.cmp(&other.channel))
	}
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregateResult {
	/// Magnitudes kept after trimming, sorted ascending.
	pub entries: Vec<ChannelMagnitude>,
	pub network_magnitude: Option<f64>,
	pub duration: Seconds,
	/// Size of the pool before trimming.
	pub candidates: usize,
}

impl AggregateResult {
	pub fn channel_count(&self) -> usize {
		self.entries.len()
	}
}

/// Per-channel outcome of one evaluation pass.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelEvaluation {
	pub channel: ChannelId,
	pub distance_deg: f64,
	/// `None` when the distance correction is undefined for this channel.
	pub magnitude: Option<f64>,
	pub duration: Option<Seconds>,
	pub qualified: bool,
}

impl ChannelEvaluation {
	fn candidate(&self) -> Option<ChannelMagnitude> {
		if !self.qualified {
			return None;
		}

		Some(ChannelMagnitude {
			magnitude: self.magnitude?,
			duration: self.duration.unwrap_or(0.0),
			channel: self.channel.clone(),
		})
	}
}

/// Uncorrected magnitude from the raw peaks strictly before `limit`.
///
/// Each peak contributes half its absolute value. A non-positive sum gives 0.
pub fn amplitude_magnitude(raw_peaks: &[Peak], limit: Seconds) -> f64 {
	let contribution: f64 = raw_peaks.iter().filter(|peak| peak.is_before(limit)).map(|peak| peak.abs() / 2.0).sum();

	if contribution > 0.0 { (contribution / (2.0 * PI)).log10() } else { 0.0 }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MagnitudeAggregator;

impl MagnitudeAggregator {
	pub const fn new() -> Self {
		Self
	}

	/// Computes every channel's magnitude for the given consensus duration.
	pub fn evaluate(
		&self,
		channels: &[&ChannelState],
		event: &Event,
		correction: &dyn DistanceCorrection,
		estimate: &ConsensusEstimate,
	) -> Vec<ChannelEvaluation> {
		channels
			.par_iter()
			.map(|channel| {
				let distance_deg = geo::epicentral_distance(event, &channel.location());
				let limit = channel.arrival() + estimate.duration;
				let magnitude = calibrated(correction, distance_deg, event.depth_km)
					.map(|correction| amplitude_magnitude(channel.raw_peaks(), limit) + correction);

				ChannelEvaluation {
					channel: channel.id().clone(),
					distance_deg,
					magnitude,
					duration: channel.duration(),
					qualified: estimate.qualified.contains(channel.id()),
				}
			})
			.collect()
	}

	/// Pools the qualified channels with a defined magnitude and takes their trimmed mean.
	pub fn aggregate(&self, evaluations: &[ChannelEvaluation], duration: Seconds) -> AggregateResult {
		self.trim(evaluations.iter().filter_map(ChannelEvaluation::candidate).collect(), duration)
	}

	/// Sorts the pool, drops `n / 8` entries from each end and averages the rest.
	pub fn trim(&self, mut pool: Vec<ChannelMagnitude>, duration: Seconds) -> AggregateResult {
		pool.sort_by(ChannelMagnitude::cmp_key);

		let candidates = pool.len();
		let k = candidates / TRIM_DIVISOR;
		let entries: Vec<ChannelMagnitude> = pool.drain(k..candidates - k).collect();

		let network_magnitude = (!entries.is_empty())
			.then(|| entries.iter().map(|entry| entry.magnitude).sum::<f64>() / entries.len() as f64);

		AggregateResult { entries, network_magnitude, duration, candidates }
	}
}
